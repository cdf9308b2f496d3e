//! Tables de corrections littérales
//!
//! Les erreurs connues des sources sont corrigées par des données, pas par du
//! code: `patches` force des valeurs de champs pour un identifiant donné,
//! `skip` écarte les enregistrements dont un champ figure dans une liste.

use std::collections::{BTreeMap, BTreeSet};

use pollsource::{normalize_field_name, RawRecord};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Translation;

/// Table de corrections d'un type d'entité
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct OverrideTable {
    /// Champ portant l'identifiant naturel de la source
    pub key_field: String,
    /// identifiant -> (champ -> valeur forcée)
    #[serde(default)]
    pub patches: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub skip: Vec<SkipRule>,
}

/// Écarte les enregistrements dont `field` vaut l'une des `values`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SkipRule {
    pub field: String,
    pub values: BTreeSet<String>,
    /// Comparer sans les zéros de tête (`004510741266` == `4510741266`)
    #[serde(default)]
    pub strip_leading_zeros: bool,
}

impl SkipRule {
    pub fn matches(&self, raw: &RawRecord) -> bool {
        let value = self.normalize(raw.text(&normalize_field_name(&self.field)));
        if value.is_empty() {
            return false;
        }
        self.values.iter().any(|v| self.normalize(v) == value)
    }

    fn normalize<'a>(&self, value: &'a str) -> &'a str {
        let value = value.trim();
        if self.strip_leading_zeros {
            value.trim_start_matches('0')
        } else {
            value
        }
    }
}

impl OverrideTable {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty() && self.skip.is_empty()
    }

    /// Applique les corrections puis les règles d'exclusion.
    ///
    /// L'enregistrement reçu n'est jamais modifié: une copie corrigée est
    /// retournée. Les règles d'exclusion voient les valeurs corrigées.
    pub fn apply(&self, raw: &RawRecord) -> Translation<RawRecord> {
        let key_field = normalize_field_name(&self.key_field);
        let key = raw.text(&key_field).trim();

        let patched = match self.patches.get(key) {
            Some(diff) => {
                debug!(key = key, fields = diff.len(), "Applying override patch");
                diff.iter()
                    .fold(raw.clone(), |record, (field, value)| record.with_field(field, value.as_str()))
            }
            None => raw.clone(),
        };

        if let Some(rule) = self.skip.iter().find(|rule| rule.matches(&patched)) {
            debug!(key = key, field = %rule.field, "Record skipped by override rule");
            return Translation::Skip;
        }

        Translation::Record(patched)
    }
}
