//! Configuration d'import d'une juridiction
//!
//! Un fichier JSON par juridiction décrit ses sources (une par type d'entité),
//! la correspondance des champs (ou un preset embarqué), les corrections
//! littérales et les options de géométrie.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pollsource::{DelimitedOptions, Format, DEFAULT_SRID};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::model::Entity;
use crate::translate::{FieldMapping, OverrideTable};

/// Configuration d'une juridiction
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JurisdictionConfig {
    pub jurisdiction_id: String,

    /// SRID des géométries de la source (défaut: British National Grid)
    #[serde(default = "default_srid")]
    pub srid: u32,

    /// SRID propre aux secteurs, quand il diffère de `srid`
    #[serde(default)]
    pub districts_srid: Option<u32>,

    /// `false`: toutes les sources sont distantes (`url`)
    #[serde(default = "default_true")]
    pub local_files: bool,

    /// Répertoire source explicite, à la place de la recherche `<id>-*`
    #[serde(default)]
    pub base_folder_path: Option<PathBuf>,

    /// Sources hébergées sous la racine de données privée
    #[serde(default)]
    pub private: bool,

    /// Preset de correspondance embarqué (`xpress`, `district_boundaries`)
    #[serde(default)]
    pub preset: Option<String>,

    #[serde(default)]
    pub stations: Option<SourceConfig>,
    #[serde(default)]
    pub districts: Option<SourceConfig>,
    #[serde(default)]
    pub addresses: Option<SourceConfig>,

    /// Géocoder le code postal des bureaux sans position
    #[serde(default)]
    pub allow_station_point_from_postcode: bool,

    /// Nom du hook post-import à exécuter
    #[serde(default)]
    pub post_import: Option<String>,
}

/// Source d'un type d'entité
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub format: SourceFormat,

    /// Nom du fichier dans le répertoire de la juridiction
    #[serde(default)]
    pub name: Option<String>,

    /// URL pour une source distante
    #[serde(default)]
    pub url: Option<String>,

    /// `,` `;` `|` ou `tab`
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Champs de l'empreinte de dédoublonnage (vide: pas de dédoublonnage)
    #[serde(default)]
    pub fingerprint: Vec<String>,

    #[serde(default)]
    pub mapping: Option<FieldMapping>,

    #[serde(default)]
    pub overrides: Option<OverrideTable>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Shapefile,
    Kml,
    Geojson,
}

/// Preset embarqué: correspondance et empreinte par type d'entité
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub stations: Option<PresetEntity>,
    #[serde(default)]
    pub districts: Option<PresetEntity>,
    #[serde(default)]
    pub addresses: Option<PresetEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresetEntity {
    #[serde(default)]
    pub fingerprint: Vec<String>,
    pub mapping: FieldMapping,
}

fn default_srid() -> u32 {
    DEFAULT_SRID
}

fn default_true() -> bool {
    true
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl Preset {
    /// Charge un preset embarqué
    pub fn named(name: &str) -> Result<Self, PipelineError> {
        let json = match name {
            "xpress" => include_str!("presets/xpress.json"),
            "district_boundaries" => include_str!("presets/district_boundaries.json"),
            _ => {
                return Err(PipelineError::config(format!(
                    "Unknown preset: {name}. Use: xpress, district_boundaries"
                )))
            }
        };
        serde_json::from_str(json)
            .map_err(|e| PipelineError::config(format!("Failed to parse embedded preset {name}: {e}")))
    }

    fn entity(&self, entity: Entity) -> Option<&PresetEntity> {
        match entity {
            Entity::Station => self.stations.as_ref(),
            Entity::District => self.districts.as_ref(),
            Entity::Address => self.addresses.as_ref(),
        }
    }
}

impl JurisdictionConfig {
    /// Charge une configuration depuis un fichier
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .context(format!("Failed to parse config JSON: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Charge une configuration depuis une chaîne JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Vérifie la cohérence de la configuration
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.jurisdiction_id.trim().is_empty() {
            return Err(PipelineError::config("jurisdiction_id must not be empty"));
        }

        if let Some(preset) = &self.preset {
            Preset::named(preset)?;
        }

        for (entity, source) in self.sources() {
            match (&source.name, &source.url) {
                (None, None) => {
                    return Err(PipelineError::config(format!(
                        "{entity} source needs a name or a url"
                    )))
                }
                (_, None) if !self.local_files => {
                    return Err(PipelineError::config(format!(
                        "{entity} source needs a url when local_files is false"
                    )))
                }
                _ => {}
            }
            source.format()?;
        }

        Ok(())
    }

    /// Sources configurées, dans l'ordre de persistance
    pub fn sources(&self) -> impl Iterator<Item = (Entity, &SourceConfig)> {
        [
            (Entity::District, self.districts.as_ref()),
            (Entity::Station, self.stations.as_ref()),
            (Entity::Address, self.addresses.as_ref()),
        ]
        .into_iter()
        .filter_map(|(entity, source)| source.map(|s| (entity, s)))
    }

    pub fn source(&self, entity: Entity) -> Option<&SourceConfig> {
        match entity {
            Entity::Station => self.stations.as_ref(),
            Entity::District => self.districts.as_ref(),
            Entity::Address => self.addresses.as_ref(),
        }
    }

    /// SRID des secteurs
    pub fn districts_srid(&self) -> u32 {
        self.districts_srid.unwrap_or(self.srid)
    }

    /// Correspondance effective d'une entité: celle de la source, sinon celle du preset.
    ///
    /// Le SRID des coordonnées est celui de la juridiction quand il n'est pas précisé.
    pub fn mapping(&self, entity: Entity) -> Result<Option<FieldMapping>, PipelineError> {
        let Some(source) = self.source(entity) else {
            return Ok(None);
        };

        let mapping = match &source.mapping {
            Some(mapping) => Some(mapping.clone()),
            None => self.preset_entity(entity)?.map(|p| p.mapping),
        };

        Ok(mapping.map(|mut m| {
            m.srid = m.srid.or(Some(self.srid));
            m
        }))
    }

    /// Champs de l'empreinte effective d'une entité
    pub fn fingerprint(&self, entity: Entity) -> Result<Vec<String>, PipelineError> {
        let Some(source) = self.source(entity) else {
            return Ok(Vec::new());
        };
        if !source.fingerprint.is_empty() {
            return Ok(source.fingerprint.clone());
        }
        Ok(self
            .preset_entity(entity)?
            .map(|p| p.fingerprint)
            .unwrap_or_default())
    }

    fn preset_entity(&self, entity: Entity) -> Result<Option<PresetEntity>, PipelineError> {
        match &self.preset {
            Some(name) => Ok(Preset::named(name)?.entity(entity).cloned()),
            None => Ok(None),
        }
    }
}

impl SourceConfig {
    /// Format d'adaptateur correspondant
    pub fn format(&self) -> Result<Format, PipelineError> {
        Ok(match self.format {
            SourceFormat::Csv => Format::Delimited(DelimitedOptions {
                delimiter: parse_delimiter(&self.delimiter)?,
                encoding: self.encoding.clone(),
            }),
            SourceFormat::Shapefile => Format::Shapefile,
            SourceFormat::Kml => Format::Kml,
            SourceFormat::Geojson => Format::GeoJson,
        })
    }
}

fn parse_delimiter(raw: &str) -> Result<u8, PipelineError> {
    match raw {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        s if s.len() == 1 && s.is_ascii() => Ok(s.as_bytes()[0]),
        _ => Err(PipelineError::config(format!(
            "Invalid delimiter {raw:?}: expected a single ASCII character or \"tab\""
        ))),
    }
}

/// Charge plusieurs configurations, indexées par juridiction
pub fn load_all(paths: &[PathBuf]) -> Result<BTreeMap<String, JurisdictionConfig>> {
    let mut configs = BTreeMap::new();
    for path in paths {
        let config = JurisdictionConfig::load(path)?;
        if configs.contains_key(&config.jurisdiction_id) {
            anyhow::bail!(
                "Jurisdiction {} is configured twice (second time in {})",
                config.jurisdiction_id,
                path.display()
            );
        }
        configs.insert(config.jurisdiction_id.clone(), config);
    }
    Ok(configs)
}
