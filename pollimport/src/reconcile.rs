//! Réconciliation après chargement
//!
//! - suppression des adresses ambiguës: toutes les lignes d'un couple
//!   (adresse, code postal) présent plusieurs fois sont supprimées, aucune
//!   n'est gardée
//! - résolution des codes postaux à cheval sur plusieurs secteurs, déléguée à
//!   un référentiel d'adresses externe

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::model::CanonicalAddress;
use crate::store::Store;

/// Slugs de toutes les adresses dont le couple (adresse, code postal) n'est pas unique
pub fn ambiguous_slugs(addresses: &[CanonicalAddress]) -> Vec<String> {
    let mut groups: HashMap<(&str, &str), Vec<&str>> = HashMap::new();
    for address in addresses {
        groups
            .entry((address.address.as_str(), address.postcode.as_str()))
            .or_default()
            .push(address.slug.as_str());
    }

    let mut slugs: Vec<String> = groups
        .into_values()
        .filter(|group| group.len() > 1)
        .flatten()
        .map(str::to_string)
        .collect();
    slugs.sort();
    slugs
}

/// Supprime les adresses ambiguës d'une juridiction, retourne le nombre supprimé
pub async fn remove_duplicate_addresses(store: &dyn Store, jurisdiction_id: &str) -> Result<usize> {
    let addresses = store.addresses(jurisdiction_id).await?;
    let slugs = ambiguous_slugs(&addresses);
    if slugs.is_empty() {
        debug!(jurisdiction = jurisdiction_id, "No ambiguous addresses");
        return Ok(0);
    }

    let removed = store.delete_addresses(jurisdiction_id, &slugs).await?;
    info!(
        jurisdiction = jurisdiction_id,
        removed = removed,
        "Ambiguous addresses removed"
    );
    Ok(removed)
}

/// Résultat de la résolution des chevauchements code postal / secteur
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OverlapOutcome {
    pub no_attention_needed: usize,
    pub addresses_created: usize,
    /// Adresses restées ambiguës: signalées, jamais bloquantes
    pub residual_ambiguous: usize,
}

/// Référentiel d'adresses externe
#[async_trait]
pub trait AddressBase: Send + Sync {
    /// Résout les codes postaux répartis sur plusieurs secteurs de la juridiction
    async fn resolve_overlaps(&self, jurisdiction_id: &str, store: &dyn Store) -> Result<OverlapOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn address(slug: &str, text: &str, postcode: &str) -> CanonicalAddress {
        CanonicalAddress {
            jurisdiction_id: "X".into(),
            slug: slug.into(),
            address: text.into(),
            postcode: postcode.into(),
            station_ref: "PS1".into(),
        }
    }

    #[test]
    fn test_all_copies_are_ambiguous() {
        let addresses = vec![
            address("a", "1 High St", "AB12CD"),
            address("b", "1 High St", "AB12CD"),
            address("c", "2 High St", "AB12CD"),
            address("d", "1 High St", "AB12CE"),
        ];
        assert_eq!(ambiguous_slugs(&addresses), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_duplicate_addresses() {
        let store = MemoryStore::new();
        for a in [
            address("a", "1 High St", "AB12CD"),
            address("b", "1 High St", "AB12CD"),
            address("c", "2 High St", "AB12CD"),
        ] {
            store.upsert_address(&a).await.unwrap();
        }

        assert_eq!(remove_duplicate_addresses(&store, "X").await.unwrap(), 2);

        let left = store.addresses("X").await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].address, "2 High St");

        assert_eq!(remove_duplicate_addresses(&store, "X").await.unwrap(), 0);
    }
}
