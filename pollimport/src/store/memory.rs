//! Store en mémoire, ordonné, sans base de données
//!
//! Sert aux tests et à la commande `check`. Son condensé de contenu permet de
//! comparer deux imports successifs.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use blake3::Hasher;

use super::{Store, UpsertResult};
use crate::fingerprint::{area_hash, point_hash};
use crate::model::{CanonicalAddress, CanonicalDistrict, CanonicalStation};

type Key = (String, String);

#[derive(Debug, Default)]
struct Tables {
    stations: BTreeMap<Key, CanonicalStation>,
    districts: BTreeMap<Key, CanonicalDistrict>,
    addresses: BTreeMap<String, CanonicalAddress>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    /// Nombre de (bureaux, secteurs, adresses) toutes juridictions confondues
    pub fn counts(&self) -> Result<(usize, usize, usize)> {
        let tables = self.lock()?;
        Ok((
            tables.stations.len(),
            tables.districts.len(),
            tables.addresses.len(),
        ))
    }

    /// Condensé blake3 (hexadécimal) du contenu d'une juridiction.
    ///
    /// Deux imports de la même source doivent produire le même condensé.
    pub fn digest(&self, jurisdiction_id: &str) -> Result<String> {
        let tables = self.lock()?;
        let mut hasher = Hasher::new();

        for station in tables
            .stations
            .values()
            .filter(|s| s.jurisdiction_id == jurisdiction_id)
        {
            hasher.update(b"S");
            for field in [&station.internal_id, &station.address, &station.postcode] {
                hash_text(&mut hasher, field);
            }
            if let Some(location) = &station.location {
                point_hash(&mut hasher, &location.point);
                hasher.update(&location.srid.to_le_bytes());
            }
        }

        for district in tables
            .districts
            .values()
            .filter(|d| d.jurisdiction_id == jurisdiction_id)
        {
            hasher.update(b"D");
            hash_text(&mut hasher, &district.internal_id);
            hash_text(&mut hasher, &district.name);
            area_hash(&mut hasher, &district.area.geometry);
            hasher.update(&district.area.srid.to_le_bytes());
        }

        for address in tables
            .addresses
            .values()
            .filter(|a| a.jurisdiction_id == jurisdiction_id)
        {
            hasher.update(b"A");
            for field in [&address.slug, &address.address, &address.postcode, &address.station_ref] {
                hash_text(&mut hasher, field);
            }
        }

        Ok(hex::encode(hasher.finalize().as_bytes()))
    }
}

fn hash_text(hasher: &mut Hasher, text: &str) {
    hasher.update(&(text.len() as u64).to_le_bytes());
    hasher.update(text.as_bytes());
}

fn key(jurisdiction_id: &str, internal_id: &str) -> Key {
    (jurisdiction_id.to_string(), internal_id.to_string())
}

fn upsert<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, value: V) -> UpsertResult {
    match map.insert(key, value) {
        Some(_) => UpsertResult::Updated,
        None => UpsertResult::Inserted,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn delete_jurisdiction(&self, jurisdiction_id: &str) -> Result<()> {
        let mut tables = self.lock()?;
        tables.stations.retain(|(j, _), _| j != jurisdiction_id);
        tables.districts.retain(|(j, _), _| j != jurisdiction_id);
        tables
            .addresses
            .retain(|_, a| a.jurisdiction_id != jurisdiction_id);
        Ok(())
    }

    async fn upsert_station(&self, station: &CanonicalStation) -> Result<UpsertResult> {
        let mut tables = self.lock()?;
        let key = key(&station.jurisdiction_id, &station.internal_id);
        Ok(upsert(&mut tables.stations, key, station.clone()))
    }

    async fn upsert_district(&self, district: &CanonicalDistrict) -> Result<UpsertResult> {
        let mut tables = self.lock()?;
        let key = key(&district.jurisdiction_id, &district.internal_id);
        Ok(upsert(&mut tables.districts, key, district.clone()))
    }

    async fn upsert_address(&self, address: &CanonicalAddress) -> Result<UpsertResult> {
        let mut tables = self.lock()?;
        Ok(upsert(&mut tables.addresses, address.slug.clone(), address.clone()))
    }

    async fn stations(&self, jurisdiction_id: &str) -> Result<Vec<CanonicalStation>> {
        let tables = self.lock()?;
        Ok(tables
            .stations
            .values()
            .filter(|s| s.jurisdiction_id == jurisdiction_id)
            .cloned()
            .collect())
    }

    async fn districts(&self, jurisdiction_id: &str) -> Result<Vec<CanonicalDistrict>> {
        let tables = self.lock()?;
        Ok(tables
            .districts
            .values()
            .filter(|d| d.jurisdiction_id == jurisdiction_id)
            .cloned()
            .collect())
    }

    async fn addresses(&self, jurisdiction_id: &str) -> Result<Vec<CanonicalAddress>> {
        let tables = self.lock()?;
        Ok(tables
            .addresses
            .values()
            .filter(|a| a.jurisdiction_id == jurisdiction_id)
            .cloned()
            .collect())
    }

    async fn delete_addresses(&self, jurisdiction_id: &str, slugs: &[String]) -> Result<usize> {
        let mut tables = self.lock()?;
        let mut removed = 0;
        for slug in slugs {
            let owned = tables
                .addresses
                .get(slug)
                .is_some_and(|a| a.jurisdiction_id == jurisdiction_id);
            if owned && tables.addresses.remove(slug).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
