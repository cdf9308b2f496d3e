//! Accumulateurs d'enregistrements canoniques
//!
//! Un accumulateur par type d'entité, créé neuf à chaque import. Il garde les
//! enregistrements en mémoire dans l'ordre d'ajout, écarte optionnellement les
//! empreintes déjà vues, puis les persiste en un seul passage.

use std::collections::HashSet;

use tracing::info;

use crate::error::PipelineError;
use crate::model::{CanonicalAddress, CanonicalDistrict, CanonicalStation, Entity};
use crate::store::{Store, UpsertReport};

#[derive(Debug)]
pub struct Accumulator<T> {
    records: Vec<T>,
    seen: HashSet<[u8; 32]>,
}

pub type StationList = Accumulator<CanonicalStation>;
pub type DistrictList = Accumulator<CanonicalDistrict>;
pub type AddressList = Accumulator<CanonicalAddress>;

impl<T> Default for Accumulator<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            seen: HashSet::new(),
        }
    }
}

impl<T> Accumulator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: T) {
        self.records.push(record);
    }

    /// Ajoute l'enregistrement si son empreinte n'a pas encore été vue.
    ///
    /// Retourne `false` (et ignore l'enregistrement) pour un doublon.
    pub fn add_if_new(&mut self, fingerprint: [u8; 32], record: T) -> bool {
        if !self.seen.insert(fingerprint) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [T] {
        &mut self.records
    }
}

fn saved(entity: Entity, report: &UpsertReport) {
    info!(
        entity = %entity,
        inserted = report.inserted,
        updated = report.updated,
        "Saved"
    );
}

impl StationList {
    /// Un upsert par bureau, par clé naturelle
    pub async fn save(&self, store: &dyn Store) -> Result<UpsertReport, PipelineError> {
        let report = store
            .upsert_stations(&self.records)
            .await
            .map_err(PipelineError::Store)?;
        saved(Entity::Station, &report);
        Ok(report)
    }
}

impl DistrictList {
    pub async fn save(&self, store: &dyn Store) -> Result<UpsertReport, PipelineError> {
        let report = store
            .upsert_districts(&self.records)
            .await
            .map_err(PipelineError::Store)?;
        saved(Entity::District, &report);
        Ok(report)
    }
}

impl AddressList {
    pub async fn save(&self, store: &dyn Store) -> Result<UpsertReport, PipelineError> {
        let report = store
            .upsert_addresses(&self.records)
            .await
            .map_err(PipelineError::Store)?;
        saved(Entity::Address, &report);
        Ok(report)
    }
}
