//! Frontière de persistance
//!
//! Upsert par clé naturelle, suppression et lecture par juridiction.
//! Chaque upsert est atomique pour un enregistrement; un lot ne l'est pas.

pub mod memory;
pub mod pool;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use tracing::trace;

use crate::model::{CanonicalAddress, CanonicalDistrict, CanonicalStation};

pub use memory::MemoryStore;
pub use pool::{create_pool, DatabaseConfig, SslMode};
pub use postgres::{PgQualityReporter, PgStore};

/// Résultat d'un upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    Inserted,
    /// Enregistrement existant, champs non-clés écrasés
    Updated,
}

/// Rapport d'upsert pour un lot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertReport {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn record(&mut self, result: UpsertResult) {
        match result {
            UpsertResult::Inserted => self.inserted += 1,
            UpsertResult::Updated => self.updated += 1,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Supprime bureaux, secteurs et adresses de la juridiction
    async fn delete_jurisdiction(&self, jurisdiction_id: &str) -> Result<()>;

    async fn upsert_station(&self, station: &CanonicalStation) -> Result<UpsertResult>;
    async fn upsert_district(&self, district: &CanonicalDistrict) -> Result<UpsertResult>;
    async fn upsert_address(&self, address: &CanonicalAddress) -> Result<UpsertResult>;

    async fn stations(&self, jurisdiction_id: &str) -> Result<Vec<CanonicalStation>>;
    async fn districts(&self, jurisdiction_id: &str) -> Result<Vec<CanonicalDistrict>>;
    async fn addresses(&self, jurisdiction_id: &str) -> Result<Vec<CanonicalAddress>>;

    /// Supprime des adresses par slug, retourne le nombre de lignes supprimées
    async fn delete_addresses(&self, jurisdiction_id: &str, slugs: &[String]) -> Result<usize>;

    /// Un upsert par bureau, dans l'ordre reçu
    async fn upsert_stations(&self, stations: &[CanonicalStation]) -> Result<UpsertReport> {
        let mut report = UpsertReport::default();
        for station in stations {
            let result = self.upsert_station(station).await?;
            trace!(id = %station.internal_id, result = ?result, "Station upserted");
            report.record(result);
        }
        Ok(report)
    }

    async fn upsert_districts(&self, districts: &[CanonicalDistrict]) -> Result<UpsertReport> {
        let mut report = UpsertReport::default();
        for district in districts {
            let result = self.upsert_district(district).await?;
            trace!(id = %district.internal_id, result = ?result, "District upserted");
            report.record(result);
        }
        Ok(report)
    }

    async fn upsert_addresses(&self, addresses: &[CanonicalAddress]) -> Result<UpsertReport> {
        let mut report = UpsertReport::default();
        for address in addresses {
            let result = self.upsert_address(address).await?;
            trace!(slug = %address.slug, result = ?result, "Address upserted");
            report.record(result);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_report() {
        let mut report = UpsertReport::default();
        report.record(UpsertResult::Inserted);
        report.record(UpsertResult::Inserted);
        report.record(UpsertResult::Updated);

        assert_eq!(report.inserted, 2);
        assert_eq!(report.updated, 1);
        assert_eq!(report.total(), 3);
    }
}
