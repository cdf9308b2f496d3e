//! Rapport d'import d'une juridiction
//!
//! Ce module collecte les compteurs d'un import (lus, ignorés, doublons,
//! insérés, mis à jour), les avertissements non bloquants et la cause d'un
//! échec. Le rapport est transmis aux collaborateurs qualité en fin d'import.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::model::Entity;
use crate::pipeline::Stage;
use crate::reconcile::OverlapOutcome;
use crate::store::UpsertReport;

/// Statut global de l'import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Success,
    /// Import terminé avec des avertissements (réconciliation partielle...)
    PartialSuccess,
    Failed,
}

/// Compteurs par type d'entité
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityStats {
    /// Enregistrements bruts lus
    pub read: usize,
    /// Écartés par une règle ou un traducteur
    pub skipped: usize,
    /// Écartés par l'empreinte (premier vu gagne)
    pub duplicates: usize,
    pub inserted: usize,
    pub updated: usize,
}

impl EntityStats {
    pub fn persisted(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Rapport complet d'import
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub jurisdiction_id: String,
    pub duration_secs: f64,
    pub status: RunStatus,
    /// Dernière étape atteinte (`Done` ou `Failed`)
    pub stage: Stage,
    /// Étape où l'import a échoué
    pub failed_stage: Option<Stage>,
    pub by_entity: BTreeMap<Entity, EntityStats>,
    /// Adresses supprimées car ambiguës (adresse + code postal dupliqués)
    pub duplicates_removed: usize,
    /// Adresses dont le bureau n'existe pas après persistance
    pub unresolved_station_refs: usize,
    pub overlap: Option<OverlapOutcome>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(jurisdiction_id: &str) -> Self {
        Self {
            jurisdiction_id: jurisdiction_id.to_string(),
            duration_secs: 0.0,
            status: RunStatus::Success,
            stage: Stage::Init,
            failed_stage: None,
            by_entity: BTreeMap::new(),
            duplicates_removed: 0,
            unresolved_station_refs: 0,
            overlap: None,
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn entity(&mut self, entity: Entity) -> &mut EntityStats {
        self.by_entity.entry(entity).or_default()
    }

    pub fn stats(&self, entity: Entity) -> EntityStats {
        self.by_entity.get(&entity).cloned().unwrap_or_default()
    }

    pub fn record_upsert(&mut self, entity: Entity, upsert: &UpsertReport) {
        let stats = self.entity(entity);
        stats.inserted += upsert.inserted;
        stats.updated += upsert.updated;
    }

    pub fn record_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Marque l'import en échec à l'étape donnée
    pub fn record_failure(&mut self, stage: Stage, message: impl Into<String>) {
        self.failed_stage = Some(stage);
        self.stage = Stage::Failed;
        self.error = Some(message.into());
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Détermine le statut final
    pub fn finalize(&mut self) {
        self.status = if self.error.is_some() {
            RunStatus::Failed
        } else if !self.warnings.is_empty() {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Success
        };
    }

    /// Nombre de (bureaux, secteurs, adresses) persistés
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.stats(Entity::Station).persisted(),
            self.stats(Entity::District).persisted(),
            self.stats(Entity::Address)
                .persisted()
                .saturating_sub(self.duplicates_removed),
        )
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!("IMPORT REPORT - {}", self.jurisdiction_id);
        println!("{}", "=".repeat(60));

        println!("\nStatus: {:?}", self.status);
        println!("Duration: {:.2}s", self.duration_secs);
        if let (Some(stage), Some(error)) = (self.failed_stage, &self.error) {
            println!("Failed at {stage:?}: {error}");
        }

        if !self.by_entity.is_empty() {
            println!("\n--- BY ENTITY ---");
            for (entity, stats) in &self.by_entity {
                println!(
                    "  {}: {} read, {} skipped, {} duplicates, {} inserted, {} updated",
                    entity, stats.read, stats.skipped, stats.duplicates, stats.inserted, stats.updated
                );
            }
        }

        println!("\n--- RECONCILIATION ---");
        println!("Ambiguous addresses removed: {}", self.duplicates_removed);
        println!("Unresolved station references: {}", self.unresolved_station_refs);
        if let Some(overlap) = &self.overlap {
            println!(
                "Postcode/district overlap: {} no attention needed, {} created, {} still ambiguous",
                overlap.no_attention_needed, overlap.addresses_created, overlap.residual_ambiguous
            );
        }

        if !self.warnings.is_empty() {
            println!("\n--- WARNINGS ({}) ---", self.warnings.len());
            for w in self.warnings.iter().take(10) {
                println!("  {w}");
            }
            if self.warnings.len() > 10 {
                println!("  ... and {} more", self.warnings.len() - 10);
            }
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).context(format!("Failed to write report: {}", path.display()))?;
        Ok(())
    }

    /// Affichage compact pour le résumé
    pub fn summary(&self) -> String {
        let (stations, districts, addresses) = self.counts();
        match &self.error {
            Some(error) => format!("{}: FAILED ({error})", self.jurisdiction_id),
            None => format!(
                "{}: {} stations, {} districts, {} addresses, {} warnings",
                self.jurisdiction_id,
                stations,
                districts,
                addresses,
                self.warnings.len()
            ),
        }
    }
}

/// Collaborateur qualité: reçoit le rapport d'un import réussi
#[async_trait]
pub trait QualityReporter: Send + Sync {
    async fn publish(&self, report: &RunReport) -> Result<()>;
}

/// Écrit `<dir>/<jurisdiction_id>.json`
#[derive(Debug, Clone)]
pub struct JsonFileReporter {
    dir: PathBuf,
}

impl JsonFileReporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, jurisdiction_id: &str) -> PathBuf {
        self.dir.join(format!("{jurisdiction_id}.json"))
    }
}

#[async_trait]
impl QualityReporter for JsonFileReporter {
    async fn publish(&self, report: &RunReport) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .context(format!("Failed to create report directory: {}", self.dir.display()))?;
        report.save_to_file(&self.path_for(&report.jurisdiction_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_default() {
        let report = RunReport::new("E07000223");
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.stage, Stage::Init);
        assert_eq!(report.counts(), (0, 0, 0));
    }

    #[test]
    fn test_counts_exclude_removed_duplicates() {
        let mut report = RunReport::new("X");
        report.record_upsert(Entity::Station, &UpsertReport { inserted: 2, updated: 1 });
        report.record_upsert(Entity::Address, &UpsertReport { inserted: 10, updated: 0 });
        report.duplicates_removed = 4;

        assert_eq!(report.counts(), (3, 0, 6));
    }

    #[test]
    fn test_finalize() {
        let mut report = RunReport::new("X");
        report.finalize();
        assert_eq!(report.status, RunStatus::Success);

        report.record_warning("3 addresses still ambiguous");
        report.finalize();
        assert_eq!(report.status, RunStatus::PartialSuccess);

        report.record_failure(Stage::Persist, "connection reset");
        report.finalize();
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.stage, Stage::Failed);
        assert_eq!(report.failed_stage, Some(Stage::Persist));
    }

    #[test]
    fn test_summary() {
        let mut report = RunReport::new("X");
        report.record_upsert(Entity::Station, &UpsertReport { inserted: 3, updated: 0 });
        assert!(report.summary().contains("3 stations"));

        report.record_failure(Stage::Locate, "no source");
        assert!(report.summary().contains("FAILED (no source)"));
    }

    #[tokio::test]
    async fn test_json_file_reporter() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = JsonFileReporter::new(dir.path().join("reports"));

        let mut report = RunReport::new("E07000223");
        report.entity(Entity::Address).read = 5;
        reporter.publish(&report).await.unwrap();

        let content = std::fs::read_to_string(reporter.path_for("E07000223")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json["jurisdiction_id"], "E07000223");
        assert_eq!(json["by_entity"]["address"]["read"], 5);
    }
}
