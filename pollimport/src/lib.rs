//! # pollimport
//!
//! Import idempotent, juridiction par juridiction, des bureaux de vote, des
//! secteurs et des adresses publiés par les collectivités vers PostGIS.
//!
//! ## Features
//!
//! - Sources CSV/TSV, Shapefile, KML/KMZ, GeoJSON, locales ou distantes
//! - Traducteurs déclaratifs (correspondance de champs, presets embarqués) ou fournis en code
//! - Tables de corrections littérales et règles d'exclusion, sous forme de données
//! - Import « tout remplacer »: suppression puis upsert par clé naturelle
//! - Réconciliation des adresses ambiguës et rapport qualité
//! - Store PostGIS avec pool de connexions, ou store en mémoire
//!
//! ## Usage CLI
//!
//! ```bash
//! # Import de plusieurs juridictions vers PostGIS
//! pollimport import configs/E07000223.json configs/W06000015.json --data-root ./data --jobs 4
//!
//! # Import à blanc (sans base de données), avec empreinte du contenu
//! pollimport check configs/E07000223.json --data-root ./data
//!
//! # Export GeoJSON
//! pollimport to-geojson --config configs/E07000223.json --data-root ./data --output ./geojson/
//! ```

pub mod accumulate;
pub mod config;
pub mod error;
pub mod export;
pub mod fingerprint;
pub mod geocode;
pub mod locate;
pub mod model;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod slug;
pub mod store;
pub mod translate;

pub use config::JurisdictionConfig;
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineBuilder, RunFailure, Stage};
pub use report::{RunReport, RunStatus};
pub use store::{create_pool, DatabaseConfig, MemoryStore, PgStore, Store};
