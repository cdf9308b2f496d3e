//! Modèle canonique: bureaux de vote, secteurs et adresses
//!
//! Ces enregistrements sont indépendants du format source. Ils sont créés par
//! les traducteurs, gardés en mémoire par les accumulateurs, puis persistés
//! par un seul upsert par type d'entité et par import.

use std::fmt;

use geo::Point;
use pollsource::Area;
use serde::Serialize;

/// Identifiant de secteur quand la source n'en fournit pas (juridiction à secteur unique)
pub const DEFAULT_DISTRICT_ID: &str = "none";

/// Type d'entité importée
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Station,
    District,
    Address,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Station => "station",
            Entity::District => "district",
            Entity::Address => "address",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position d'un bureau de vote dans un SRID donné
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub point: Point<f64>,
    pub srid: u32,
}

impl Location {
    pub fn new(x: f64, y: f64, srid: u32) -> Self {
        Self {
            point: Point::new(x, y),
            srid,
        }
    }
}

/// Bureau de vote. Clé naturelle: `(jurisdiction_id, internal_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalStation {
    pub jurisdiction_id: String,
    pub internal_id: String,
    pub address: String,
    /// Toujours normalisé (voir [`normalize_postcode`])
    pub postcode: String,
    /// Absente quand la source ne donne qu'un code postal
    pub location: Option<Location>,
}

/// Secteur de vote. Clé naturelle: `(jurisdiction_id, internal_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalDistrict {
    pub jurisdiction_id: String,
    pub internal_id: String,
    pub name: String,
    /// Toujours un multi-polygone
    pub area: Area,
}

/// Adresse résidentielle. Clé naturelle: `slug`.
///
/// `station_ref` est une référence faible: l'`internal_id` d'un bureau de la
/// même juridiction, résolu à la persistance et jamais possédé.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalAddress {
    pub jurisdiction_id: String,
    pub slug: String,
    pub address: String,
    pub postcode: String,
    pub station_ref: String,
}

impl CanonicalAddress {
    /// Clé de recherche du bureau référencé
    pub fn station_key(&self) -> (&str, &str) {
        (&self.jurisdiction_id, &self.station_ref)
    }
}

/// Normalise un code postal: majuscules, sans espaces ni ponctuation.
///
/// `" ab1  2cd "` devient `"AB12CD"`.
pub fn normalize_postcode(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
