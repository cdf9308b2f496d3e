//! Contrat de traduction: enregistrement brut vers enregistrement canonique
//!
//! Une juridiction fournit jusqu'à trois traducteurs (bureaux, secteurs,
//! adresses). Chacun est une fonction pure qui retourne soit un brouillon
//! d'enregistrement, soit [`Translation::Skip`] pour écarter une ligne connue
//! comme fausse. Les corrections littérales passent par une [`OverrideTable`]
//! appliquée avant la traduction.

pub mod mapped;
pub mod overrides;

use std::sync::Arc;

use pollsource::RawRecord;

use crate::error::PipelineError;
use crate::model::Location;

pub use mapped::{FieldMapping, MappedTranslator};
pub use overrides::{OverrideTable, SkipRule};

/// Résultat d'une traduction
#[derive(Debug, Clone, PartialEq)]
pub enum Translation<T> {
    Record(T),
    /// Écarte exactement cet enregistrement, sans effet sur les autres
    Skip,
}

impl<T> Translation<T> {
    pub fn is_skip(&self) -> bool {
        matches!(self, Translation::Skip)
    }
}

/// Brouillon de bureau de vote produit par un traducteur.
///
/// `jurisdiction_id` absent: le pipeline rattache la juridiction en cours.
/// `location` absente: le pipeline prend le premier sommet de la géométrie brute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationDraft {
    pub jurisdiction_id: Option<String>,
    pub internal_id: String,
    pub address: String,
    pub postcode: String,
    pub location: Option<Location>,
}

/// Brouillon de secteur. `area` absente: géométrie brute de l'enregistrement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistrictDraft {
    pub jurisdiction_id: Option<String>,
    /// Absent: [`crate::model::DEFAULT_DISTRICT_ID`]
    pub internal_id: Option<String>,
    pub name: String,
    pub area: Option<geojson::Geometry>,
}

/// Brouillon d'adresse
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressDraft {
    pub jurisdiction_id: Option<String>,
    pub address: String,
    pub postcode: String,
    pub station_ref: String,
    pub uprn: Option<String>,
}

/// Traducteur d'un type d'entité
pub trait Translator<T>: Send + Sync {
    fn translate(&self, raw: &RawRecord) -> Result<Translation<T>, PipelineError>;
}

impl<T, F> Translator<T> for F
where
    F: Fn(&RawRecord) -> Result<Translation<T>, PipelineError> + Send + Sync,
{
    fn translate(&self, raw: &RawRecord) -> Result<Translation<T>, PipelineError> {
        self(raw)
    }
}

/// Capacités de traduction d'une juridiction, chacune optionnelle.
///
/// Le pipeline vérifie à la construction qu'un traducteur existe pour chaque
/// type d'entité dont une source est configurée.
#[derive(Clone, Default)]
pub struct Translators {
    pub station: Option<Arc<dyn Translator<StationDraft>>>,
    pub district: Option<Arc<dyn Translator<DistrictDraft>>>,
    pub address: Option<Arc<dyn Translator<AddressDraft>>>,
}

impl Translators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_station(mut self, translator: impl Translator<StationDraft> + 'static) -> Self {
        self.station = Some(Arc::new(translator));
        self
    }

    pub fn with_district(mut self, translator: impl Translator<DistrictDraft> + 'static) -> Self {
        self.district = Some(Arc::new(translator));
        self
    }

    pub fn with_address(mut self, translator: impl Translator<AddressDraft> + 'static) -> Self {
        self.address = Some(Arc::new(translator));
        self
    }

    /// Complète les capacités absentes par des traducteurs déclaratifs
    pub fn or_mapped(
        mut self,
        station: Option<&FieldMapping>,
        district: Option<&FieldMapping>,
        address: Option<&FieldMapping>,
    ) -> Self {
        if self.station.is_none() {
            self.station = station.map(|m| {
                Arc::new(MappedTranslator::new(m.clone())) as Arc<dyn Translator<StationDraft>>
            });
        }
        if self.district.is_none() {
            self.district = district.map(|m| {
                Arc::new(MappedTranslator::new(m.clone())) as Arc<dyn Translator<DistrictDraft>>
            });
        }
        if self.address.is_none() {
            self.address = address.map(|m| {
                Arc::new(MappedTranslator::new(m.clone())) as Arc<dyn Translator<AddressDraft>>
            });
        }
        self
    }
}

impl std::fmt::Debug for Translators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translators")
            .field("station", &self.station.is_some())
            .field("district", &self.district.is_some())
            .field("address", &self.address.is_some())
            .finish()
    }
}
