//! Traducteur déclaratif: correspondance de champs décrite en configuration

use pollsource::{normalize_field_name, RawRecord};
use serde::{Deserialize, Serialize};

use super::{AddressDraft, DistrictDraft, StationDraft, Translation, Translator};
use crate::error::PipelineError;
use crate::model::{Entity, Location};

/// Correspondance entre champs source et champs canoniques.
///
/// Les noms sont normalisés à l'usage, `"Post Code"` vaut donc `post_code`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldMapping {
    /// Identifiant du bureau ou du secteur
    #[serde(default)]
    pub id: Option<String>,
    /// Nom du secteur, ou nom du bureau placé en tête de son adresse
    #[serde(default)]
    pub name: Option<String>,
    /// Champs concaténés avec `", "` (les valeurs vides sont ignorées)
    #[serde(default)]
    pub address: Vec<String>,
    #[serde(default)]
    pub postcode: Option<String>,
    #[serde(default)]
    pub easting: Option<String>,
    #[serde(default)]
    pub northing: Option<String>,
    /// SRID des coordonnées `easting`/`northing`
    /// (renseigné avec celui de la juridiction par [`crate::config::JurisdictionConfig::mapping`])
    #[serde(default)]
    pub srid: Option<u32>,
    /// Bureau de rattachement d'une adresse
    #[serde(default)]
    pub station_ref: Option<String>,
    #[serde(default)]
    pub uprn: Option<String>,
}

/// Traducteur construit à partir d'une [`FieldMapping`]
#[derive(Debug, Clone)]
pub struct MappedTranslator {
    mapping: FieldMapping,
}

impl MappedTranslator {
    pub fn new(mapping: FieldMapping) -> Self {
        Self { mapping }
    }

    fn field<'a>(&self, raw: &'a RawRecord, name: Option<&String>) -> &'a str {
        name.map(|n| raw.text(&normalize_field_name(n)).trim())
            .unwrap_or("")
    }

    /// Identifiant pris tel quel: seul un identifiant blanc est considéré absent
    fn id<'a>(&self, raw: &'a RawRecord) -> Option<&'a str> {
        let id = self.mapping.id.as_ref().map(|n| raw.text(&normalize_field_name(n)))?;
        (!id.trim().is_empty()).then_some(id)
    }

    fn joined_address(&self, raw: &RawRecord, leading: Option<&str>) -> String {
        leading
            .into_iter()
            .chain(
                self.mapping
                    .address
                    .iter()
                    .map(|name| raw.text(&normalize_field_name(name)).trim()),
            )
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Position depuis easting/northing, si les deux sont présents et numériques
    fn location(&self, raw: &RawRecord) -> Option<Location> {
        let easting = self.field(raw, self.mapping.easting.as_ref());
        let northing = self.field(raw, self.mapping.northing.as_ref());
        let x: f64 = easting.parse().ok()?;
        let y: f64 = northing.parse().ok()?;

        // 0/0 est la valeur de remplissage des exports sans coordonnées
        if x == 0.0 && y == 0.0 {
            return None;
        }

        Some(Location::new(
            x,
            y,
            self.mapping.srid.unwrap_or(pollsource::DEFAULT_SRID),
        ))
    }
}

impl Translator<StationDraft> for MappedTranslator {
    fn translate(&self, raw: &RawRecord) -> Result<Translation<StationDraft>, PipelineError> {
        let Some(internal_id) = self.id(raw) else {
            return Err(PipelineError::translation(
                Entity::Station,
                format!("missing station id (field {:?})", self.mapping.id),
            ));
        };

        let name = self.field(raw, self.mapping.name.as_ref());
        let name = (!name.is_empty()).then_some(name);

        Ok(Translation::Record(StationDraft {
            jurisdiction_id: None,
            internal_id: internal_id.to_string(),
            address: self.joined_address(raw, name),
            postcode: self.field(raw, self.mapping.postcode.as_ref()).to_string(),
            location: self.location(raw),
        }))
    }
}

impl Translator<DistrictDraft> for MappedTranslator {
    fn translate(&self, raw: &RawRecord) -> Result<Translation<DistrictDraft>, PipelineError> {
        Ok(Translation::Record(DistrictDraft {
            jurisdiction_id: None,
            internal_id: self.id(raw).map(str::to_string),
            name: self.field(raw, self.mapping.name.as_ref()).to_string(),
            area: None,
        }))
    }
}

impl Translator<AddressDraft> for MappedTranslator {
    fn translate(&self, raw: &RawRecord) -> Result<Translation<AddressDraft>, PipelineError> {
        let station_ref = self.field(raw, self.mapping.station_ref.as_ref());
        let address = self.joined_address(raw, None);

        // Une adresse sans bureau ou sans texte n'est pas exploitable
        if station_ref.is_empty() || address.is_empty() {
            return Ok(Translation::Skip);
        }

        let uprn = self.field(raw, self.mapping.uprn.as_ref());

        Ok(Translation::Record(AddressDraft {
            jurisdiction_id: None,
            address,
            postcode: self.field(raw, self.mapping.postcode.as_ref()).to_string(),
            station_ref: station_ref.to_string(),
            uprn: (!uprn.is_empty()).then(|| uprn.to_string()),
        }))
    }
}
