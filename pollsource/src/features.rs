//! Adaptateur GeoJSON: un enregistrement par élément du tableau `features`

use std::path::Path;

use geojson::{feature::Id, GeoJson};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{RawRecord, SourceError};

/// Lit un fichier GeoJSON (`FeatureCollection`)
pub fn read(path: &Path) -> Result<Vec<RawRecord>, SourceError> {
    let source_name = path.display().to_string();
    let text = std::fs::read_to_string(path)?;
    parse_str(&text, &source_name)
}

/// Parse un document GeoJSON
pub fn parse_str(text: &str, source_name: &str) -> Result<Vec<RawRecord>, SourceError> {
    let geojson: GeoJson = text
        .parse()
        .map_err(|e: geojson::Error| SourceError::format(source_name, e.to_string()))?;

    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(SourceError::format(source_name, "no features array in GeoJSON document"));
    };

    let mut records = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let mut pairs: Vec<(String, String)> = feature
            .properties
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, json_to_string(value)))
            .collect();

        // L'identifiant de feature est exposé s'il n'est pas déjà dans les propriétés
        if let Some(id) = feature.id {
            if !pairs.iter().any(|(key, _)| key.eq_ignore_ascii_case("id")) {
                let id = match id {
                    Id::String(s) => s,
                    Id::Number(n) => n.to_string(),
                };
                pairs.push(("id".to_string(), id));
            }
        }

        records.push(RawRecord::from_pairs(source_name, pairs, feature.geometry)?);
    }

    debug!(source = %source_name, features = records.len(), "Parsed GeoJSON");
    Ok(records)
}

fn json_to_string(value: JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s,
        other => other.to_string(),
    }
}
