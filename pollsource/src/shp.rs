//! Adaptateur shapefile (.shp + .dbf)
//!
//! Un enregistrement par forme: attributs DBF et géométrie complète. Pour les
//! bureaux de vote, le premier sommet sert de position (voir [`RawRecord::first_point`]).

use std::path::{Path, PathBuf};

use shapefile::dbase::FieldValue;
use shapefile::{Reader, Shape};
use tracing::debug;

use crate::{RawRecord, SourceError};

/// Lit un shapefile. Le nom peut être donné sans extension (`polling_districts`).
pub fn read(path: &Path) -> Result<Vec<RawRecord>, SourceError> {
    let path = shp_path(path);
    let source_name = path.display().to_string();

    let mut reader = Reader::from_path(&path)
        .map_err(|e| SourceError::format(&source_name, e.to_string()))?;

    let mut records = Vec::new();
    for item in reader.iter_shapes_and_records() {
        let (shape, record) = item.map_err(|e| SourceError::format(&source_name, e.to_string()))?;
        let geometry = shape_geometry(shape)?;

        let mut pairs: Vec<(String, String)> = record
            .into_iter()
            .map(|(name, value)| (name, field_value_to_string(value)))
            .collect();
        // Les attributs DBF arrivent dans un ordre non garanti
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        records.push(RawRecord::from_pairs(&source_name, pairs, geometry)?);
    }

    debug!(source = %source_name, shapes = records.len(), "Parsed shapefile");
    Ok(records)
}

/// Ajoute `.shp` si le chemin n'a pas d'extension
fn shp_path(path: &Path) -> PathBuf {
    match path.extension() {
        Some(_) => path.to_path_buf(),
        None => path.with_extension("shp"),
    }
}

fn shape_geometry(shape: Shape) -> Result<Option<geojson::Geometry>, SourceError> {
    if matches!(shape, Shape::NullShape) {
        return Ok(None);
    }

    let geometry = geo::Geometry::<f64>::try_from(shape)
        .map_err(|e| SourceError::Geometry(format!("{e:?}")))?;

    Ok(Some(geojson::Geometry::new(geojson::Value::from(&geometry))))
}

/// Convertit une valeur DBF en texte, comme l'exposerait un export CSV
fn field_value_to_string(value: FieldValue) -> String {
    match value {
        FieldValue::Character(text) => text.map(|s| s.trim_end().to_string()).unwrap_or_default(),
        FieldValue::Memo(text) => text,
        FieldValue::Numeric(number) => number.map(format_number).unwrap_or_default(),
        FieldValue::Float(number) => number.map(|n| format_number(n as f64)).unwrap_or_default(),
        FieldValue::Double(number) => format_number(number),
        FieldValue::Currency(number) => format_number(number),
        FieldValue::Integer(number) => number.to_string(),
        FieldValue::Logical(flag) => flag.map(|b| b.to_string()).unwrap_or_default(),
        other => format!("{other:?}"),
    }
}

/// Les identifiants numériques (`59.0`) sont rendus sans partie décimale (`59`)
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shp_path() {
        assert_eq!(shp_path(Path::new("data/districts")), PathBuf::from("data/districts.shp"));
        assert_eq!(shp_path(Path::new("data/districts.shp")), PathBuf::from("data/districts.shp"));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(59.0), "59");
        assert_eq!(format_number(441313.5), "441313.5");
        assert_eq!(format_number(-3.0), "-3");
    }

    #[test]
    fn test_field_value_to_string() {
        assert_eq!(
            field_value_to_string(FieldValue::Character(Some("Hall   ".into()))),
            "Hall"
        );
        assert_eq!(field_value_to_string(FieldValue::Character(None)), "");
        assert_eq!(field_value_to_string(FieldValue::Numeric(Some(10.0))), "10");
        assert_eq!(field_value_to_string(FieldValue::Integer(7)), "7");
    }

    #[test]
    fn test_missing_shapefile() {
        assert!(read(Path::new("does/not/exist")).is_err());
    }
}
