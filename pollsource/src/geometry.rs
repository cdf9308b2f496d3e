//! Normalisation des géométries de secteurs
//!
//! Toute géométrie de secteur est ramenée à un `MultiPolygon` 2D étiqueté avec
//! le SRID déclaré pour la juridiction. Il n'y a pas de détection de CRS par
//! enregistrement: le SRID vient de la configuration.

use geo::{Geometry, MultiPolygon, Polygon};

use crate::SourceError;

/// SRID par défaut: British National Grid
pub const DEFAULT_SRID: u32 = 27700;

/// SRID des coordonnées géographiques (KML, GeoJSON, géocodage)
pub const WGS84_SRID: u32 = 4326;

/// Emprise d'un secteur après normalisation
#[derive(Debug, Clone, PartialEq)]
pub struct Area {
    /// Toujours un multi-polygone, même pour une source à polygone unique
    pub geometry: MultiPolygon<f64>,
    /// SRID déclaré de la source
    pub srid: u32,
}

impl Area {
    pub fn polygon_count(&self) -> usize {
        self.geometry.0.len()
    }
}

/// Normalise une géométrie brute en emprise de secteur.
///
/// Les coordonnées Z sont tronquées avant conversion. Un `Polygon` devient un
/// `MultiPolygon` à un membre; une collection de polygones est aplatie.
///
/// # Errors
///
/// Retourne [`SourceError::Geometry`] si la géométrie n'est pas polygonale ou
/// n'est pas convertible.
pub fn normalize_area(raw: &geojson::Geometry, target_srid: u32) -> Result<Area, SourceError> {
    let geometry = to_geo(raw)?;
    let mut polygons = Vec::new();
    collect_polygons(geometry, &mut polygons)?;

    if polygons.is_empty() {
        return Err(SourceError::Geometry("empty polygonal geometry".into()));
    }

    Ok(Area {
        geometry: MultiPolygon::new(polygons),
        srid: target_srid,
    })
}

/// Convertit une géométrie GeoJSON en géométrie `geo`, Z supprimé
pub fn to_geo(raw: &geojson::Geometry) -> Result<Geometry<f64>, SourceError> {
    let mut value = raw.value.clone();
    strip_z(&mut value);

    Geometry::<f64>::try_from(value).map_err(|e| SourceError::Geometry(e.to_string()))
}

/// Tronque toutes les positions à deux dimensions
pub fn strip_z(value: &mut geojson::Value) {
    use geojson::Value;

    match value {
        Value::Point(position) => position.truncate(2),
        Value::MultiPoint(positions) | Value::LineString(positions) => {
            positions.iter_mut().for_each(|p| p.truncate(2))
        }
        Value::MultiLineString(lines) | Value::Polygon(lines) => lines
            .iter_mut()
            .flat_map(|line| line.iter_mut())
            .for_each(|p| p.truncate(2)),
        Value::MultiPolygon(polygons) => polygons
            .iter_mut()
            .flat_map(|rings| rings.iter_mut())
            .flat_map(|ring| ring.iter_mut())
            .for_each(|p| p.truncate(2)),
        Value::GeometryCollection(members) => {
            for member in members {
                strip_z(&mut member.value);
            }
        }
    }
}

fn collect_polygons(geometry: Geometry<f64>, out: &mut Vec<Polygon<f64>>) -> Result<(), SourceError> {
    match geometry {
        Geometry::Polygon(polygon) => out.push(polygon),
        Geometry::MultiPolygon(multi) => out.extend(multi.0),
        Geometry::GeometryCollection(collection) => {
            for member in collection.0 {
                collect_polygons(member, out)?;
            }
        }
        other => {
            return Err(SourceError::Geometry(format!(
                "expected polygonal geometry, got {}",
                geometry_kind(&other)
            )))
        }
    }
    Ok(())
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}
