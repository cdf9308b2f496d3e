//! Export GeoJSON des bureaux et des secteurs (écriture en flux avec geozero)

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use geo::Geometry;
use geozero::geojson::GeoJsonWriter;
use geozero::GeozeroGeometry;

use crate::model::{CanonicalDistrict, CanonicalStation};

/// Exporte les bureaux de vote (points, `null` si sans position)
pub fn export_stations(stations: &[CanonicalStation], output_path: &Path) -> Result<usize> {
    let srids: Vec<u32> = stations
        .iter()
        .filter_map(|s| s.location.map(|l| l.srid))
        .collect();

    write_collection(output_path, common_srid(&srids), stations, |writer, station| {
        let geometry = station.location.map(|l| Geometry::Point(l.point));
        write_feature(
            writer,
            &station.internal_id,
            geometry.as_ref(),
            &[
                ("jurisdiction_id", &station.jurisdiction_id),
                ("address", &station.address),
                ("postcode", &station.postcode),
            ],
        )
    })
}

/// Exporte les secteurs (multi-polygones)
pub fn export_districts(districts: &[CanonicalDistrict], output_path: &Path) -> Result<usize> {
    let srids: Vec<u32> = districts.iter().map(|d| d.area.srid).collect();

    write_collection(output_path, common_srid(&srids), districts, |writer, district| {
        let geometry = Geometry::MultiPolygon(district.area.geometry.clone());
        write_feature(
            writer,
            &district.internal_id,
            Some(&geometry),
            &[
                ("jurisdiction_id", &district.jurisdiction_id),
                ("name", &district.name),
            ],
        )
    })
}

/// SRID partagé par toutes les géométries, s'il y en a un seul
fn common_srid(srids: &[u32]) -> Option<u32> {
    let first = *srids.first()?;
    srids.iter().all(|s| *s == first).then_some(first)
}

fn write_collection<T, F>(
    output_path: &Path,
    srid: Option<u32>,
    items: &[T],
    mut write_item: F,
) -> Result<usize>
where
    F: FnMut(&mut BufWriter<File>, &T) -> Result<()>,
{
    let file = File::create(output_path)
        .context(format!("Failed to create file: {}", output_path.display()))?;
    let mut writer = BufWriter::new(file);

    match srid {
        Some(srid) => write!(
            writer,
            r#"{{"type":"FeatureCollection","crs":{{"type":"name","properties":{{"name":"urn:ogc:def:crs:EPSG::{srid}"}}}},"features":["#
        )?,
        None => write!(writer, r#"{{"type":"FeatureCollection","features":["#)?,
    }

    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(writer, ",")?;
        }
        write_item(&mut writer, item)?;
    }

    write!(writer, "]}}")?;
    writer.flush()?;

    Ok(items.len())
}

fn write_feature<W: Write>(
    writer: &mut W,
    id: &str,
    geometry: Option<&Geometry<f64>>,
    properties: &[(&str, &String)],
) -> Result<()> {
    let id = serde_json::to_string(id)?;
    write!(writer, r#"{{"type":"Feature","id":{id},"geometry":"#)?;

    match geometry {
        Some(geometry) => {
            let mut geom_buf = Vec::new();
            let mut geom_writer = GeoJsonWriter::new(&mut geom_buf);
            geometry.process_geom(&mut geom_writer)?;
            writer.write_all(&geom_buf)?;
        }
        None => write!(writer, "null")?,
    }

    write!(writer, r#","properties":{{"internal_id":{id}"#)?;
    for (key, value) in properties {
        write!(writer, r#","{key}":{}"#, serde_json::to_string(value)?)?;
    }
    write!(writer, "}}}}")?;

    Ok(())
}
