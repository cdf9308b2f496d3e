//! Adaptateur KML / KMZ
//!
//! Un enregistrement par `Placemark`: `name`, `description`, les champs
//! `ExtendedData` (`Data` et `SimpleData`) et la géométrie. Les coordonnées
//! sont gardées telles quelles (Z compris); la normalisation les tronque.

use std::path::Path;

use geojson::Value;
use roxmltree::{Document, Node};
use tracing::debug;

use crate::{archive, RawRecord, SourceError};

const GEOMETRY_TAGS: &[&str] = &["Point", "LineString", "LinearRing", "Polygon", "MultiGeometry"];

/// Lit un fichier KML, ou KMZ (décompressé vers un fichier temporaire le temps de la lecture)
pub fn read(path: &Path) -> Result<Vec<RawRecord>, SourceError> {
    let source_name = path.display().to_string();

    if archive::is_zip(path)? {
        let unpacked = archive::unpack_kml(path)?;
        let text = std::fs::read_to_string(unpacked.path())?;
        return parse_str(&text, &source_name);
    }

    let text = std::fs::read_to_string(path)?;
    parse_str(&text, &source_name)
}

/// Parse un document KML
pub fn parse_str(text: &str, source_name: &str) -> Result<Vec<RawRecord>, SourceError> {
    let doc = Document::parse(text).map_err(|e| SourceError::format(source_name, e.to_string()))?;

    let mut records = Vec::new();
    for placemark in doc.descendants().filter(|n| n.has_tag_name("Placemark")) {
        records.push(placemark_record(placemark, source_name)?);
    }

    debug!(source = %source_name, placemarks = records.len(), "Parsed KML");
    Ok(records)
}

fn placemark_record(placemark: Node, source_name: &str) -> Result<RawRecord, SourceError> {
    let mut pairs: Vec<(String, String)> = Vec::new();

    for child in placemark.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "name" | "description" => {
                pairs.push((child.tag_name().name().to_string(), node_text(child)));
            }
            "ExtendedData" => extended_data(child, &mut pairs),
            _ => {}
        }
    }

    let geometry = placemark
        .children()
        .find(|n| n.is_element() && GEOMETRY_TAGS.contains(&n.tag_name().name()))
        .map(|n| parse_geometry(n, source_name))
        .transpose()?
        .map(geojson::Geometry::new);

    RawRecord::from_pairs(source_name, pairs, geometry)
}

/// `<Data name="x"><value>v</value></Data>` et `<SimpleData name="x">v</SimpleData>`
fn extended_data(node: Node, pairs: &mut Vec<(String, String)>) {
    for item in node.descendants().filter(Node::is_element) {
        let Some(name) = item.attribute("name") else {
            continue;
        };
        match item.tag_name().name() {
            "Data" => {
                let value = item
                    .children()
                    .find(|n| n.has_tag_name("value"))
                    .map(node_text)
                    .unwrap_or_default();
                pairs.push((name.to_string(), value));
            }
            "SimpleData" => pairs.push((name.to_string(), node_text(item))),
            _ => {}
        }
    }
}

fn parse_geometry(node: Node, source_name: &str) -> Result<Value, SourceError> {
    match node.tag_name().name() {
        "Point" => {
            let mut positions = coordinates(node, source_name)?;
            if positions.is_empty() {
                return Err(SourceError::format(source_name, "Point without coordinates"));
            }
            Ok(Value::Point(positions.swap_remove(0)))
        }
        "LineString" | "LinearRing" => Ok(Value::LineString(coordinates(node, source_name)?)),
        "Polygon" => {
            let mut rings = Vec::new();
            for boundary in ["outerBoundaryIs", "innerBoundaryIs"] {
                for ring in node.children().filter(|n| n.has_tag_name(boundary)) {
                    rings.push(coordinates(ring, source_name)?);
                }
            }
            if rings.is_empty() {
                return Err(SourceError::format(source_name, "Polygon without outer boundary"));
            }
            Ok(Value::Polygon(rings))
        }
        "MultiGeometry" => {
            let members = node
                .children()
                .filter(|n| n.is_element() && GEOMETRY_TAGS.contains(&n.tag_name().name()))
                .map(|n| parse_geometry(n, source_name))
                .collect::<Result<Vec<_>, _>>()?;

            if !members.is_empty() && members.iter().all(|m| matches!(m, Value::Polygon(_))) {
                let polygons = members
                    .into_iter()
                    .filter_map(|m| match m {
                        Value::Polygon(rings) => Some(rings),
                        _ => None,
                    })
                    .collect();
                return Ok(Value::MultiPolygon(polygons));
            }

            Ok(Value::GeometryCollection(
                members.into_iter().map(geojson::Geometry::new).collect(),
            ))
        }
        other => Err(SourceError::format(source_name, format!("unsupported KML geometry {other}"))),
    }
}

/// Lit le premier `<coordinates>` sous le nœud: tuples `x,y[,z]` séparés par des blancs
fn coordinates(node: Node, source_name: &str) -> Result<Vec<Vec<f64>>, SourceError> {
    let Some(coords) = node.descendants().find(|n| n.has_tag_name("coordinates")) else {
        return Ok(Vec::new());
    };

    node_text(coords)
        .split_whitespace()
        .map(|tuple| {
            tuple
                .split(',')
                .filter(|part| !part.is_empty())
                .map(|part| {
                    part.parse::<f64>().map_err(|_| {
                        SourceError::format(source_name, format!("invalid coordinate {tuple:?}"))
                    })
                })
                .collect::<Result<Vec<f64>, _>>()
        })
        .collect()
}

fn node_text(node: Node) -> String {
    node.text().map(|t| t.trim().to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Folder>
      <Placemark>
        <name>North Ward</name>
        <description><![CDATA[District <b>AA</b>]]></description>
        <ExtendedData>
          <SchemaData schemaUrl="#districts">
            <SimpleData name="District Code">AA</SimpleData>
          </SchemaData>
          <Data name="Electorate"><value>1200</value></Data>
        </ExtendedData>
        <Polygon>
          <outerBoundaryIs>
            <LinearRing>
              <coordinates>
                -1.0,52.0,0 -0.9,52.0,0 -0.9,52.1,0 -1.0,52.0,0
              </coordinates>
            </LinearRing>
          </outerBoundaryIs>
        </Polygon>
      </Placemark>
      <Placemark>
        <name>Village Hall</name>
        <Point><coordinates>-1.5,53.2,12</coordinates></Point>
      </Placemark>
    </Folder>
  </Document>
</kml>"##;

    #[test]
    fn test_parse_placemarks() {
        let records = parse_str(SAMPLE, "districts.kml").unwrap();
        assert_eq!(records.len(), 2);

        let district = &records[0];
        assert_eq!(district.get("name"), Some("North Ward"));
        assert_eq!(district.get("district_code"), Some("AA"));
        assert_eq!(district.get("electorate"), Some("1200"));
        assert!(district.text("description").contains("<b>AA</b>"));

        match &district.geometry().unwrap().value {
            Value::Polygon(rings) => {
                assert_eq!(rings.len(), 1);
                assert_eq!(rings[0][0], vec![-1.0, 52.0, 0.0]);
            }
            other => panic!("expected polygon, got {other:?}"),
        }
    }

    #[test]
    fn test_point_placemark() {
        let records = parse_str(SAMPLE, "stations.kml").unwrap();
        let station = &records[1];
        assert_eq!(station.first_point(), Some(geo::Point::new(-1.5, 53.2)));
    }

    #[test]
    fn test_multigeometry_of_polygons() {
        let kml = r#"<kml><Placemark><name>X</name><MultiGeometry>
            <Polygon><outerBoundaryIs><LinearRing><coordinates>0,0 1,0 1,1 0,0</coordinates></LinearRing></outerBoundaryIs></Polygon>
            <Polygon><outerBoundaryIs><LinearRing><coordinates>2,2 3,2 3,3 2,2</coordinates></LinearRing></outerBoundaryIs></Polygon>
        </MultiGeometry></Placemark></kml>"#;
        let records = parse_str(kml, "x.kml").unwrap();
        assert!(matches!(
            records[0].geometry().unwrap().value,
            Value::MultiPolygon(ref polys) if polys.len() == 2
        ));
    }

    #[test]
    fn test_invalid_xml() {
        assert!(parse_str("<kml><Placemark>", "bad.kml").is_err());
    }

    #[test]
    fn test_invalid_coordinate() {
        let kml = "<kml><Placemark><Point><coordinates>a,b</coordinates></Point></Placemark></kml>";
        let err = parse_str(kml, "bad.kml").unwrap_err();
        assert!(err.to_string().contains("invalid coordinate"));
    }
}
