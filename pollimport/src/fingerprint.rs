//! Empreintes blake3
//!
//! - empreinte d'un enregistrement brut sur une sélection de champs, pour le
//!   dédoublonnage « premier vu gagne » pendant la traduction
//! - hash stable de géométrie, pour le condensé de contenu du store mémoire

use blake3::Hasher;
use geo::{Coord, LineString, MultiPolygon, Point};
use pollsource::{normalize_field_name, RawRecord};

/// Empreinte d'un enregistrement brut sur les champs donnés (dans l'ordre donné).
///
/// Les noms de champs sont normalisés comme ceux des adaptateurs.
pub fn record_fingerprint(raw: &RawRecord, fields: &[String]) -> [u8; 32] {
    let mut hasher = Hasher::new();
    for field in fields {
        let field = normalize_field_name(field);
        hasher.update(field.as_bytes());
        hasher.update(&[0x1f]);
        hasher.update(raw.text(&field).trim().as_bytes());
        hasher.update(&[0x1e]);
    }
    *hasher.finalize().as_bytes()
}

/// Hash d'un point, arrondi au micro-degré / micro-mètre
pub fn point_hash(hasher: &mut Hasher, point: &Point<f64>) {
    hasher.update(b"POINT");
    hash_coord(hasher, point.0);
}

/// Hash d'un multi-polygone, indépendant du sommet de départ de chaque anneau
pub fn area_hash(hasher: &mut Hasher, area: &MultiPolygon<f64>) {
    hasher.update(b"MULTIPOLYGON");
    for poly in area.0.iter() {
        hasher.update(b"EXT");
        hash_ring_normalized(hasher, poly.exterior());
        for interior in poly.interiors() {
            hasher.update(b"INT");
            hash_ring_normalized(hasher, interior);
        }
    }
}

/// Hash un anneau en commençant au sommet lexicographiquement le plus petit
fn hash_ring_normalized(hasher: &mut Hasher, ring: &LineString<f64>) {
    // Le dernier point d'un anneau fermé répète le premier
    let len = if ring.0.len() > 1 && ring.0.first() == ring.0.last() {
        ring.0.len() - 1
    } else {
        ring.0.len()
    };

    if len == 0 {
        return;
    }

    let min_idx = (0..len)
        .min_by(|&a, &b| {
            let (ca, cb) = (&ring.0[a], &ring.0[b]);
            ca.x.total_cmp(&cb.x).then_with(|| ca.y.total_cmp(&cb.y))
        })
        .unwrap_or(0);

    for i in 0..len {
        hash_coord(hasher, ring.0[(min_idx + i) % len]);
    }
}

fn hash_coord(hasher: &mut Hasher, coord: Coord<f64>) {
    let x = (coord.x * 1_000_000.0).round() as i64;
    let y = (coord.y * 1_000_000.0).round() as i64;
    hasher.update(&x.to_le_bytes());
    hasher.update(&y.to_le_bytes());
}
