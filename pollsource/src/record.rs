//! Enregistrement brut produit par les adaptateurs

use std::collections::HashSet;

use geo::{CoordsIter, Point};

use crate::SourceError;

/// Un enregistrement source: champs normalisés (ordonnés) et géométrie optionnelle.
///
/// Les noms de champs sont toujours normalisés via [`normalize_field_name`],
/// ce qui permet aux traducteurs de s'appuyer sur des identifiants stables
/// (`"Post Code"` et `"post-code"` deviennent tous deux `post_code`).
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    fields: Vec<(String, String)>,
    geometry: Option<geojson::Geometry>,
}

impl RawRecord {
    /// Construit un enregistrement depuis des paires (nom brut, valeur).
    ///
    /// # Errors
    ///
    /// Retourne une erreur de format si deux noms se normalisent vers le même identifiant.
    pub fn from_pairs<I, K, V>(
        source_name: &str,
        pairs: I,
        geometry: Option<geojson::Geometry>,
    ) -> Result<Self, SourceError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut fields = Vec::new();

        for (key, value) in pairs {
            let name = normalize_field_name(key.as_ref());
            if !seen.insert(name.clone()) {
                return Err(SourceError::format(
                    source_name,
                    format!("duplicate field name after normalization: {name}"),
                ));
            }
            fields.push((name, value.into()));
        }

        Ok(Self { fields, geometry })
    }

    /// Construit un enregistrement depuis des noms déjà normalisés et uniques
    pub(crate) fn from_normalized(fields: Vec<(String, String)>) -> Self {
        Self {
            fields,
            geometry: None,
        }
    }

    /// Valeur d'un champ, si présent
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Valeur d'un champ, chaîne vide si absent
    pub fn text(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    /// Itère les champs dans l'ordre source
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Noms des champs dans l'ordre source
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Géométrie brute telle que lue dans la source (coordonnées Z incluses)
    pub fn geometry(&self) -> Option<&geojson::Geometry> {
        self.geometry.as_ref()
    }

    /// Premier sommet de la géométrie, utilisé comme position des bureaux de vote
    pub fn first_point(&self) -> Option<Point<f64>> {
        let raw = self.geometry.as_ref()?;
        let geometry = crate::geometry::to_geo(raw).ok()?;
        let first = geometry.coords_iter().next().map(Point::from);
        first
    }

    /// Retourne une copie avec un champ remplacé (ou ajouté s'il n'existe pas).
    ///
    /// L'enregistrement d'origine n'est jamais modifié.
    pub fn with_field(&self, name: &str, value: impl Into<String>) -> Self {
        let name = normalize_field_name(name);
        let value = value.into();
        let mut fields = self.fields.clone();

        match fields.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => fields.push((name, value)),
        }

        Self {
            fields,
            geometry: self.geometry.clone(),
        }
    }
}

/// Normalise un nom de champ source.
///
/// Minuscules, parenthèses supprimées, toute suite de ponctuation ou d'espaces
/// réduite à un seul `_`, sans `_` en début ni en fin.
pub fn normalize_field_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;

    for c in raw.trim().chars() {
        if c == '(' || c == ')' {
            continue;
        }
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_field_name() {
        assert_eq!(normalize_field_name("Internal ID"), "internal_id");
        assert_eq!(normalize_field_name(" Post Code "), "post_code");
        assert_eq!(normalize_field_name("polling-place.name"), "polling_place_name");
        assert_eq!(normalize_field_name("Easting (m)"), "easting_m");
        assert_eq!(normalize_field_name("A  --  B"), "a_b");
        assert_eq!(normalize_field_name("__uprn__"), "uprn");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = RawRecord::from_pairs(
            "stations.csv",
            vec![("Post Code", "AB1"), ("post-code", "AB2")],
            None,
        );
        let err = result.unwrap_err();
        assert!(err.is_format());
        assert!(err.to_string().contains("post_code"));
    }

    #[test]
    fn test_with_field_replaces_without_mutating() {
        let record =
            RawRecord::from_pairs("x", vec![("id", "1"), ("postcode", "AB1 2CD")], None).unwrap();
        let patched = record.with_field("postcode", "ZZ9 9ZZ");

        assert_eq!(record.text("postcode"), "AB1 2CD");
        assert_eq!(patched.text("postcode"), "ZZ9 9ZZ");
        assert_eq!(patched.len(), 2);

        let extended = record.with_field("Easting", "1");
        assert_eq!(extended.get("easting"), Some("1"));
        assert_eq!(extended.len(), 3);
    }

    #[test]
    fn test_first_point() {
        let geometry = geojson::Geometry::new(geojson::Value::LineString(vec![
            vec![1.0, 2.0, 9.0],
            vec![3.0, 4.0, 9.0],
        ]));
        let record = RawRecord::from_pairs("x", Vec::<(&str, &str)>::new(), Some(geometry)).unwrap();
        assert_eq!(record.first_point(), Some(Point::new(1.0, 2.0)));
    }
}
