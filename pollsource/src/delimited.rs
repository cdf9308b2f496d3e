//! Adaptateur texte délimité (CSV, TSV)
//!
//! La première ligne est l'en-tête et définit les noms de champs (normalisés).
//! Le fichier est décodé avec l'encodage configuré avant le parsing.

use std::path::Path;

use encoding_rs::Encoding;
use tracing::{debug, warn};

use crate::record::normalize_field_name;
use crate::{RawRecord, SourceError};

/// Options de lecture d'un fichier délimité
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelimitedOptions {
    /// Séparateur de champs (`,` par défaut, `\t` pour les exports TSV)
    pub delimiter: u8,
    /// Label d'encodage WHATWG (`utf-8`, `latin-1`, `windows-1252`...)
    pub encoding: String,
}

impl Default for DelimitedOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            encoding: "utf-8".into(),
        }
    }
}

/// Lit un fichier délimité
pub fn read(path: &Path, options: &DelimitedOptions) -> Result<Vec<RawRecord>, SourceError> {
    let source_name = path.display().to_string();
    let encoding = resolve_encoding(&options.encoding)?;
    let bytes = std::fs::read(path)?;

    // decode() gère aussi le BOM éventuel
    let (text, used, had_errors) = encoding.decode(&bytes);
    if had_errors {
        warn!(
            source = %source_name,
            encoding = used.name(),
            "Malformed byte sequences replaced while decoding"
        );
    }

    parse_str(&text, options.delimiter, &source_name)
}

/// Parse un contenu délimité déjà décodé
pub fn parse_str(text: &str, delimiter: u8, source_name: &str) -> Result<Vec<RawRecord>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = reader.records();

    let header = match rows.next() {
        Some(row) => row.map_err(|e| SourceError::format(source_name, e.to_string()))?,
        None => return Ok(Vec::new()),
    };
    let names = header_names(header.iter(), source_name)?;

    let mut records = Vec::new();
    for (idx, row) in rows.enumerate() {
        let row = row.map_err(|e| SourceError::format(source_name, e.to_string()))?;

        if row.len() != names.len() {
            return Err(SourceError::format(
                source_name,
                format!(
                    "row {} has {} fields, header has {}",
                    idx + 2,
                    row.len(),
                    names.len()
                ),
            ));
        }

        let fields = names
            .iter()
            .cloned()
            .zip(row.iter().map(str::to_string))
            .collect();
        records.push(RawRecord::from_normalized(fields));
    }

    debug!(source = %source_name, rows = records.len(), "Parsed delimited source");
    Ok(records)
}

/// Normalise l'en-tête et refuse les noms dupliqués
fn header_names<'a>(
    header: impl Iterator<Item = &'a str>,
    source_name: &str,
) -> Result<Vec<String>, SourceError> {
    let mut names: Vec<String> = Vec::new();

    for raw in header {
        let name = normalize_field_name(raw);
        if names.contains(&name) {
            return Err(SourceError::format(
                source_name,
                format!("duplicate header after normalization: {raw:?} -> {name}"),
            ));
        }
        names.push(name);
    }

    Ok(names)
}

/// Résout un label d'encodage (tolère `latin-1`, `utf8`...)
pub fn resolve_encoding(label: &str) -> Result<&'static Encoding, SourceError> {
    let trimmed = label.trim();
    Encoding::for_label(trimmed.as_bytes())
        .or_else(|| Encoding::for_label(trimmed.replace('-', "").as_bytes()))
        .ok_or_else(|| SourceError::UnsupportedEncoding(label.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_and_rows() {
        let text = "Internal ID,Address,Post Code\nPS1,School,ab1 2cd\nPS2,Hall,AB1 3EF\n";
        let records = parse_str(text, b',', "stations.csv").unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("internal_id"), Some("PS1"));
        assert_eq!(records[0].get("post_code"), Some("ab1 2cd"));
        assert_eq!(records[1].get("address"), Some("Hall"));
        assert!(records[0].geometry().is_none());
    }

    #[test]
    fn test_tab_delimiter_and_quotes() {
        let text = "id\taddress\n1\t\"Flat 1, High St\"\n";
        let records = parse_str(text, b'\t', "x.tsv").unwrap();
        assert_eq!(records[0].text("address"), "Flat 1, High St");
    }

    #[test]
    fn test_duplicate_header_is_format_error() {
        let text = "Post Code,post_code\nA,B\n";
        let err = parse_str(text, b',', "dup.csv").unwrap_err();
        assert!(matches!(err, SourceError::Format { .. }));
    }

    #[test]
    fn test_ragged_row_is_format_error() {
        let text = "a,b\n1,2,3\n";
        let err = parse_str(text, b',', "ragged.csv").unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn test_empty_source() {
        assert!(parse_str("", b',', "empty.csv").unwrap().is_empty());
    }

    #[test]
    fn test_resolve_encoding() {
        assert_eq!(resolve_encoding("utf-8").unwrap(), encoding_rs::UTF_8);
        assert_eq!(resolve_encoding("latin-1").unwrap(), encoding_rs::WINDOWS_1252);
        assert!(resolve_encoding("klingon").is_err());
    }
}
