//! # pollsource
//!
//! Adaptateurs de formats pour les données électorales publiées par les
//! collectivités: bureaux de vote, secteurs et adresses.
//!
//! ## Formats
//!
//! - Texte délimité (CSV/TSV) avec séparateur et encodage configurables
//! - Shapefile (attributs DBF + géométrie)
//! - KML et KMZ (décompression transparente vers un fichier temporaire)
//! - GeoJSON (`FeatureCollection`)
//! - Ressources distantes (téléchargées puis lues avec l'un des formats ci-dessus)
//!
//! Chaque adaptateur produit des [`RawRecord`] dont les noms de champs sont
//! normalisés, et le module [`geometry`] ramène les emprises en `MultiPolygon` 2D.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pollsource::{open, DelimitedOptions, Format};
//! use std::path::Path;
//!
//! let format = Format::Delimited(DelimitedOptions { delimiter: b'\t', ..Default::default() });
//! let records = open(&format, Path::new("Democracy_Club__06May2021.tsv"))?;
//! for record in &records {
//!     println!("{}", record.text("polling_place_id"));
//! }
//! ```

pub mod archive;
pub mod delimited;
pub mod error;
pub mod features;
pub mod geometry;
pub mod kml;
pub mod record;
pub mod remote;
pub mod shp;

pub use delimited::DelimitedOptions;
pub use error::SourceError;
pub use geometry::{normalize_area, Area, DEFAULT_SRID, WGS84_SRID};
pub use record::{normalize_field_name, RawRecord};

use std::path::Path;

/// Format d'une source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Format {
    Delimited(DelimitedOptions),
    Shapefile,
    /// KML ou KMZ (détecté au contenu)
    Kml,
    GeoJson,
}

impl Format {
    pub fn name(&self) -> &'static str {
        match self {
            Format::Delimited(_) => "delimited",
            Format::Shapefile => "shapefile",
            Format::Kml => "kml",
            Format::GeoJson => "geojson",
        }
    }

    /// Suffixe du fichier temporaire pour une source téléchargée
    pub fn file_suffix(&self) -> &'static str {
        match self {
            Format::Delimited(options) if options.delimiter == b'\t' => ".tsv",
            Format::Delimited(_) => ".csv",
            Format::Shapefile => ".shp",
            Format::Kml => ".kml",
            Format::GeoJson => ".geojson",
        }
    }
}

/// Ouvre une source locale et retourne ses enregistrements.
///
/// # Errors
///
/// Retourne [`SourceError`] si le fichier est illisible ou mal formé.
pub fn open(format: &Format, path: &Path) -> Result<Vec<RawRecord>, SourceError> {
    match format {
        Format::Delimited(options) => delimited::read(path, options),
        Format::Shapefile => shp::read(path),
        Format::Kml => kml::read(path),
        Format::GeoJson => features::read(path),
    }
}
