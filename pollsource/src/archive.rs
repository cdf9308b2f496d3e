//! Extraction des archives KMZ vers un fichier temporaire

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use zip::ZipArchive;

use crate::SourceError;

/// Signature locale d'une entrée zip (`PK\x03\x04`)
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

/// Vrai si le fichier est une archive zip (KMZ), quelle que soit son extension
pub fn is_zip(path: &Path) -> Result<bool, SourceError> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 4];
    let read = file.read(&mut magic)?;
    Ok(read == magic.len() && magic == ZIP_MAGIC)
}

/// Extrait le document KML d'une archive KMZ.
///
/// `doc.kml` est prioritaire, sinon la première entrée `.kml`. Le fichier
/// temporaire retourné est supprimé à sa destruction, y compris si la lecture
/// qui suit échoue.
pub fn unpack_kml(path: &Path) -> Result<NamedTempFile, SourceError> {
    let source_name = path.display().to_string();
    let file = File::open(path)?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| SourceError::format(&source_name, e.to_string()))?;

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let entry_name = names
        .iter()
        .find(|name| name.eq_ignore_ascii_case("doc.kml"))
        .or_else(|| names.iter().find(|name| name.to_lowercase().ends_with(".kml")))
        .cloned()
        .ok_or_else(|| SourceError::format(&source_name, "no .kml document in archive"))?;

    let mut entry = archive
        .by_name(&entry_name)
        .map_err(|e| SourceError::format(&source_name, e.to_string()))?;

    let mut tmp = tempfile::Builder::new()
        .prefix("pollsource-")
        .suffix(".kml")
        .tempfile()?;
    std::io::copy(&mut entry, &mut tmp)?;
    tmp.flush()?;

    Ok(tmp)
}
