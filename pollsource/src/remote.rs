//! Adaptateur distant: télécharge vers un fichier temporaire puis délègue
//!
//! Aucune nouvelle tentative automatique: un échec réseau est fatal pour la
//! juridiction en cours, la relance est du ressort de l'appelant.

use std::io::Write;

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::{Format, RawRecord, SourceError};

/// Télécharge une ressource dans un fichier temporaire
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    suffix: &str,
) -> Result<NamedTempFile, SourceError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SourceError::network(url, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::network(url, format!("HTTP status {status}")));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| SourceError::network(url, e.to_string()))?;

    let mut tmp = tempfile::Builder::new()
        .prefix("pollsource-")
        .suffix(suffix)
        .tempfile()?;
    tmp.write_all(&body)?;
    tmp.flush()?;

    debug!(url = url, bytes = body.len(), path = %tmp.path().display(), "Downloaded source");
    Ok(tmp)
}

/// Télécharge puis lit la ressource avec l'adaptateur du format.
///
/// Le fichier temporaire est détruit en sortie, que la lecture réussisse ou non.
pub async fn open(
    client: &reqwest::Client,
    url: &str,
    format: &Format,
) -> Result<Vec<RawRecord>, SourceError> {
    if matches!(format, Format::Shapefile) {
        return Err(SourceError::format(
            url,
            "shapefiles need their .dbf sidecar and cannot be fetched from a single URL",
        ));
    }

    info!(url = url, format = format.name(), "Fetching remote source");
    let tmp = fetch(client, url, format.file_suffix()).await?;
    crate::open(format, tmp.path())
}
