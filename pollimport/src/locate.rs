//! Résolution du répertoire source d'une juridiction
//!
//! Convention: un répertoire par juridiction, nommé `<jurisdiction_id>-*`,
//! sous la racine de données publique ou privée.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::JurisdictionConfig;
use crate::error::PipelineError;

/// Racines de données
#[derive(Debug, Clone, Default)]
pub struct DataRoots {
    pub data: PathBuf,
    /// Racine des juridictions marquées `private`
    pub private: Option<PathBuf>,
}

impl DataRoots {
    pub fn new(data: impl Into<PathBuf>) -> Self {
        Self {
            data: data.into(),
            private: None,
        }
    }

    pub fn with_private(mut self, private: impl Into<PathBuf>) -> Self {
        self.private = Some(private.into());
        self
    }

    fn root_for(&self, config: &JurisdictionConfig) -> Result<&Path, PipelineError> {
        if !config.private {
            return Ok(&self.data);
        }
        self.private.as_deref().ok_or_else(|| {
            PipelineError::config(format!(
                "{} is private but no private data root is configured",
                config.jurisdiction_id
            ))
        })
    }
}

/// Répertoire source de la juridiction.
///
/// `Ok(None)` quand toutes les sources sont distantes. Sinon `base_folder_path`
/// s'il est donné (relatif à la racine), ou le premier répertoire, par ordre
/// alphabétique, correspondant à `<jurisdiction_id>-*`.
pub fn locate(config: &JurisdictionConfig, roots: &DataRoots) -> Result<Option<PathBuf>, PipelineError> {
    if !config.local_files {
        debug!(jurisdiction = %config.jurisdiction_id, "Remote sources, nothing to locate");
        return Ok(None);
    }

    let root = roots.root_for(config)?;

    if let Some(base) = &config.base_folder_path {
        let dir = if base.is_absolute() {
            base.clone()
        } else {
            root.join(base)
        };
        if !dir.is_dir() {
            return Err(PipelineError::SourceNotFound {
                jurisdiction: config.jurisdiction_id.clone(),
                pattern: dir.display().to_string(),
            });
        }
        info!(jurisdiction = %config.jurisdiction_id, dir = %dir.display(), "Source directory");
        return Ok(Some(dir));
    }

    let pattern = format!(
        "{}/{}-*",
        glob::Pattern::escape(&root.to_string_lossy()),
        glob::Pattern::escape(&config.jurisdiction_id)
    );
    let not_found = || PipelineError::SourceNotFound {
        jurisdiction: config.jurisdiction_id.clone(),
        pattern: pattern.clone(),
    };

    let mut matches: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|_| not_found())?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_dir())
        .collect();
    matches.sort();

    if matches.len() > 1 {
        debug!(
            jurisdiction = %config.jurisdiction_id,
            candidates = matches.len(),
            "Several source directories, using the first"
        );
    }

    let dir = matches.into_iter().next().ok_or_else(not_found)?;
    info!(jurisdiction = %config.jurisdiction_id, dir = %dir.display(), "Source directory");
    Ok(Some(dir))
}
