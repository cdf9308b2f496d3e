//! Erreurs du pipeline d'import
//!
//! Toute erreur fatale n'interrompt que l'import de la juridiction courante.
//! Un enregistrement ignoré par un traducteur n'est pas une erreur (voir
//! [`crate::translate::Translation::Skip`]), pas plus qu'une réconciliation
//! incomplète, qui est rapportée comme avertissement.

use pollsource::SourceError;
use thiserror::Error;

use crate::model::Entity;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source illisible ou mal formée, ou échec réseau
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Aucun répertoire local ne correspond à la juridiction
    #[error("No source directory found for {jurisdiction} (looked for {pattern})")]
    SourceNotFound {
        jurisdiction: String,
        pattern: String,
    },

    /// Configuration incohérente, détectée à la construction du pipeline
    #[error("Configuration error: {0}")]
    Config(String),

    /// Un traducteur a produit un enregistrement inexploitable
    #[error("Translation error ({entity}): {reason}")]
    Translation { entity: Entity, reason: String },

    #[error("Store error: {0:#}")]
    Store(anyhow::Error),

    #[error("Post-import hook failed: {0:#}")]
    Hook(anyhow::Error),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn translation(entity: Entity, reason: impl Into<String>) -> Self {
        Self::Translation {
            entity,
            reason: reason.into(),
        }
    }
}
