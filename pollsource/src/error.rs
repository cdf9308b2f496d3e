//! Types d'erreurs pour le crate pollsource

use thiserror::Error;

/// Erreurs pouvant survenir lors de la lecture d'une source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Erreur d'I/O lors de la lecture du fichier
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fichier mal formé ou ambigu (en-tête dupliqué, ligne incomplète, XML/JSON invalide)
    #[error("Format error in {source_name}: {reason}")]
    Format { source_name: String, reason: String },

    /// Encodage non supporté
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// Échec du téléchargement d'une source distante
    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// Géométrie illisible ou non polygonale
    #[error("Invalid geometry: {0}")]
    Geometry(String),
}

impl SourceError {
    /// Crée une erreur de format avec contexte
    pub fn format(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Format {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Crée une erreur réseau
    pub fn network(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Vrai pour les erreurs de format (fichier lisible mais contenu inexploitable)
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format { .. } | Self::Geometry(_))
    }
}
