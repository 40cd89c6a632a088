//! Types de base du téléchargeur: taxonomie d'erreurs et support des plages.
//!
//! Invariants principaux:
//! - `DownloadError` couvre toutes les erreurs publiques du crate; les
//!   erreurs transitoires sont rejouées par la politique de reprise, les
//!   erreurs de validation sont retournées immédiatement par les
//!   constructeurs.
//! - `RangeSupport` est renseigné une seule fois par le sondage HEAD puis
//!   lu sans verrou par les workers.
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Alias de `Result` utilisé dans tout le module de téléchargement.
pub type Result<T> = std::result::Result<T, DownloadError>;

/// Erreurs publiques du téléchargeur.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Configuration invalide: options mutuellement exclusives ou writer absent.
    #[error("paramètre invalide: {field}: {message}")]
    InvalidParam {
        field: &'static str,
        message: &'static str,
    },

    #[error("URL source vide ou invalide: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("le serveur ne supporte pas les requêtes de plage")]
    RangeNotSupported,

    #[error("échec réseau: {0}")]
    Network(#[from] reqwest::Error),

    /// Statut hors 200/206/416 sur la récupération d'un segment; le
    /// segment reste ouvert et la tentative est rejouable.
    #[error("statut HTTP inattendu: {0}")]
    UnexpectedStatus(reqwest::StatusCode),

    #[error("erreur io: {0}")]
    Io(#[from] io::Error),

    #[error("aucun contenu dans les segments")]
    NoContent,

    #[error("impossible de déterminer le type de contenu")]
    InvalidContentType,

    #[error("durée totale maximale des reprises dépassée")]
    MaxTotalRetryDurationExceeded,

    #[error("téléchargement annulé")]
    Cancelled,

    /// Erreur collante déjà installée sur un segment; la retourner ne la
    /// désinstalle pas.
    #[error("{0}")]
    Sticky(Arc<DownloadError>),

    /// Une ou plusieurs erreurs de segments, collectées après la jointure
    /// de tous les workers.
    #[error("le téléchargement a rencontré les erreurs suivantes: [{}]", join_errors(.0))]
    Aggregate(Vec<DownloadError>),
}

fn join_errors(errors: &[DownloadError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Capacités de plage annoncées par le serveur d'origine.
///
/// `content_length` vaut 0 quand le serveur ne l'annonce pas; le plan de
/// segmentation traite alors le flux comme non segmenté.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSupport {
    pub supports_range_requests: bool,
    pub content_length: i64,
    pub accept_ranges: String,
}
