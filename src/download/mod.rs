//! Téléchargement segmenté et résumable via requêtes HTTP Range.
//!
//! Ce module regroupe:
//! - **types**: taxonomie d'erreurs et capacités de plage du serveur.
//! - **client**: adaptateur HTTP fin avec signature des requêtes.
//! - **segment**: segments, planification et fusion finale.
//! - **retry**: politique de reprise générique (délai croissant, gigue,
//!   plafond de durée).
//! - **downloader**: sondage des capacités et récupération par segment.
//! - **manager**: orchestration des workers et agrégation des erreurs.
//! - **utils**: E/S des fichiers de segments et reniflage du type de
//!   contenu.
//!
//! Conception:
//! - Chaque segment est écrit par un unique worker qui le détient; le
//!   client HTTP et la politique de reprise sont partagés en lecture seule.
//! - Les erreurs des workers passent par un canal borné à la taille du
//!   plan, drainé après la jointure; la fusion ne démarre que sur un plan
//!   entièrement réussi.
//! - L'annulation est observée à l'envoi, pendant la lecture des corps et
//!   pendant les attentes de reprise.
mod client;
mod downloader;
mod manager;
mod retry;
mod segment;
#[cfg(test)]
mod testutil;
mod types;
mod utils;

pub use client::{AuthScheme, Client};
pub use downloader::{Downloader, ProgressHook};
pub use manager::DownloadManager;
pub use retry::RetryPolicy;
pub use segment::{
    Segment, SegmentManager, SegmentParams, SegmentSink, DEFAULT_NUMBER_OF_SEGMENTS,
};
pub use types::{DownloadError, RangeSupport, Result};

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    pub logging: Option<LoggingConfig>,
    pub cleanup: Option<CleanupConfig>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub filter: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CleanupConfig {
    /// Supprimer les fichiers temporaires en cas d'erreur
    pub remove_on_error: Option<bool>,
}

/// Charge la configuration depuis rapide.toml
pub fn load_config() -> AppConfig {
    fs::read_to_string("rapide.toml")
        .ok()
        .and_then(|s| toml::from_str::<AppConfig>(&s).ok())
        .unwrap_or_default()
}

/// Initialise le logging basé sur la configuration
pub fn init_logging() {
    let config = load_config();
    let file_filter = config.logging.and_then(|l| l.filter);
    let env = std::env::var("RUST_LOG").ok();
    let effective = file_filter.or(env).unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(effective))
        .with_target(false)
        .compact()
        .init();
}

/// Nettoie les fichiers de segments laissés dans `dir` après un échec.
pub fn cleanup_temp_files_on_error(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with("segment-") && name.contains("-part-") {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "impossible de supprimer le fichier de segment");
            } else {
                tracing::debug!(path = %path.display(), "fichier de segment supprimé après erreur");
            }
        }
    }
}

/// API publique minimale: télécharge la ressource `url` dans le répertoire
/// `out_dir`. Cache l'ensemble des détails d'orchestration.
pub async fn download_to(url: &str, out_dir: impl Into<PathBuf>) -> anyhow::Result<PathBuf> {
    download_to_with(url, out_dir, None, 0, 0).await
}

/// Variante paramétrée: nom de fichier explicite et taille ou nombre de
/// segments (0 = non configuré; les fournir tous les deux est une erreur).
pub async fn download_to_with(
    url: &str,
    out_dir: impl Into<PathBuf>,
    file_name: Option<String>,
    segment_size: u64,
    segment_count: usize,
) -> anyhow::Result<PathBuf> {
    let out_dir = out_dir.into();

    let mut downloader = Downloader::new(&out_dir, url)?;
    if let Some(name) = file_name {
        downloader = downloader.with_file_name(name);
    }

    let mut dm = DownloadManager::new(downloader, RetryPolicy::default())
        .with_segment_size(segment_size)
        .with_segment_count(segment_count);

    match dm.download(&CancellationToken::new()).await {
        Ok(path) => Ok(path),
        Err(e) => {
            let config = load_config();
            if config
                .cleanup
                .and_then(|c| c.remove_on_error)
                .unwrap_or(false)
            {
                tracing::info!("nettoyage des fichiers temporaires après erreur");
                cleanup_temp_files_on_error(&out_dir);
            }
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_config_parses_logging_and_cleanup() {
        let config: AppConfig = toml::from_str(
            r#"
            [logging]
            filter = "debug"

            [cleanup]
            remove_on_error = true
            "#,
        )
        .unwrap();

        assert_eq!(config.logging.unwrap().filter.as_deref(), Some("debug"));
        assert_eq!(config.cleanup.unwrap().remove_on_error, Some(true));
    }

    #[test]
    fn test_config_defaults_to_empty_sections() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.logging.is_none());
        assert!(config.cleanup.is_none());
    }

    #[test]
    fn test_cleanup_only_removes_segment_files() {
        let dir = tempdir().unwrap();
        for name in ["segment-7-part-0", "segment-7-part-1", "autre.txt"] {
            let mut f = fs::File::create(dir.path().join(name)).unwrap();
            f.write_all(b"x").unwrap();
        }

        cleanup_temp_files_on_error(dir.path());

        assert!(!dir.path().join("segment-7-part-0").exists());
        assert!(!dir.path().join("segment-7-part-1").exists());
        assert!(dir.path().join("autre.txt").exists());
    }
}
