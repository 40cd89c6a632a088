//! Coordination du téléchargement segmenté.
//!
//! Stratégie:
//! - Sonde le support des plages, puis planifie les segments d'après la
//!   taille annoncée.
//! - Déploie un worker par segment; chaque worker détient son segment
//!   (aucun état mutable partagé) et le rend à la jointure.
//! - Les erreurs passent par un canal borné à la taille du plan, drainé
//!   seulement après la jointure; la fusion n'a lieu que si aucun worker
//!   n'a signalé d'erreur.
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::download::downloader::Downloader;
use crate::download::retry::RetryPolicy;
use crate::download::segment::SegmentManager;
use crate::download::types::{DownloadError, Result};

/// Coordinateur de plus haut niveau: applique la politique de reprise au
/// téléchargement de chaque segment planifié puis déclenche la fusion.
pub struct DownloadManager {
    downloader: Downloader,
    retry_policy: Arc<RetryPolicy>,
    segment_size: u64,
    total_segments: usize,
}

impl DownloadManager {
    pub fn new(downloader: Downloader, retry_policy: RetryPolicy) -> Self {
        Self {
            downloader,
            retry_policy: Arc::new(retry_policy),
            segment_size: 0,
            total_segments: 0,
        }
    }

    /// Taille cible de chaque segment; exclusif avec
    /// [`DownloadManager::with_segment_count`].
    pub fn with_segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    pub fn with_segment_count(mut self, count: usize) -> Self {
        self.total_segments = count;
        self
    }

    /// Conduit le téléchargement de bout en bout et retourne le chemin du
    /// fichier final.
    pub async fn download(&mut self, token: &CancellationToken) -> Result<PathBuf> {
        self.downloader
            .probe_range(token, Downloader::inspect_range_headers)
            .await?;

        let mut sm = SegmentManager::new(
            Some(self.downloader.destination_dir().to_path_buf()),
            self.downloader.range_support().content_length,
            self.segment_size,
            self.total_segments,
        )?;

        let total = sm.total_segments();
        tracing::info!(
            url = %self.downloader.source_url(),
            segments = total,
            "démarrage du téléchargement"
        );

        // canal dimensionné au plan: la publication ne bloque jamais
        let (tx, mut rx) = mpsc::channel::<DownloadError>(total);
        let downloader = Arc::new(self.downloader.clone());

        let mut workers = JoinSet::new();
        for mut seg in sm.take_segments() {
            let downloader = Arc::clone(&downloader);
            let retry_policy = Arc::clone(&self.retry_policy);
            let token = token.clone();
            let tx = tx.clone();

            workers.spawn(async move {
                // déjà annulé: sortie silencieuse, sans erreur publiée
                if token.is_cancelled() {
                    return seg;
                }

                let id = seg.id();
                let result = retry_policy
                    .retry_with(&token, id, &*downloader, &mut seg, async |d, t, s| {
                        d.download_segment(t, s).await
                    })
                    .await;

                if let Err(e) = result {
                    tracing::warn!(segment = id, error = %e, "échec du segment");
                    let _ = tx.try_send(e);
                }
                seg
            });
        }
        drop(tx);

        let mut finished = Vec::with_capacity(total);
        let mut errors = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(seg) => finished.push(seg),
                Err(e) => errors.push(DownloadError::Io(io::Error::other(e))),
            }
        }
        sm.restore_segments(finished);

        // le canal est fermé: drainage complet après la jointure
        while let Some(e) = rx.recv().await {
            errors.push(e);
        }

        if !errors.is_empty() {
            tracing::warn!(failures = errors.len(), "téléchargement en échec, fusion ignorée");
            return Err(DownloadError::Aggregate(errors));
        }

        sm.merge_files(&self.downloader.file_name())
    }
}
