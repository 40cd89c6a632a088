//! Téléchargeur: sondage des capacités de plage du serveur d'origine et
//! récupération d'un segment à la fois vers son puits.
//!
//! Routage des statuts de `download_segment`:
//! - 200: le serveur envoie le fichier entier; copie puis `done`.
//! - 206: le serveur envoie la tranche demandée; copie, `done` reste bas
//!   (la fusion lit le contenu des fichiers, pas le drapeau).
//! - 416: plus de données pour cette plage; `done` sans octets.
//! - autre: segment laissé ouvert et erreur de statut remontée pour que la
//!   politique de reprise rejoue la tentative.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH};
use reqwest::{Response, StatusCode};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::download::client::Client;
use crate::download::segment::Segment;
use crate::download::types::{DownloadError, RangeSupport, Result};

/// Rappel de progression: `(id de segment, octets reçus depuis le début de
/// la tentative)`. L'affichage est laissé à l'appelant.
pub type ProgressHook = Arc<dyn Fn(usize, u64) + Send + Sync>;

/// Récupère un fichier distant segment par segment. Partagé en lecture
/// seule entre les workers une fois le sondage effectué.
#[derive(Clone)]
pub struct Downloader {
    source_url: Url,
    destination_dir: PathBuf,
    file_name: Option<String>,
    client: Client,
    range_support: RangeSupport,
    progress: Option<ProgressHook>,
}

impl Downloader {
    pub fn new(destination_dir: impl Into<PathBuf>, source_url: &str) -> Result<Self> {
        let source_url = Url::parse(source_url)?;
        Ok(Self {
            source_url,
            destination_dir: destination_dir.into(),
            file_name: None,
            client: Client::new()?,
            range_support: RangeSupport::default(),
            progress: None,
        })
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_progress_hook(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }

    pub fn source_url(&self) -> &Url {
        &self.source_url
    }

    pub fn destination_dir(&self) -> &Path {
        &self.destination_dir
    }

    pub fn range_support(&self) -> &RangeSupport {
        &self.range_support
    }

    /// Nom du fichier final: nom configuré, sinon dernier composant non
    /// vide du chemin de l'URL, sinon `download`.
    pub fn file_name(&self) -> String {
        if let Some(name) = self.file_name.as_deref() {
            if !name.is_empty() {
                return name.to_string();
            }
        }

        self.source_url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string)
            .unwrap_or_else(|| "download".to_string())
    }

    /// Sonde le serveur d'origine par HEAD. Un statut autre que 200 vaut
    /// absence de support; sur 200, le crochet `inspect` examine la réponse
    /// et le `RangeSupport` qu'il retourne est installé par le Downloader
    /// lui-même (aucun état partagé avec le crochet).
    pub async fn probe_range<F>(&mut self, token: &CancellationToken, inspect: F) -> Result<()>
    where
        F: FnOnce(&Response) -> Option<RangeSupport>,
    {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        tracing::debug!(url = %self.source_url, "sondage du support des plages");
        let resp = self.client.head(&self.source_url).await?;

        if resp.status() != StatusCode::OK {
            tracing::debug!(status = %resp.status(), "sondage refusé par le serveur");
            return Err(DownloadError::RangeNotSupported);
        }

        if let Some(support) = inspect(&resp) {
            tracing::debug!(
                content_length = support.content_length,
                accept_ranges = %support.accept_ranges,
                "support des plages détecté"
            );
            self.range_support = support;
        }

        Ok(())
    }

    /// Crochet d'inspection par défaut: sans `Accept-Ranges` ni
    /// `Content-Length` strictement positif, le support reste indéterminé.
    pub fn inspect_range_headers(resp: &Response) -> Option<RangeSupport> {
        let accept_ranges = resp
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let content_length = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);

        if accept_ranges.is_empty() && content_length <= 0 {
            return None;
        }

        Some(RangeSupport {
            supports_range_requests: true,
            content_length,
            accept_ranges,
        })
    }

    /// Récupère un segment dans son puits. L'annulation est observée avant
    /// l'envoi puis à chaque morceau du corps.
    pub async fn download_segment(
        &self,
        token: &CancellationToken,
        seg: &mut Segment,
    ) -> Result<()> {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let range = self
            .range_support
            .supports_range_requests
            .then(|| (seg.start(), seg.end()));

        tracing::debug!(
            segment = seg.id(),
            start = seg.start(),
            end = seg.end(),
            ranged = range.is_some(),
            "récupération du segment"
        );

        let resp = self.client.get(&self.source_url, range).await?;
        let status = resp.status();

        // le serveur envoie le fichier entier
        if status == StatusCode::OK {
            self.copy_body(token, resp, seg).await?;
            return seg.set_done(true);
        }

        // la tranche demandée; d'autres segments du même fichier peuvent
        // encore être en cours
        if status == StatusCode::PARTIAL_CONTENT {
            return self.copy_body(token, resp, seg).await;
        }

        // le serveur n'a plus de données pour cette plage
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return seg.set_done(true);
        }

        tracing::debug!(segment = seg.id(), status = %status, "statut inattendu");
        seg.set_done(false)?;
        match resp.error_for_status() {
            // reqwest ne signale que les 4xx/5xx; tout autre statut hors
            // 200/206/416 doit aussi laisser le segment rejouable
            Ok(_) => Err(DownloadError::UnexpectedStatus(status)),
            Err(e) => Err(DownloadError::Network(e)),
        }
    }

    /// Copie le corps de la réponse dans le segment par son chemin d'append,
    /// puis vide le tampon pour que le fichier sur disque fasse foi.
    async fn copy_body(
        &self,
        token: &CancellationToken,
        mut resp: Response,
        seg: &mut Segment,
    ) -> Result<()> {
        seg.begin_append();

        let mut received: u64 = 0;
        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => return Err(DownloadError::Cancelled),
                chunk = resp.chunk() => chunk,
            };

            match chunk {
                Ok(Some(bytes)) => {
                    if let Err(e) = seg.write(&bytes) {
                        return Err(seg.set_err(e));
                    }
                    received += bytes.len() as u64;
                    if let Some(hook) = &self.progress {
                        hook(seg.id(), received);
                    }
                }
                Ok(None) => break,
                Err(e) => return Err(seg.set_err(DownloadError::Network(e))),
            }
        }

        if let Err(e) = seg.flush() {
            return Err(seg.set_err(e));
        }

        tracing::trace!(segment = seg.id(), received, "corps copié");
        Ok(())
    }
}
