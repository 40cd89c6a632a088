//! Téléchargeur de fichiers segmenté et résumable via requêtes HTTP Range.
//!
//! # Fonctionnement
//!
//! - **Sondage**: une requête HEAD détermine si le serveur d'origine
//!   accepte les requêtes de plage et annonce la taille du fichier.
//! - **Planification**: le fichier est découpé en segments contigus, chacun
//!   adossé à un fichier temporaire propre.
//! - **Récupération**: un worker par segment émet des GET bornés par
//!   `Range`, écrit dans son puits tamponné et rejoue les échecs
//!   transitoires sous une politique de reprise (délai croissant, gigue,
//!   plafond de durée).
//! - **Fusion**: les fichiers de segments sont concaténés dans l'ordre,
//!   l'extension du fichier final est déduite des premiers octets.
//!
//! L'annulation est coopérative: un [`CancellationToken`] interrompt les
//! transferts en vol comme les attentes de reprise.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken
pub mod download;

// Types principaux au sommet du crate pour les appelants.
pub use download::{
    download_to, download_to_with, AuthScheme, DownloadError, DownloadManager, Downloader,
    RetryPolicy,
};
