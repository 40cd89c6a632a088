use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use rapide::download;
use rapide::{DownloadManager, Downloader, RetryPolicy};

#[derive(Debug, Parser)]
#[command(
    name = "rapide",
    version,
    about = "Téléchargeur segmenté et résumable via HTTP Range",
    long_about = None
)]
struct App {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Télécharge un fichier distant vers un répertoire local
    Download(DownloadArgs),
}

#[derive(Debug, Args)]
struct DownloadArgs {
    /// Adresse du fichier distant
    #[arg(short, long)]
    url: String,

    /// Répertoire local de destination
    #[arg(short, long)]
    out: PathBuf,

    /// Nom du fichier final (déduit de l'URL par défaut)
    #[arg(short, long)]
    file: Option<String>,

    /// Taille de chaque segment, en octets (exclusif avec --segment-count)
    #[arg(short = 's', long)]
    segment_size: Option<u64>,

    /// Nombre de segments
    #[arg(short = 'n', long)]
    segment_count: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    download::init_logging();

    match App::parse().cmd {
        Commands::Download(args) => run_download(args).await,
    }
}

async fn run_download(args: DownloadArgs) -> anyhow::Result<()> {
    let mut downloader =
        Downloader::new(&args.out, &args.url).context("création du téléchargeur")?;
    if let Some(file) = args.file {
        downloader = downloader.with_file_name(file);
    }

    let mut manager = DownloadManager::new(downloader, RetryPolicy::default())
        .with_segment_size(args.segment_size.unwrap_or(0))
        .with_segment_count(args.segment_count.unwrap_or(0));

    // Ctrl-C annule les transferts en vol et interrompt les attentes de reprise
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interruption reçue, annulation du téléchargement");
            cancel.cancel();
        }
    });

    info!(url = %args.url, out = %args.out.display(), "téléchargement en cours");
    let path = manager.download(&token).await?;
    info!(file = %path.display(), "téléchargement terminé");

    Ok(())
}
