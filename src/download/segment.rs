//! Segments d'un téléchargement et leur gestionnaire.
//!
//! Invariants principaux:
//! - Les segments générés couvrent l'intervalle `[0, file_size - 1]` sans
//!   chevauchement, dans l'ordre croissant; le dernier segment absorbe le
//!   reste de la division.
//! - Un segment n'est écrit que par le worker qui le détient (discipline
//!   mono-écrivain, aucun verrou).
//! - `done` n'est posé qu'après un flush réussi et n'est jamais effacé;
//!   une erreur collante rend le segment irrécupérable pour la tentative
//!   en cours.
use std::fs;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::download::types::{DownloadError, Result};
use crate::download::utils;

/// Nombre de segments par défaut quand ni la taille ni le nombre ne sont
/// configurés.
pub const DEFAULT_NUMBER_OF_SEGMENTS: usize = 4;

/// Bornes de capacité du tampon d'écriture d'un segment.
const MIN_BUFFER_CAPACITY: u64 = 4 << 10;
const MAX_BUFFER_CAPACITY: u64 = 1 << 20;

/// Puits d'octets d'un segment: écritures séquentielles en append, avec une
/// position interrogeable quand le support sait se repositionner.
pub trait SegmentSink: Write + Send {
    /// Position courante du puits; `None` pour un puits non repositionnable.
    fn position(&mut self) -> Option<io::Result<u64>> {
        None
    }
}

impl SegmentSink for fs::File {
    fn position(&mut self) -> Option<io::Result<u64>> {
        Some(self.stream_position())
    }
}

/// Paramètres de construction d'un segment.
pub struct SegmentParams {
    pub id: usize,
    /// Fragment de nom stable; nomme le fichier temporaire sur disque.
    pub name: String,
    /// Bornes incluses dans le fichier distant; toutes deux à 0 quand la
    /// taille est inconnue (le segment couvre alors tout le flux).
    pub start: u64,
    pub end: u64,
    /// Borne indicative du volume écrit; dimensionne le tampon.
    pub max_segment_size: u64,
    pub writer: Box<dyn SegmentSink>,
}

/// Une plage d'octets du fichier distant et son puits local.
pub struct Segment {
    id: usize,
    name: String,
    start: u64,
    end: u64,
    max_segment_size: u64,
    buffer: io::BufWriter<Box<dyn SegmentSink>>,
    current_offset: u64,
    err: Option<Arc<DownloadError>>,
    done: bool,
    resumable: bool,
}

impl Segment {
    /// Construit un segment après validation des paramètres. La capacité de
    /// reprise est sondée une seule fois ici, jamais sur le chemin chaud.
    pub fn new(params: SegmentParams) -> Result<Self> {
        let SegmentParams {
            id,
            name,
            start,
            end,
            max_segment_size,
            mut writer,
        } = params;

        if end > 0 && start > end {
            return Err(DownloadError::InvalidParam {
                field: "Start, End",
                message: "la borne de début doit précéder la borne de fin",
            });
        }

        let resumable = writer.position().is_some();
        let capacity = max_segment_size.clamp(MIN_BUFFER_CAPACITY, MAX_BUFFER_CAPACITY);

        Ok(Self {
            id,
            name,
            start,
            end,
            max_segment_size,
            buffer: io::BufWriter::with_capacity(capacity as usize, writer),
            current_offset: 0,
            err: None,
            done: false,
            resumable,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn max_segment_size(&self) -> u64 {
        self.max_segment_size
    }

    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn is_resumable(&self) -> bool {
        self.resumable
    }

    /// L'erreur collante, emballée pour rester installée sur le segment.
    pub fn sticky_err(&self) -> Option<DownloadError> {
        self.err
            .as_ref()
            .map(|e| DownloadError::Sticky(Arc::clone(e)))
    }

    /// Écrit `data` dans le tampon. En cas d'échec, `current_offset` est
    /// avancé du volume réellement écrit avant de retourner l'erreur.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut written = 0;
        while written < data.len() {
            match self.buffer.write(&data[written..]) {
                Ok(0) => {
                    self.current_offset += written as u64;
                    return Err(DownloadError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "le puits du segment n'accepte plus d'octets",
                    )));
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.current_offset += written as u64;
                    return Err(DownloadError::Io(e));
                }
            }
        }
        Ok(written)
    }

    /// Sonde informative de la position avant une copie, pour tolérer des
    /// octets déjà présents dans le fichier lors d'une reprise.
    pub fn begin_append(&mut self) {
        if self.resumable {
            let _ = self.buffer.get_mut().position();
        }
    }

    /// Copie `src` dans le tampon du segment, précédée de la sonde de
    /// reprise.
    pub fn read_from<R: Read>(&mut self, src: &mut R) -> Result<u64> {
        self.begin_append();
        io::copy(src, &mut self.buffer).map_err(DownloadError::Io)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.buffer.flush().map_err(DownloadError::Io)
    }

    /// Vide le tampon puis relâche le writer sous-jacent.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    /// Installe l'erreur collante et retourne sa forme emballée. Une
    /// erreur déjà installée n'est pas écrasée.
    pub fn set_err(&mut self, err: DownloadError) -> DownloadError {
        let installed = self.err.get_or_insert(Arc::new(err));
        DownloadError::Sticky(Arc::clone(installed))
    }

    /// Termine le segment. `set_done(true)` pose `done` puis vide le tampon;
    /// toute erreur collante est retournée telle quelle et `set_done(false)`
    /// ne fait rien d'autre que la signaler.
    pub fn set_done(&mut self, done: bool) -> Result<()> {
        if !done || self.err.is_some() {
            return match self.sticky_err() {
                Some(e) => Err(e),
                None => Ok(()),
            };
        }

        self.done = true;
        self.flush()
    }
}

/// Planifie la segmentation d'un fichier, détient les segments et effectue
/// la fusion finale.
pub struct SegmentManager {
    /// Nonce du téléchargement; préfixe les fichiers temporaires.
    id: u32,
    destination_dir: PathBuf,
    /// Taille du fichier distant; 0 ou -1 signifient «inconnue» et forcent
    /// un flux unique non segmenté.
    file_size: i64,
    segments: Vec<Segment>,
    segment_size: u64,
    total_segments: usize,
}

impl SegmentManager {
    /// Planifie la segmentation et crée les fichiers temporaires.
    ///
    /// `segment_size` et `total_segments` valent 0 quand ils ne sont pas
    /// configurés; les fournir tous les deux est une erreur. Un répertoire
    /// absent ou vide est remplacé par le répertoire temporaire du système.
    pub fn new(
        destination_dir: Option<PathBuf>,
        file_size: i64,
        segment_size: u64,
        total_segments: usize,
    ) -> Result<Self> {
        if total_segments > 0 && segment_size > 0 {
            return Err(DownloadError::InvalidParam {
                field: "TotalSegments, SegmentSize",
                message: "ces deux propriétés sont mutuellement exclusives",
            });
        }

        let destination_dir = destination_dir
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(std::env::temp_dir);

        let id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or_default();

        let (total_segments, segment_size) = plan(file_size, segment_size, total_segments);

        tracing::debug!(
            nonce = id,
            file_size,
            segment_size,
            total_segments,
            dir = %destination_dir.display(),
            "plan de segmentation"
        );

        let mut segments = Vec::with_capacity(total_segments);
        for i in 0..total_segments {
            let (mut start, mut end) = (0, 0);
            if segment_size > 0 {
                start = i as u64 * segment_size;
                end = start + segment_size - 1;
                // le dernier segment absorbe le reste de la division
                if i == total_segments - 1 {
                    end = file_size as u64 - 1;
                }
            }

            let name = format!("segment-{id}-part-{i}");
            let writer = utils::segment_file_writer(&destination_dir, &name)?;
            segments.push(Segment::new(SegmentParams {
                id: i,
                name,
                start,
                end,
                max_segment_size: segment_size,
                writer: Box::new(writer),
            })?);
        }

        Ok(Self {
            id,
            destination_dir,
            file_size,
            segments,
            segment_size,
            total_segments,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn destination_dir(&self) -> &Path {
        &self.destination_dir
    }

    pub fn file_size(&self) -> i64 {
        self.file_size
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    pub fn total_segments(&self) -> usize {
        self.total_segments
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Cède les segments aux workers; chacun est rendu via
    /// [`SegmentManager::restore_segments`] avant la fusion.
    pub fn take_segments(&mut self) -> Vec<Segment> {
        std::mem::take(&mut self.segments)
    }

    /// Réinstalle les segments rendus par les workers, triés par id.
    pub fn restore_segments(&mut self, mut segments: Vec<Segment>) {
        segments.sort_by_key(Segment::id);
        self.segments = segments;
    }

    /// Concatène les fichiers de segments dans le segment 0, renifle le type
    /// de contenu sur ses premiers octets puis renomme le résultat en
    /// `<destination_dir>/<filename><ext>`.
    ///
    /// Les fichiers fusionnés sont supprimés par des threads concurrents,
    /// tous joints avant de retourner.
    pub fn merge_files(mut self, filename: &str) -> Result<PathBuf> {
        if self.segments.is_empty() {
            return Err(DownloadError::NoContent);
        }

        let mut segment0 = self.segments.remove(0);
        let segment0_path = self.destination_dir.join(segment0.name());

        // renifle le type sur au plus 512 octets du premier segment
        let mut head = Vec::with_capacity(512);
        fs::File::open(&segment0_path)?
            .take(512)
            .read_to_end(&mut head)?;
        let ext = utils::detect_extension(&head)?;

        tracing::info!(
            parts = self.segments.len() + 1,
            ext = %ext,
            "fusion des segments"
        );

        // les suppressions déjà lancées sont attendues avant de retourner,
        // même quand une partie ultérieure manque ou ne se lit pas
        let mut deletions = Vec::with_capacity(self.segments.len());
        let mut append_err = None;
        for seg in &self.segments {
            let path = self.destination_dir.join(seg.name());
            let mut part = match fs::File::open(&path) {
                Ok(part) => part,
                Err(e) => {
                    append_err = Some(DownloadError::Io(e));
                    break;
                }
            };
            if let Err(e) = segment0.read_from(&mut part) {
                append_err = Some(e);
                break;
            }

            deletions.push(std::thread::spawn(move || {
                drop(part);
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "suppression de la partie impossible");
                }
            }));
        }
        for handle in deletions {
            let _ = handle.join();
        }
        if let Some(e) = append_err {
            return Err(e);
        }

        segment0.set_done(true)?;
        segment0.close()?;

        let final_path = self.destination_dir.join(format!("{filename}{ext}"));
        fs::rename(&segment0_path, &final_path)?;

        tracing::info!(file = %final_path.display(), "fusion terminée");
        Ok(final_path)
    }
}

/// Calcule le couple (nombre de segments, taille de segment) selon la
/// configuration et la taille du fichier.
fn plan(file_size: i64, segment_size: u64, total_segments: usize) -> (usize, u64) {
    // fichier vide ou taille inconnue: un seul flux non segmenté
    if file_size <= 0 {
        return (1, 0);
    }

    let size = file_size as u64;
    match (total_segments, segment_size) {
        (n, 0) if n > 0 => (n, size / n as u64),
        (0, s) if s > 0 => (size.div_ceil(s) as usize, s),
        _ => (
            DEFAULT_NUMBER_OF_SEGMENTS,
            size / DEFAULT_NUMBER_OF_SEGMENTS as u64,
        ),
    }
}
