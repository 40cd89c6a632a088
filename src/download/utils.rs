//! Fonctions utilitaires d'E/S et de détection du type de contenu.
//!
//! Objectifs:
//! - Ouvrir les fichiers de segments avec les bons drapeaux (création,
//!   append, lecture-écriture) et les bons modes (répertoires 0755,
//!   fichiers 0666).
//! - Déterminer l'extension du fichier final en reniflant les premiers
//!   octets du segment 0: signatures magiques, puis heuristique texte,
//!   puis table MIME → extension avec repli sur `.<soustype>`.
use std::fs;
use std::io;
use std::path::Path;

use crate::download::types::{DownloadError, Result};

/// Crée le répertoire `dir` (0755, récursif) s'il est absent, puis ouvre le
/// fichier de segment `name` en création/append/lecture-écriture (0666).
pub fn segment_file_writer(dir: &Path, name: &str) -> io::Result<fs::File> {
    create_dir_0755(dir)?;

    let mut options = fs::OpenOptions::new();
    options.create(true).append(true).read(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o666);
    }
    options.open(dir.join(name))
}

fn create_dir_0755(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(dir)
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir)
    }
}

/// Détermine l'extension du fichier final à partir des premiers octets
/// (au plus 512) du premier segment.
pub fn detect_extension(head: &[u8]) -> Result<String> {
    map_media_type(sniff_content_type(head))
}

/// Mappe un type de contenu `type/soustype[; paramètres]` vers une
/// extension. Repli: `.<soustype>` quand la table ne connaît pas le type;
/// erreur quand le jeton n'a pas de soustype.
fn map_media_type(content_type: &str) -> Result<String> {
    let media = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();

    if let Some(ext) = extension_for(media) {
        return Ok(ext.to_string());
    }

    match media.split_once('/') {
        Some((_, subtype)) if !subtype.is_empty() => Ok(format!(".{subtype}")),
        _ => Err(DownloadError::InvalidContentType),
    }
}

/// Table MIME → extension des types courants.
fn extension_for(media: &str) -> Option<&'static str> {
    let ext = match media {
        "application/pdf" => ".pdf",
        "application/zip" => ".zip",
        "application/x-gzip" => ".gz",
        "application/octet-stream" => ".bin",
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "audio/mpeg" => ".mp3",
        "audio/wave" => ".wav",
        "video/mp4" => ".mp4",
        "video/avi" => ".avi",
        "text/plain" => ".txt",
        "text/html" => ".html",
        _ => return None,
    };
    Some(ext)
}

/// Renifle le type de contenu par signatures magiques, puis par heuristique
/// texte/binaire. Un contenu vide est traité comme du texte.
fn sniff_content_type(head: &[u8]) -> &'static str {
    if head.starts_with(b"%PDF-") {
        return "application/pdf";
    }
    if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        return "image/png";
    }
    if head.starts_with(b"\xff\xd8\xff") {
        return "image/jpeg";
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return "image/gif";
    }
    if head.starts_with(b"PK\x03\x04") {
        return "application/zip";
    }
    if head.starts_with(b"\x1f\x8b\x08") {
        return "application/x-gzip";
    }
    if head.starts_with(b"ID3") {
        return "audio/mpeg";
    }
    if head.starts_with(b"RIFF") && head.len() >= 12 {
        if &head[8..12] == b"WEBP" {
            return "image/webp";
        }
        if &head[8..12] == b"WAVE" {
            return "audio/wave";
        }
        if &head[8..12] == b"AVI " {
            return "video/avi";
        }
    }
    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        return "video/mp4";
    }
    if let Some(html) = sniff_html(head) {
        return html;
    }

    if head.iter().all(|&b| !is_binary_byte(b)) {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

fn sniff_html(head: &[u8]) -> Option<&'static str> {
    let trimmed: Vec<u8> = head
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .map(|b| b.to_ascii_uppercase())
        .collect();

    const TAGS: &[&[u8]] = &[b"<!DOCTYPE HTML", b"<HTML", b"<HEAD", b"<BODY", b"<SCRIPT"];
    TAGS.iter()
        .any(|tag| trimmed.starts_with(tag))
        .then_some("text/html; charset=utf-8")
}

/// Octets de contrôle qui ne figurent jamais dans du texte brut.
fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0b | 0x0e..=0x1a | 0x1c..=0x1f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom, Write};
    use tempfile::tempdir;

    #[test]
    fn test_segment_file_writer_creates_missing_dirs() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");

        let mut file = segment_file_writer(&nested, "segment-1-part-0").unwrap();
        file.write_all(b"hello").unwrap();

        assert!(nested.join("segment-1-part-0").exists());
    }

    #[test]
    fn test_segment_file_writer_appends_and_reads() {
        let dir = tempdir().unwrap();

        // Two successive opens must append, not truncate
        let mut first = segment_file_writer(dir.path(), "part").unwrap();
        first.write_all(b"Hello ").unwrap();
        drop(first);

        let mut second = segment_file_writer(dir.path(), "part").unwrap();
        second.write_all(b"World!").unwrap();
        second.seek(SeekFrom::Start(0)).unwrap();

        let mut content = String::new();
        second.read_to_string(&mut content).unwrap();
        assert_eq!(content, "Hello World!");
    }

    #[test]
    fn test_detect_extension_known_signatures() {
        assert_eq!(detect_extension(b"%PDF-1.7 blah").unwrap(), ".pdf");
        assert_eq!(
            detect_extension(b"\x89PNG\r\n\x1a\n rest").unwrap(),
            ".png"
        );
        assert_eq!(detect_extension(b"\xff\xd8\xff\xe0JFIF").unwrap(), ".jpg");
        assert_eq!(detect_extension(b"PK\x03\x04archive").unwrap(), ".zip");
        assert_eq!(detect_extension(b"GIF89a......").unwrap(), ".gif");
        assert_eq!(detect_extension(b"RIFF\x00\x00\x00\x00WEBPVP8").unwrap(), ".webp");
    }

    #[test]
    fn test_detect_extension_text_and_binary() {
        assert_eq!(detect_extension(b"du texte brut tout simple").unwrap(), ".txt");
        assert_eq!(detect_extension(b"").unwrap(), ".txt");
        assert_eq!(detect_extension(b"\x00\x01\x02\x03garbage").unwrap(), ".bin");
        assert_eq!(
            detect_extension(b"  <!doctype html><html>").unwrap(),
            ".html"
        );
    }

    #[test]
    fn test_map_media_type_fallback_is_dot_subtype() {
        assert_eq!(map_media_type("application/wasm").unwrap(), ".wasm");
        assert_eq!(
            map_media_type("text/plain; charset=utf-8").unwrap(),
            ".txt"
        );
    }

    #[test]
    fn test_map_media_type_without_subtype_fails() {
        assert!(matches!(
            map_media_type("nonsense"),
            Err(DownloadError::InvalidContentType)
        ));
        assert!(matches!(
            map_media_type("nonsense/"),
            Err(DownloadError::InvalidContentType)
        ));
    }
}
