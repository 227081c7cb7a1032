//! File-level helpers for audio imports: content hashing, container probing,
//! directory scanning and filename-derived metadata.

use lofty::file::{FileType, TaggedFileExt};
use lofty::prelude::*;
use lofty::probe::Probe;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ImportConfig;
use crate::error::AudioError;
use crate::models::ImportMetadata;
use crate::validation::is_valid_id;

/// Container-level facts of an audio file
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerFacts {
    /// Duration in seconds
    pub duration: f64,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    /// Format tag, e.g. `WAV-PCM_16`
    pub format: String,
    pub filesize: u64,
}

/// SHA-256 of the full file content, hex encoded.
pub async fn content_hash(path: &Path) -> Result<String, AudioError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .map_err(|e| AudioError::Task(format!("hash task failed: {}", e)))?
}

fn hash_file(path: &Path) -> Result<String, AudioError> {
    let mut file = File::open(path).map_err(|e| AudioError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| AudioError::io(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let hash = format!("{:x}", hasher.finalize());
    tracing::debug!(path = %path.display(), hash = %hash, "Calculated content hash");
    Ok(hash)
}

pub async fn probe(path: &Path) -> Result<ContainerFacts, AudioError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || probe_file(&path))
        .await
        .map_err(|e| AudioError::Task(format!("probe task failed: {}", e)))?
}

fn probe_file(path: &Path) -> Result<ContainerFacts, AudioError> {
    let filesize = std::fs::metadata(path)
        .map_err(|e| AudioError::io(path, e))?
        .len();

    let tagged_file = Probe::open(path)
        .map_err(|e| AudioError::io(path, std::io::Error::other(e.to_string())))?
        .guess_file_type()
        .map_err(|e| AudioError::io(path, e))?
        .read()
        .map_err(|e| AudioError::unsupported(path, e.to_string()))?;

    let name = match tagged_file.file_type() {
        FileType::Wav => "WAV",
        FileType::Mpeg => "MP3",
        FileType::Flac => "FLAC",
        FileType::Mp4 => "MP4",
        FileType::Aac => "AAC",
        FileType::Aiff => "AIFF",
        FileType::Vorbis => "OGG",
        FileType::Opus => "OPUS",
        FileType::WavPack => "WAVPACK",
        other => return Err(AudioError::unsupported(path, format!("{:?}", other))),
    };

    let properties = tagged_file.properties();
    let format = match properties.bit_depth() {
        Some(bits) => format!("{}-PCM_{}", name, bits),
        None => name.to_string(),
    };

    let facts = ContainerFacts {
        duration: properties.duration().as_secs_f64(),
        sample_rate: properties.sample_rate(),
        channels: properties.channels(),
        format,
        filesize,
    };
    tracing::debug!(
        path = %path.display(),
        duration = facts.duration,
        sample_rate = ?facts.sample_rate,
        format = %facts.format,
        "Probed audio container"
    );
    Ok(facts)
}

/// Audio files directly inside `dir` whose extension is accepted, sorted by name.
pub fn scan_directory(dir: &Path, config: &ImportConfig) -> Result<Vec<PathBuf>, AudioError> {
    if !dir.is_dir() {
        return Err(AudioError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        match entry {
            Ok(entry) => {
                // Symlinks are not followed; dangling ones fail at import time
                if entry.file_type().is_dir() {
                    continue;
                }
                let accepted = entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| config.accepts_extension(e));
                if accepted {
                    files.push(entry.into_path());
                }
            }
            Err(e) => tracing::warn!("Error accessing entry: {}", e),
        }
    }
    Ok(files)
}

/// Positional fields of `{entry_id}_{speaker_id}_{dialect}_{gender}...`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilenameFields {
    pub entry_id: Option<String>,
    pub speaker_id: Option<String>,
    pub dialect: Option<String>,
    pub gender: Option<String>,
}

impl FilenameFields {
    /// Splits a file stem on `delimiter`. An entry id such as `rki_0001` that
    /// the delimiter cuts in two is read back as one field.
    pub fn parse(stem: &str, delimiter: char) -> Self {
        let parts: Vec<&str> = stem.split(delimiter).collect();
        let (entry_id, consumed) = match parts.as_slice() {
            [prefix, digits, ..] if is_valid_id(&format!("{prefix}{delimiter}{digits}")) => {
                (Some(format!("{prefix}{delimiter}{digits}")), 2)
            }
            [first, ..] => (Some(first.to_string()), 1),
            [] => (None, 0),
        };
        let entry_id = entry_id.filter(|s| !s.is_empty());

        let mut rest = parts
            .iter()
            .skip(consumed)
            .map(|part| Some(part.to_string()).filter(|s| !s.is_empty()));
        let speaker_id = rest.next().flatten();
        let dialect = rest.next().flatten();
        let gender = rest.next().flatten();

        FilenameFields {
            entry_id,
            speaker_id,
            dialect,
            gender,
        }
    }

    pub fn from_path(path: &Path, delimiter: char) -> Self {
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(|stem| Self::parse(stem, delimiter))
            .unwrap_or_default()
    }

    /// Fills fields `metadata` leaves unset; explicit values win.
    pub fn apply_to(self, metadata: &mut ImportMetadata) {
        fn fill(slot: &mut Option<String>, fallback: Option<String>) {
            if slot.as_deref().is_none_or(str::is_empty) {
                if let Some(value) = fallback {
                    *slot = Some(value);
                }
            }
        }
        fill(&mut metadata.entry_id, self.entry_id);
        fill(&mut metadata.speaker_id, self.speaker_id);
        fill(&mut metadata.dialect, self.dialect);
        fill(&mut metadata.gender, self.gender);
    }
}
