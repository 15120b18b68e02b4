//! Deployment archive packaging and extraction
//!
//! Builds the in-memory zip sent with a deploy request from a filtered walk of
//! the source tree, and extracts retrieved archives back onto disk. File
//! contents are streamed in both directions; only the finished archive is held
//! in memory.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use chrono::{Datelike, Timelike};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::hash::HashAlgorithm;
use crate::tracking::mtime_millis;

const BUFFER_SIZE: usize = 64 * 1024;

/// Names starting with this are never packaged.
const HIDDEN_PREFIX: char = '.';
/// Editor backups end with this and are never packaged.
const BACKUP_SUFFIX: char = '~';

/// Content transform that stores files unchanged.
pub fn identity(path: &Path) -> anyhow::Result<PathBuf> {
    Ok(path.to_path_buf())
}

/// File written by [`extract`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub path: PathBuf,
    /// Modification time of the written file, milliseconds since the epoch.
    pub local_mtime: i64,
    pub hash: Option<String>,
}

pub(crate) fn is_excluded(name: &str) -> bool {
    name.starts_with(HIDDEN_PREFIX) || name.ends_with(BACKUP_SUFFIX)
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn zip_time(modified: SystemTime) -> zip::DateTime {
    let local: chrono::DateTime<chrono::Local> = modified.into();
    zip::DateTime::from_date_and_time(
        local.year().clamp(1980, 2107) as u16,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .unwrap_or_default()
}

/// Zip every file under `root` accepted by `include`.
///
/// `include` receives `/`-separated paths relative to `root`. Hidden and
/// backup entries are skipped before it is consulted (hidden directories with
/// their whole subtree). `transform` maps an included file to the file whose
/// bytes are stored under the original entry name.
///
/// Directory entries are written for included directories and for every
/// ancestor of an included file, so empty directories survive extraction.
pub fn build<P, T>(root: &Path, include: P, mut transform: T) -> anyhow::Result<Vec<u8>>
where
    P: Fn(&str) -> bool,
    T: FnMut(&Path) -> anyhow::Result<PathBuf>,
{
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let mut written_dirs: BTreeSet<String> = BTreeSet::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded(&e.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk directory: {}", root.display()))?;
        let Some(key) = relative_key(root, entry.path()) else {
            continue;
        };
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if include(&key) {
                add_directory(&mut zip, &mut written_dirs, &key, entry.path())?;
            }
            continue;
        }
        if !file_type.is_file() {
            tracing::debug!(path = %entry.path().display(), "skipping non-regular file");
            continue;
        }
        if !include(&key) {
            continue;
        }

        let mut ancestor = String::new();
        let segments: Vec<&str> = key.split('/').collect();
        for segment in &segments[..segments.len() - 1] {
            if !ancestor.is_empty() {
                ancestor.push('/');
            }
            ancestor.push_str(segment);
            add_directory(&mut zip, &mut written_dirs, &ancestor, &root.join(&ancestor))?;
        }

        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .unwrap_or_else(SystemTime::now);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .last_modified_time(zip_time(modified));

        let content_path = transform(entry.path())?;
        let mut content = File::open(&content_path)
            .with_context(|| format!("Failed to open file: {}", content_path.display()))?;

        zip.start_file(key.as_str(), options)
            .with_context(|| format!("Failed to start archive entry: {}", key))?;
        std::io::copy(&mut content, &mut zip)
            .with_context(|| format!("Failed to write archive entry: {}", key))?;
    }

    let cursor = zip.finish().context("Failed to finish archive")?;
    Ok(cursor.into_inner())
}

fn add_directory<W: Write + std::io::Seek>(
    zip: &mut zip::ZipWriter<W>,
    written: &mut BTreeSet<String>,
    key: &str,
    path: &Path,
) -> anyhow::Result<()> {
    if !written.insert(key.to_string()) {
        return Ok(());
    }
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or_else(|_| SystemTime::now());
    let options = SimpleFileOptions::default().last_modified_time(zip_time(modified));
    zip.add_directory(format!("{}/", key), options)
        .with_context(|| format!("Failed to add archive directory: {}", key))?;
    Ok(())
}

/// Extract a zip archive into `dest`
///
/// Parent directories are created as needed and entries with unsafe names are
/// skipped. When `hash` is set, every file is hashed while it is written, in
/// the same pass. Returns one record per extracted file keyed by its
/// `/`-separated relative path.
pub fn extract(
    data: &[u8],
    dest: &Path,
    hash: Option<HashAlgorithm>,
) -> anyhow::Result<BTreeMap<String, ExtractedFile>> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create extract directory: {}", dest.display()))?;

    let mut archive =
        zip::ZipArchive::new(Cursor::new(data)).context("Failed to read archive")?;
    let mut extracted = BTreeMap::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .with_context(|| format!("Failed to read archive entry {}", i))?;

        let Some(relative) = file.enclosed_name() else {
            tracing::warn!(entry = file.name(), "skipping archive entry with unsafe path");
            continue;
        };
        let outpath = dest.join(&relative);

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)
                .with_context(|| format!("Failed to create directory: {}", outpath.display()))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create parent directory: {}", parent.display())
            })?;
        }

        let mut outfile = File::create(&outpath)
            .with_context(|| format!("Failed to create file: {}", outpath.display()))?;
        let mut hasher = hash.map(|algorithm| algorithm.hasher());
        loop {
            let read = file
                .read(&mut buffer)
                .with_context(|| format!("Failed to read archive entry: {}", file.name()))?;
            if read == 0 {
                break;
            }
            outfile
                .write_all(&buffer[..read])
                .with_context(|| format!("Failed to write file: {}", outpath.display()))?;
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&buffer[..read]);
            }
        }
        drop(outfile);

        let Some(key) = relative_key(dest, &outpath) else {
            continue;
        };
        extracted.insert(
            key,
            ExtractedFile {
                local_mtime: mtime_millis(&outpath)?,
                path: outpath,
                hash: hasher.map(|h| h.finalize()),
            },
        );
    }

    Ok(extracted)
}

/// Names of all entries in an archive, in archive order.
pub fn entry_names(data: &[u8]) -> anyhow::Result<Vec<String>> {
    let archive = zip::ZipArchive::new(Cursor::new(data)).context("Failed to read archive")?;
    Ok(archive.file_names().map(str::to_string).collect())
}

/// Read one entry of an archive as text, if present.
pub fn read_entry(data: &[u8], name: &str) -> anyhow::Result<Option<String>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).context("Failed to read archive")?;
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read archive entry: {}", name)),
    };
    let mut content = String::new();
    file.read_to_string(&mut content)
        .with_context(|| format!("Failed to read archive entry: {}", name))?;
    Ok(Some(content))
}
