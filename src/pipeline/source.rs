use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::SourceConfig;

/// A log file together with the day it covers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceFile {
    pub path: PathBuf,
    pub date: NaiveDate,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, date: NaiveDate) -> Self {
        Self {
            path: path.into(),
            date,
        }
    }

    /// Builds a source file whose date is taken from its name.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let date = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(date_from_name)?;
        Some(Self { path, date })
    }

    /// Directory holding the file and its side files.
    pub fn directory(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
    }

    pub fn label(&self) -> String {
        self.path.display().to_string()
    }

    /// Sibling file named `<stem>_<date><extension>`.
    pub fn sibling(&self, stem: &str, extension: &str) -> PathBuf {
        self.directory().join(dated_name(stem, self.date, extension))
    }
}

/// `<stem>_<YYYY-MM-DD><extension>`.
pub fn dated_name(stem: &str, date: NaiveDate, extension: &str) -> String {
    format!("{stem}_{}{extension}", date.format("%Y-%m-%d"))
}

/// Returns the first `YYYY-MM-DD` found in a file name.
pub fn date_from_name(name: &str) -> Option<NaiveDate> {
    let bytes = name.as_bytes();
    if bytes.len() < 10 {
        return None;
    }
    (0..=bytes.len() - 10).find_map(|i| {
        let candidate = &bytes[i..i + 10];
        let shaped = candidate.iter().enumerate().all(|(j, b)| match j {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
        if !shaped {
            return None;
        }
        std::str::from_utf8(candidate)
            .ok()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
    })
}

/// Raw command logs directly inside the source directory, sorted by path.
pub fn discover_raw(cfg: &SourceConfig) -> Result<Vec<SourceFile>> {
    ensure_directory(&cfg.directory)?;
    let files = walk(&cfg.directory, 1, |name| {
        cfg.raw_prefixes.iter().any(|p| name.starts_with(p.as_str()))
            && name.ends_with(cfg.extension.as_str())
    });
    debug!(dir = %cfg.directory.display(), files = files.len(), "raw logs discovered");
    Ok(files)
}

/// Converted logs anywhere below the source directory, sorted by path.
pub fn discover_converted(cfg: &SourceConfig) -> Result<Vec<SourceFile>> {
    ensure_directory(&cfg.directory)?;
    let files = walk(&cfg.directory, usize::MAX, |name| {
        name.starts_with(cfg.converted_prefix.as_str()) && name.ends_with(cfg.extension.as_str())
    });
    debug!(dir = %cfg.directory.display(), files = files.len(), "converted logs discovered");
    Ok(files)
}

/// Explicitly listed logs, sorted by path with duplicates removed.
pub fn from_paths(paths: &[PathBuf]) -> Result<Vec<SourceFile>> {
    let mut files = paths
        .iter()
        .map(|path| {
            if !path.is_file() {
                bail!("{} is not a file", path.display());
            }
            SourceFile::from_path(path.clone())
                .with_context(|| format!("no YYYY-MM-DD date in {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    files.sort();
    files.dedup();
    Ok(files)
}

fn ensure_directory(dir: &Path) -> Result<()> {
    let meta =
        std::fs::metadata(dir).with_context(|| format!("listing {}", dir.display()))?;
    if !meta.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    Ok(())
}

/// Regular files (symlinks followed) up to `max_depth` below `root` whose
/// names satisfy `matches`. Unreadable entries are skipped.
fn walk(root: &Path, max_depth: usize, matches: impl Fn(&str) -> bool) -> Vec<SourceFile> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).min_depth(1).max_depth(max_depth) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if !matches(name) {
            continue;
        }
        let is_file = entry.metadata().map(|m| m.is_file()).unwrap_or(false);
        if is_file {
            push_dated(&mut files, entry.into_path());
        }
    }
    files.sort();
    files
}

fn push_dated(files: &mut Vec<SourceFile>, path: PathBuf) {
    match SourceFile::from_path(path) {
        Some(file) => files.push(file),
        None => warn!("skipping log without a date in its name"),
    }
}
