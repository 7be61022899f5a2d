use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Output file written under a `.partial` name and moved into place on
/// [`commit`](Self::commit).
///
/// Dropping an uncommitted file removes the partial, so an aborted or
/// failed pass never leaves a truncated output behind.
pub struct PartialFile {
    target: PathBuf,
    partial: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl PartialFile {
    pub fn create(target: &Path) -> Result<Self> {
        let mut name = target.as_os_str().to_os_string();
        name.push(".partial");
        let partial = PathBuf::from(name);

        let file = File::create(&partial)
            .with_context(|| format!("creating {}", partial.display()))?;

        Ok(Self {
            target: target.to_path_buf(),
            partial,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Flushes and renames the file to its target name.
    pub fn commit(mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("flushing {}", self.partial.display()))?;
        }
        std::fs::rename(&self.partial, &self.target)
            .with_context(|| format!("moving output into {}", self.target.display()))?;
        debug!(path = %self.target.display(), "output committed");
        Ok(())
    }
}

impl Write for PartialFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.writer.as_mut() {
            Some(w) => w.write(buf),
            None => Err(std::io::Error::other("output already committed")),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.partial) {
                warn!(path = %self.partial.display(), error = %e, "removing partial output failed");
            }
        }
    }
}
