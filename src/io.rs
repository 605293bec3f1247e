//! Crash-safe file output
//!
//! Writers never touch the target until everything is on disk. Data goes to
//! `tmp_<pid>_<unixtime>_<filename>` next to the target, and the temp file
//! is renamed over the target only when the write completed. A failed or
//! abandoned write removes the temp file.

use crate::compression::{CompressionMethod, OutputStream};
use crate::error::{Result, VoxError};
use chrono::Utc;
use log::{debug, warn};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Temp-file-then-rename writer for one target path
pub struct AtomicFile {
    target: PathBuf,
    temp: PathBuf,
    stream: Option<OutputStream>,
    written: u64,
}

impl AtomicFile {
    /// Start writing `target`, gzipping when it ends in `.gz`.
    pub fn create(target: impl AsRef<Path>) -> Result<Self> {
        let target = target.as_ref();
        Self::create_with(target, CompressionMethod::for_output(target))
    }

    pub fn create_with(target: impl AsRef<Path>, method: CompressionMethod) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        let temp = temp_path_for(&target)?;
        debug!("writing {} via {}", target.display(), temp.display());
        let file = File::create(&temp)?;
        Ok(Self {
            target,
            temp,
            stream: Some(OutputStream::new(file, method)),
            written: 0,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Bytes written so far (before compression)
    pub fn position(&self) -> u64 {
        self.written
    }

    /// Write all of `buf`; running out of room is `TruncatedData`.
    pub fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| VoxError::Unsupported("write after commit".to_string()))?;
        stream.write_all(buf).map_err(|e| match e.kind() {
            io::ErrorKind::WriteZero => VoxError::truncated(buf.len(), 0),
            _ => VoxError::Io(e),
        })?;
        self.written += buf.len() as u64;
        Ok(())
    }

    /// Zero-fill up to `offset`. Offsets behind the current position are an error.
    pub fn pad_to(&mut self, offset: u64) -> Result<()> {
        if offset < self.written {
            return Err(VoxError::CorruptHeader(format!(
                "data offset {} precedes header end {}",
                offset, self.written
            )));
        }
        let padding = vec![0u8; (offset - self.written) as usize];
        self.write_bytes(&padding)
    }

    /// Finish the stream and move the temp file over the target.
    pub fn commit(mut self) -> Result<()> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| VoxError::Unsupported("double commit".to_string()))?;
        let file = stream.finish()?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.temp, &self.target)?;
        // the rename consumed the temp file
        self.temp = PathBuf::new();
        Ok(())
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.temp.as_os_str().is_empty() {
            return;
        }
        self.stream = None;
        if let Err(e) = fs::remove_file(&self.temp) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove temp file {}: {}", self.temp.display(), e);
            }
        }
    }
}

fn temp_path_for(target: &Path) -> Result<PathBuf> {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| VoxError::Unsupported(format!("no file name in {}", target.display())))?;
    let temp_name = format!(
        "tmp_{}_{}_{}",
        std::process::id(),
        Utc::now().timestamp(),
        name
    );
    Ok(match target.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(temp_name),
        _ => PathBuf::from(temp_name),
    })
}

/// Write `target` atomically with the bytes produced by `fill`.
pub fn write_atomic<F>(target: impl AsRef<Path>, fill: F) -> Result<()>
where
    F: FnOnce(&mut AtomicFile) -> Result<()>,
{
    let mut file = AtomicFile::create(target)?;
    fill(&mut file)?;
    file.commit()
}
