//! Sequential assembly of downloaded segments into the output file.

use std::io::Write;
use std::path::{Path, PathBuf};
use fs_err as fs;
use fs::File;
use tracing::trace;
use crate::DashAudioError;


/// Owns the output file for the duration of a download. Each chunk is written to the file as soon
/// as it is appended, in the order in which chunks are received, without any intermediate buffer.
///
/// If the download fails, the `Assembler` is dropped without being closed and the file is left on
/// disk containing the chunks appended so far.
#[derive(Debug)]
pub struct Assembler {
    path: PathBuf,
    file: File,
    bytes_written: u64,
    chunks: u64,
}

impl Assembler {
    /// Create the file at `path`, truncating it if it already exists.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Assembler, DashAudioError> {
        let path = path.into();
        let file = File::create(&path)
            .map_err(|e| DashAudioError::Write(e, String::from("creating output file")))?;
        trace!("Opened output file {}", path.display());
        Ok(Assembler { path, file, bytes_written: 0, chunks: 0 })
    }

    /// Write `bytes` at the end of the output file.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), DashAudioError> {
        self.file.write_all(bytes)
            .map_err(|e| DashAudioError::Write(e, String::from("writing segment data")))?;
        self.bytes_written += bytes.len() as u64;
        self.chunks += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total number of octets appended so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunks
    }

    /// Flush the output file to disk and return its absolute path.
    pub fn close(mut self) -> Result<PathBuf, DashAudioError> {
        self.file.flush()
            .map_err(|e| DashAudioError::Write(e, String::from("flushing output file")))?;
        self.file.sync_all()
            .map_err(|e| DashAudioError::Write(e, String::from("syncing output file")))?;
        trace!("Closed output file after {} chunks ({} octets)", self.chunks, self.bytes_written);
        fs::canonicalize(&self.path)
            .map_err(|e| DashAudioError::Write(e, String::from("resolving output path")))
    }
}
