//! File access for the engines: fixed-size chunk reads and atomic writes.
//!
//! A receiver never leaves a half-written file under the final name. Data
//! goes to a private `<name>.<pid>-<n>.part` file and is renamed into place by
//! [`ChunkWriter::finish`]; [`ChunkWriter::abandon`] removes the partial file
//! after a failed transfer.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};

use crate::error::{Result, TransferError};

/// Sequential reader handing out `chunk_size`-byte pieces of a file.
#[derive(Debug)]
pub struct ChunkReader {
    file: File,
    chunk_size: usize,
}

impl ChunkReader {
    pub async fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await.map_err(|e| {
            TransferError::Resource(format!("cannot read {}: {e}", path.display()))
        })?;
        if !meta.is_file() {
            return Err(TransferError::Resource(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let file = File::open(path).await.map_err(|e| {
            TransferError::Resource(format!("cannot open {}: {e}", path.display()))
        })?;
        Ok(Self { file, chunk_size })
    }

    /// Next chunk, or `None` at end of file. Only the last chunk may be short.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf))
    }

    /// Every remaining chunk, in order.
    pub async fn read_all(mut self) -> Result<Vec<Vec<u8>>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}

/// Fail early when `dest` cannot be created: its directory must exist.
pub async fn check_destination(dest: &Path) -> Result<()> {
    if dest.file_name().is_none() {
        return Err(TransferError::Resource(format!(
            "{} does not name a file",
            dest.display()
        )));
    }
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match tokio::fs::metadata(parent).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        _ => Err(TransferError::Resource(format!(
            "destination directory {} does not exist",
            parent.display()
        ))),
    }
}

/// Writer that materialises `dest` only on success.
#[derive(Debug)]
pub struct ChunkWriter {
    file: BufWriter<File>,
    part: PathBuf,
    dest: PathBuf,
    written: u64,
}

impl ChunkWriter {
    pub async fn create(dest: impl Into<PathBuf>) -> Result<Self> {
        let dest = dest.into();
        check_destination(&dest).await?;
        let part = part_path(&dest);
        let file = File::create(&part).await.map_err(|e| {
            TransferError::Resource(format!("cannot create {}: {e}", part.display()))
        })?;
        Ok(Self {
            file: BufWriter::new(file),
            part,
            dest,
            written: 0,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Flush and move the file to its final name. Returns bytes written.
    pub async fn finish(mut self) -> Result<u64> {
        self.file.flush().await?;
        self.file.get_ref().sync_all().await?;
        drop(self.file);
        tokio::fs::rename(&self.part, &self.dest).await?;
        Ok(self.written)
    }

    /// Discard everything written so far.
    pub async fn abandon(self) {
        drop(self.file);
        if let Err(e) = tokio::fs::remove_file(&self.part).await {
            log::warn!("could not remove partial file {}: {e}", self.part.display());
        }
    }
}

/// Unique per writer, so concurrent receives of one name never share a file.
fn part_path(dest: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    let mut name: OsString = dest.file_name().map(OsString::from).unwrap_or_default();
    name.push(format!(".{}-{n}.part", std::process::id()));
    dest.with_file_name(name)
}
