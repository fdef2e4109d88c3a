/*!
Chunked async file I/O for save bodies.

All loops move data in fixed-size chunks and check cancellation before every
chunk. Files are committed with a temp-file-then-rename so a crash or
cancellation mid-write never leaves a partial file at the canonical path;
uncommitted temp files are removed when dropped.
*/

use crate::options::OperationContext;
use crate::{KeepsakeError, Result};
use sha2::{Digest, Sha256};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Upper bound for a header line; anything longer is not a save file.
pub const MAX_HEADER_LEN: usize = 1024 * 1024;

/// Run blocking filesystem work off the async worker threads.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| KeepsakeError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

/// Create a temp file in `dir` and hand it to tokio.
async fn temp_in(dir: &Path) -> Result<(File, TempPath)> {
    let dir = dir.to_path_buf();
    let (file, path) = run_blocking(move || {
        let named = tempfile::Builder::new()
            .prefix(".keepsake-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| {
                KeepsakeError::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to create temp file in {}: {e}", dir.display()),
                ))
            })?;
        Ok(named.into_parts())
    })
    .await?;
    Ok((File::from_std(file), path))
}

/// Writes a file next to its final location and renames it into place on commit
pub struct AtomicFileWriter {
    file: File,
    temp_path: TempPath,
    final_path: PathBuf,
    written: u64,
}

impl AtomicFileWriter {
    /// Start writing `final_path`, creating its parent directory if needed
    pub async fn create(final_path: &Path) -> Result<Self> {
        let parent = final_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;
        let (file, temp_path) = temp_in(parent).await?;
        Ok(Self {
            file,
            temp_path,
            final_path: final_path.to_path_buf(),
            written: 0,
        })
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes).await?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush, sync and atomically replace the final path
    pub async fn commit(self) -> Result<PathBuf> {
        let Self {
            mut file,
            temp_path,
            final_path,
            ..
        } = self;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        run_blocking(move || {
            temp_path
                .persist(&final_path)
                .map_err(|e| KeepsakeError::Io(e.error))?;
            Ok(final_path)
        })
        .await
    }
}

/// Scratch file holding an intermediate body
pub struct ScratchFile {
    file: File,
    path: TempPath,
    len: u64,
}

impl ScratchFile {
    pub async fn create_in(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let (file, path) = temp_in(dir).await?;
        Ok(Self { file, path, len: 0 })
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes).await?;
        self.len += bytes.len() as u64;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Flush and close for writing; the contents can then be reread
    pub async fn finish(self) -> Result<ScratchBody> {
        let Self {
            mut file, path, len,
        } = self;
        file.flush().await?;
        drop(file);
        Ok(ScratchBody { path, len })
    }
}

/// Completed scratch body, deleted on drop
pub struct ScratchBody {
    path: TempPath,
    len: u64,
}

impl ScratchBody {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub async fn open(&self) -> Result<File> {
        Ok(File::open(&self.path).await?)
    }

    /// Remove the scratch file; failures are logged, not returned
    pub async fn discard(self) {
        let shown = self.path.display().to_string();
        let path = self.path;
        let removed = run_blocking(move || Ok(path.close()?)).await;
        if let Err(e) = removed {
            tracing::warn!(path = %shown, error = %e, "Failed to remove temporary body file");
        }
    }
}

/// Lowercase hex SHA-256 of a file, streamed in chunks
pub async fn checksum_file(path: &Path, chunk_size: usize, ctx: &OperationContext) -> Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        ctx.ensure_active()?;
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Read the header line and leave the cursor on the first body byte.
///
/// The line ends at the first `\n`; a `\r` right before it is dropped. Reads
/// happen in chunks, so any overshoot into the body is seeked back.
pub async fn read_header_line(
    file: &mut File,
    chunk_size: usize,
    ctx: &OperationContext,
) -> Result<Vec<u8>> {
    let mut header = Vec::with_capacity(512);
    let mut buffer = vec![0u8; chunk_size.clamp(1, MAX_HEADER_LEN)];

    loop {
        ctx.ensure_active()?;
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            return Err(KeepsakeError::invalid_format(
                "save file has no header terminator",
            ));
        }

        if let Some(newline) = buffer[..read].iter().position(|&b| b == b'\n') {
            header.extend_from_slice(&buffer[..newline]);
            if header.last() == Some(&b'\r') {
                header.pop();
            }
            let overshoot = (read - newline - 1) as i64;
            if overshoot > 0 {
                file.seek(SeekFrom::Current(-overshoot)).await?;
            }
            return Ok(header);
        }

        header.extend_from_slice(&buffer[..read]);
        if header.len() > MAX_HEADER_LEN {
            return Err(KeepsakeError::invalid_format("save header is too long"));
        }
    }
}

/// Read everything after the cursor.
///
/// Progress is reported against the remaining file length when
/// `report_progress` is set.
pub async fn read_body(
    file: &mut File,
    chunk_size: usize,
    report_progress: bool,
    ctx: &OperationContext,
) -> Result<Vec<u8>> {
    let position = file.seek(SeekFrom::Current(0)).await?;
    let total = file.metadata().await?.len().saturating_sub(position);
    let mut body = Vec::with_capacity(usize::try_from(total).unwrap_or(0));
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        ctx.ensure_active()?;
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&buffer[..read]);
        if report_progress && total > 0 {
            ctx.report(body.len() as f32 / total as f32);
        }
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_atomic_writer_commit() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested").join("slot_0.keep");

        let mut writer = AtomicFileWriter::create(&target).await.unwrap();
        writer.write(b"header\n").await.unwrap();
        writer.write(b"body").await.unwrap();
        assert_eq!(writer.written(), 11);
        assert!(!target.exists());

        writer.commit().await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"header\nbody");

        let leftovers: Vec<_> = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_writer_leaves_previous_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("slot_0.keep");
        std::fs::write(&target, b"previous").unwrap();

        let mut writer = AtomicFileWriter::create(&target).await.unwrap();
        writer.write(b"partial").await.unwrap();
        drop(writer);

        assert_eq!(std::fs::read(&target).unwrap(), b"previous");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_header_line_cursor_lands_on_body() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"{\"a\":1}\r\n\x00\x01\n\x02").unwrap();

        let ctx = OperationContext::new();
        let mut file = File::open(&path).await.unwrap();
        // Tiny chunks force several reads and an overshoot
        let header = read_header_line(&mut file, 3, &ctx).await.unwrap();
        assert_eq!(header, b"{\"a\":1}");

        let body = read_body(&mut file, 2, false, &ctx).await.unwrap();
        assert_eq!(body, b"\x00\x01\n\x02");
    }

    #[tokio::test]
    async fn test_missing_terminator_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"no newline here").unwrap();

        let mut file = File::open(&path).await.unwrap();
        let result = read_header_line(&mut file, 64, &OperationContext::new()).await;
        assert!(matches!(result, Err(KeepsakeError::InvalidFormat(_))));
    }

    #[tokio::test]
    async fn test_checksum_matches_in_memory_hash() {
        let dir = TempDir::new().unwrap();
        let mut scratch = ScratchFile::create_in(dir.path()).await.unwrap();
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 256) as u8).collect();
        for chunk in data.chunks(777) {
            scratch.write(chunk).await.unwrap();
        }
        let body = scratch.finish().await.unwrap();
        assert_eq!(body.len(), data.len() as u64);

        let streamed = checksum_file(body.path(), 4096, &OperationContext::new())
            .await
            .unwrap();
        assert_eq!(streamed, crate::metadata::compute_hash(&data));

        let path = body.path().to_path_buf();
        body.discard().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cancelled_checksum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"data").unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let ctx = OperationContext::new().with_cancellation(token);
        let result = checksum_file(&path, 1024, &ctx).await;
        assert!(matches!(result, Err(KeepsakeError::Cancelled)));
    }
}
