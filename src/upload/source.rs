//! Local byte sources.
//!
//! A [`ByteSource`] is a finite byte sequence of known length that can
//! hand out arbitrary ranges.  Positioned reads let concurrent part
//! workers each read their own range; the sequential path simply asks for
//! ranges in ascending order.

use bytes::Bytes;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::Mutex;

/// Boxed future returned by [`ByteSource::read_range`].
pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = io::Result<Bytes>> + Send + 'a>>;

/// Readable, finite byte source of known total length.
pub trait ByteSource: Send + Sync + 'static {
    /// Total length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `length` bytes starting at `offset`.
    ///
    /// Fails with `UnexpectedEof` if the source ends early.
    fn read_range(&self, offset: u64, length: u64) -> ReadFuture<'_>;
}

impl ByteSource for Bytes {
    fn len(&self) -> u64 {
        Bytes::len(self) as u64
    }

    fn read_range(&self, offset: u64, length: u64) -> ReadFuture<'_> {
        let result = offset
            .checked_add(length)
            .filter(|end| *end <= ByteSource::len(self))
            .map(|end| self.slice(offset as usize..end as usize))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("range {offset}+{length} is past the end of the source"),
                )
            });
        Box::pin(async move { result })
    }
}

/// A local file opened for upload.
///
/// The handle is closed when the source is dropped, on every exit path.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
    len: u64,
}

impl FileSource {
    /// Open `path` and record its current length.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(Self {
            path,
            file: Mutex::new(file),
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, offset: u64, length: u64) -> ReadFuture<'_> {
        Box::pin(async move {
            let length = usize::try_from(length).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "part length exceeds memory")
            })?;
            let mut buf = vec![0u8; length];

            let mut file = self.file.lock().await;
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut buf).await?;

            Ok(Bytes::from(buf))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_bytes_source_slices() {
        let source = Bytes::from_static(b"0123456789");
        assert_eq!(ByteSource::len(&source), 10);
        assert_eq!(source.read_range(2, 3).await.unwrap(), Bytes::from_static(b"234"));
        assert_eq!(source.read_range(8, 2).await.unwrap(), Bytes::from_static(b"89"));
    }

    #[tokio::test]
    async fn test_bytes_source_past_end() {
        let source = Bytes::from_static(b"0123");
        let err = source.read_range(2, 5).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_file_source_positioned_reads() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello multipart world").unwrap();
        tmp.flush().unwrap();

        let source = FileSource::open(tmp.path()).await.unwrap();
        assert_eq!(source.len(), 21);
        assert!(!source.is_empty());

        // Out of order on purpose: reads are positioned, not streamed.
        assert_eq!(source.read_range(16, 5).await.unwrap(), Bytes::from_static(b"world"));
        assert_eq!(source.read_range(0, 5).await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(
            source.read_range(6, 9).await.unwrap(),
            Bytes::from_static(b"multipart")
        );
    }

    #[tokio::test]
    async fn test_file_source_short_read_fails() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abc").unwrap();
        tmp.flush().unwrap();

        let source = FileSource::open(tmp.path()).await.unwrap();
        let err = source.read_range(1, 10).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_file_source_empty_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let source = FileSource::open(tmp.path()).await.unwrap();
        assert!(source.is_empty());
    }

    #[tokio::test]
    async fn test_file_source_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSource::open(dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSource::open(dir.path().join("nope")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
