//! Upload candidates and the temp materializer.
//!
//! External checkers only accept filesystem paths, so every upload that gets past the
//! cheap name and size checks is streamed into the upload scratch root under a unique,
//! timestamp-prefixed name. The returned [`MaterializedUpload`] removes that file when it
//! is dropped, which ties its lifetime to the validation run that created it.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::error::{PipelineError, Result};

/// Where the bytes of an upload come from
pub enum UploadSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadSource::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            UploadSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            UploadSource::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// An uploaded file awaiting validation
#[derive(Debug)]
pub struct UploadCandidate {
    name: String,
    size: u64,
    source: UploadSource,
}

impl UploadCandidate {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            source: UploadSource::Bytes(bytes),
        }
    }

    /// Build a candidate from a file on disk; the size comes from its metadata
    pub async fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = fs::metadata(&path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            name,
            size: metadata.len(),
            source: UploadSource::Path(path),
        })
    }

    /// Build a candidate from a stream whose size the caller declares
    pub fn from_reader(
        name: impl Into<String>,
        declared_size: u64,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            size: declared_size,
            source: UploadSource::Stream(Box::new(reader)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn into_source(self) -> UploadSource {
        self.source
    }
}

/// A stored copy of an upload, deleted when dropped
#[derive(Debug)]
pub struct MaterializedUpload {
    path: PathBuf,
    bytes_written: u64,
}

impl MaterializedUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl Drop for MaterializedUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed materialized upload"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove materialized upload"
            ),
        }
    }
}

/// Outcome of streaming an upload to disk
#[derive(Debug)]
pub enum Materialized {
    Stored(MaterializedUpload),
    /// More bytes arrived than the limit allows; nothing is left on disk
    TooLarge { bytes_seen: u64 },
}

/// Writes uploads into the scratch root under unique names
#[derive(Debug, Clone)]
pub struct Materializer {
    upload_dir: PathBuf,
}

impl Materializer {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
        }
    }

    /// Stream `source` into a fresh file named after `name`, stopping once `limit` is exceeded
    pub async fn materialize(
        &self,
        name: &str,
        source: UploadSource,
        limit: u64,
    ) -> Result<Materialized> {
        fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(|source| PipelineError::Materialize {
                path: self.upload_dir.clone(),
                source,
            })?;

        let path = self.upload_dir.join(stored_name(name));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| PipelineError::Materialize {
                path: path.clone(),
                source,
            })?;

        // Owning the guard before writing makes partial files disappear on error
        let mut stored = MaterializedUpload {
            path,
            bytes_written: 0,
        };

        let written = match source {
            UploadSource::Bytes(bytes) => {
                copy_limited(&mut bytes.as_slice(), file, &stored.path, limit).await?
            }
            UploadSource::Path(source_path) => {
                let mut reader = File::open(&source_path).await?;
                copy_limited(&mut reader, file, &stored.path, limit).await?
            }
            UploadSource::Stream(mut reader) => {
                copy_limited(&mut reader, file, &stored.path, limit).await?
            }
        };

        if written > limit {
            return Ok(Materialized::TooLarge {
                bytes_seen: written,
            });
        }

        stored.bytes_written = written;
        tracing::debug!(path = %stored.path.display(), bytes = written, "materialized upload");
        Ok(Materialized::Stored(stored))
    }
}

/// `YYYY-MM-DD_HH-MM-SS_` prefix shared by every scratch artefact
pub fn timestamp_prefix() -> String {
    Local::now().format("%Y-%m-%d_%H-%M-%S_").to_string()
}

/// Unique on-disk name: timestamp, random disambiguator, then the upload's basename
pub fn stored_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "upload".to_string());
    let nonce = uuid::Uuid::new_v4().simple().to_string();

    format!("{}{}_{}", timestamp_prefix(), &nonce[..8], base)
}

/// Copy at most `limit + 1` bytes so oversized streams are detected without storing them whole
async fn copy_limited<R>(reader: &mut R, mut file: File, path: &Path, limit: u64) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut limited = reader.take(limit.saturating_add(1));
    let written = tokio::io::copy(&mut limited, &mut file)
        .await
        .map_err(|source| PipelineError::Materialize {
            path: path.to_path_buf(),
            source,
        })?;
    file.flush()
        .await
        .map_err(|source| PipelineError::Materialize {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stored_name_is_prefixed_and_unique() {
        let first = stored_name("report.xml");
        let second = stored_name("report.xml");

        assert_ne!(first, second);
        assert!(first.ends_with("_report.xml"));
        // YYYY-MM-DD_HH-MM-SS_ is 20 characters, then 8 hex characters
        assert_eq!(&first[4..5], "-");
        assert_eq!(&first[10..11], "_");
        assert_eq!(&first[19..20], "_");
        assert!(first[20..28].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_stored_name_strips_directories() {
        let name = stored_name("../../etc/passwd.xml");
        assert!(name.ends_with("_passwd.xml"));
        assert!(!name.contains('/'));

        assert!(stored_name("").ends_with("_upload"));
    }

    #[tokio::test]
    async fn test_from_path_reads_size() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("items.xml");
        std::fs::write(&path, b"<item/>").unwrap();

        let candidate = UploadCandidate::from_path(&path).await.unwrap();
        assert_eq!(candidate.name(), "items.xml");
        assert_eq!(candidate.size(), 7);
    }

    #[tokio::test]
    async fn test_materialize_writes_and_cleans_up_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let materializer = Materializer::new(temp_dir.path().join("uploads"));

        let stored = match materializer
            .materialize("items.xml", UploadSource::Bytes(b"<item/>".to_vec()), 1024)
            .await
            .unwrap()
        {
            Materialized::Stored(stored) => stored,
            other => panic!("Expected stored upload, got {:?}", other),
        };

        let path = stored.path().to_path_buf();
        assert!(path.starts_with(temp_dir.path().join("uploads")));
        assert_eq!(std::fs::read(&path).unwrap(), b"<item/>");
        assert_eq!(stored.bytes_written(), 7);

        drop(stored);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_materialize_from_stream() {
        let temp_dir = TempDir::new().unwrap();
        let materializer = Materializer::new(temp_dir.path());
        let reader = std::io::Cursor::new(b"streamed".to_vec());

        let candidate = UploadCandidate::from_reader("s.xml", 8, reader);
        let name = candidate.name().to_string();

        match materializer
            .materialize(&name, candidate.into_source(), 8)
            .await
            .unwrap()
        {
            Materialized::Stored(stored) => {
                assert_eq!(std::fs::read(stored.path()).unwrap(), b"streamed")
            }
            other => panic!("Expected stored upload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_materialize_detects_oversized_stream() {
        let temp_dir = TempDir::new().unwrap();
        let materializer = Materializer::new(temp_dir.path());

        let result = materializer
            .materialize("big.xml", UploadSource::Bytes(vec![b'x'; 100]), 10)
            .await
            .unwrap();

        match result {
            Materialized::TooLarge { bytes_seen } => assert_eq!(bytes_seen, 11),
            other => panic!("Expected TooLarge, got {:?}", other),
        }
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_materialize_into_unwritable_root_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let materializer = Materializer::new(&blocker);
        let result = materializer
            .materialize("a.xml", UploadSource::Bytes(vec![]), 10)
            .await;

        assert!(matches!(result, Err(PipelineError::Materialize { .. })));
    }
}
