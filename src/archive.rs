//! Archive inspection: integrity testing, listing and extraction of `.zip` uploads.
//!
//! Everything here is synchronous; the pipeline runs it on the blocking thread pool.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use zip::ZipArchive;
use zip::result::{ZipError, ZipResult};

use crate::upload::timestamp_prefix;

/// Result of a full-content integrity test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityReport {
    /// Every member decompressed and matched its checksum
    Intact,
    /// The file opened but is not a zip archive the reader understands
    Malformed(String),
    /// The file could not be read
    Unreadable(String),
    /// Name of the first member that failed to decompress or verify
    CorruptedMember(String),
    /// Name of the first member stored with a method or encryption the reader lacks
    Unsupported(String),
}

/// Transient extraction directory owned by a single validation run
#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: TempDir,
}

impl ScratchWorkspace {
    /// Create a uniquely named directory inside `root`
    pub fn create_in(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&timestamp_prefix())
            .suffix(".extract")
            .tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, reporting failures instead of swallowing them
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

/// What came of unpacking an archive
#[derive(Debug)]
pub enum ExtractOutcome {
    Extracted(ExtractedArchive),
    /// Members decompressed past `limit` bytes; the partial workspace is already gone
    TooLarge { limit: u64 },
    /// The archive could not be unpacked
    Failed,
}

/// An archive unpacked into a scratch workspace
#[derive(Debug)]
pub struct ExtractedArchive {
    workspace: ScratchWorkspace,
    members: Vec<PathBuf>,
}

impl ExtractedArchive {
    pub fn workspace(&self) -> &ScratchWorkspace {
        &self.workspace
    }

    /// Extracted XML members subject to content checks, in archive order
    pub fn members(&self) -> &[PathBuf] {
        &self.members
    }

    pub fn close(self) -> io::Result<()> {
        self.workspace.close()
    }
}

/// Whether an entry name denotes an XML document
pub fn is_xml_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".xml")
}

/// Whether an entry is exempt from content checks
pub fn is_reserved(name: &str, reserved: &[String]) -> bool {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| reserved.iter().any(|r| r == n))
}

fn open(path: &Path) -> ZipResult<ZipArchive<File>> {
    let file = File::open(path)?;
    ZipArchive::new(file)
}

pub struct ArchiveInspector;

impl ArchiveInspector {
    /// Read every member to the end so decompression and CRC checks run
    pub fn test_integrity(path: &Path) -> IntegrityReport {
        let mut archive = match open(path) {
            Ok(archive) => archive,
            Err(ZipError::Io(e)) => return IntegrityReport::Unreadable(e.to_string()),
            Err(e) => return IntegrityReport::Malformed(e.to_string()),
        };

        for index in 0..archive.len() {
            let name = archive
                .name_for_index(index)
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{}", index));

            let mut entry = match archive.by_index(index) {
                Ok(entry) => entry,
                Err(ZipError::UnsupportedArchive(detail)) => {
                    tracing::debug!(entry = %name, detail = %detail, "archive member not supported");
                    return IntegrityReport::Unsupported(name);
                }
                Err(e) => {
                    tracing::debug!(entry = %name, error = %e, "archive member unreadable");
                    return IntegrityReport::CorruptedMember(name);
                }
            };

            if let Err(e) = io::copy(&mut entry, &mut io::sink()) {
                tracing::debug!(entry = %name, error = %e, "archive member failed verification");
                return IntegrityReport::CorruptedMember(name);
            }
        }

        IntegrityReport::Intact
    }

    /// Entry names in archive order
    pub fn list_entries(path: &Path) -> ZipResult<Vec<String>> {
        let archive = open(path)?;
        Ok((0..archive.len())
            .filter_map(|index| archive.name_for_index(index).map(str::to_string))
            .collect())
    }

    /// Unpack into a fresh workspace under `scratch_root`, writing at most `limit` bytes
    pub fn extract(
        path: &Path,
        scratch_root: &Path,
        reserved: &[String],
        limit: u64,
    ) -> ExtractOutcome {
        match Self::try_extract(path, scratch_root, reserved, limit) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(archive = %path.display(), error = %e, "archive extraction failed");
                ExtractOutcome::Failed
            }
        }
    }

    fn try_extract(
        path: &Path,
        scratch_root: &Path,
        reserved: &[String],
        limit: u64,
    ) -> ZipResult<ExtractOutcome> {
        let mut archive = open(path)?;
        let workspace = ScratchWorkspace::create_in(scratch_root)?;
        let mut members = Vec::new();
        let mut written: u64 = 0;

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;

            let Some(relative) = sanitized_path(entry.name()) else {
                tracing::debug!(entry = %entry.name(), "archive entry has no usable path");
                continue;
            };
            if entry.enclosed_name().is_none() {
                tracing::warn!(
                    entry = %entry.name(),
                    placed = %relative.display(),
                    "archive entry points outside the workspace, extracting under a sanitised path"
                );
            }

            if entry.is_dir() {
                if let Err(e) = fs::create_dir_all(workspace.path().join(&relative)) {
                    tracing::debug!(entry = %entry.name(), error = %e, "directory entry not created");
                }
                continue;
            }

            let (target, mut out) = create_member(workspace.path(), &relative)?;
            let remaining = limit.saturating_sub(written);
            let copied = io::copy(&mut (&mut entry).take(remaining.saturating_add(1)), &mut out)?;
            written = written.saturating_add(copied);
            if written > limit {
                tracing::info!(
                    archive = %path.display(),
                    entry = %entry.name(),
                    limit,
                    "archive exceeds the extraction limit"
                );
                return Ok(ExtractOutcome::TooLarge { limit });
            }

            if is_xml_name(entry.name()) && !is_reserved(entry.name(), reserved) {
                members.push(target);
            }
        }

        tracing::debug!(
            archive = %path.display(),
            workspace = %workspace.path().display(),
            members = members.len(),
            bytes = written,
            "extracted archive"
        );

        Ok(ExtractOutcome::Extracted(ExtractedArchive { workspace, members }))
    }
}

/// Entry path relative to the workspace, keeping only its normal components.
///
/// `..`, root and prefix components are dropped, so `../evil.xml` becomes `evil.xml`.
fn sanitized_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let path: PathBuf = Path::new(&normalized)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    (!path.as_os_str().is_empty()).then_some(path)
}

/// Create the file for one member.
///
/// Never overwrites: when the natural location is taken, the member goes into a fresh
/// subdirectory of `root` under its own file name.
fn create_member(root: &Path, relative: &Path) -> io::Result<(PathBuf, File)> {
    let target = root.join(relative);
    let created = match target.parent() {
        Some(parent) => fs::create_dir_all(parent).and_then(|()| File::create_new(&target)),
        None => File::create_new(&target),
    };

    match created {
        Ok(file) => Ok((target, file)),
        Err(e) => {
            tracing::debug!(path = %target.display(), error = %e, "member location taken, relocating");
            let file_name = relative.file_name().ok_or(e)?;
            let target = tempfile::Builder::new()
                .prefix("member")
                .tempdir_in(root)?
                .keep()
                .join(file_name);
            let file = File::create_new(&target)?;
            Ok((target, file))
        }
    }
}
