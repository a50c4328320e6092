use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use validate_upload::PipelineConfig;

pub const VALID_ITEM: &[u8] = b"<?xml version=\"1.0\"?>\n<item id=\"1\"><name>Widget</name></item>\n";
pub const EMPTY_DOCUMENT: &[u8] = b"<document></document>";
pub const MALFORMED: &[u8] = b"This is not valid XML.";

/// Scratch environment for one test: an isolated upload root and schema path
pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.path().join("uploads")
    }

    pub fn schema_path(&self) -> PathBuf {
        self.path().join("schema.xsd")
    }

    pub fn config(&self) -> PipelineConfig {
        PipelineConfig {
            max_upload_size: 64 * 1024,
            schema_path: self.schema_path(),
            upload_dir: self.upload_dir(),
            max_concurrent_validations: 4,
            ..PipelineConfig::default()
        }
    }

    /// Entries left in the upload root, files and workspaces alike
    pub fn leftovers(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.upload_dir()) {
            Ok(entries) => entries.map(|entry| entry.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn write_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}

/// Zip archive bytes holding `entries` in order
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    zip_bytes_with(entries, CompressionMethod::Deflated)
}

pub fn zip_bytes_with(entries: &[(&str, &[u8])], method: CompressionMethod) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(method);
    for (name, content) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Stored single-member archive whose member data no longer matches its CRC
pub fn corrupted_zip_bytes(name: &str, content: &[u8]) -> Vec<u8> {
    let mut bytes = zip_bytes_with(&[(name, content)], CompressionMethod::Stored);
    let name_len = u16::from_le_bytes([bytes[26], bytes[27]]) as usize;
    let extra_len = u16::from_le_bytes([bytes[28], bytes[29]]) as usize;
    bytes[30 + name_len + extra_len] ^= 0xFF;
    bytes
}

/// Stored single-member archive whose compression method the reader does not recognise
pub fn unknown_method_zip_bytes(name: &str, content: &[u8]) -> Vec<u8> {
    let mut bytes = zip_bytes_with(&[(name, content)], CompressionMethod::Stored);
    let method = 0x7777u16.to_le_bytes();
    bytes[8..10].copy_from_slice(&method);
    let central = bytes
        .windows(4)
        .position(|window| window == b"PK\x01\x02")
        .unwrap();
    bytes[central + 10..central + 12].copy_from_slice(&method);
    bytes
}
