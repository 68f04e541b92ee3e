//! Where readers get their JSON from.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::FormatError;
use crate::format::{FormatVersion, MetaInfo};

/// Supplier of a whole MetaCG document.
pub trait ReaderSource {
    /// Returns the parsed document. May be called more than once.
    fn get(&mut self) -> Result<Value, FormatError>;

    /// The version declared in the document's `_MetaCG` section.
    fn format_version(&mut self) -> Result<FormatVersion, FormatError> {
        let doc = self.get()?;
        MetaInfo::from_document(&doc)?.version()
    }
}

/// Reads a document from disk on first use and keeps it.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    cached: Option<Value>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSource {
            path: path.into(),
            cached: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Value, FormatError> {
        let text = fs::read_to_string(&self.path).map_err(|source| FormatError::Io {
            path: self.path.clone(),
            source,
        })?;
        let doc = serde_json::from_str(&text)?;
        tracing::debug!(path = %self.path.display(), bytes = text.len(), "loaded input file");
        Ok(doc)
    }
}

impl ReaderSource for FileSource {
    fn get(&mut self) -> Result<Value, FormatError> {
        if let Some(doc) = &self.cached {
            return Ok(doc.clone());
        }
        let doc = self.load()?;
        self.cached = Some(doc.clone());
        Ok(doc)
    }
}

/// An already parsed document held in memory.
#[derive(Debug, Clone)]
pub struct JsonSource {
    doc: Value,
}

impl JsonSource {
    pub fn new(doc: Value) -> Self {
        JsonSource { doc }
    }

    /// Parses `text` into a source.
    pub fn parse(text: &str) -> Result<Self, FormatError> {
        Ok(JsonSource::new(serde_json::from_str(text)?))
    }
}

impl ReaderSource for JsonSource {
    fn get(&mut self) -> Result<Value, FormatError> {
        Ok(self.doc.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn file_source_reads_and_caches() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"_MetaCG":{{"version":"3.0","generator":{{"name":"t","version":"0.1"}}}},"_CG":{{}}}}"#
        )
        .unwrap();

        let mut source = FileSource::new(file.path());
        assert_eq!(source.format_version().unwrap(), FormatVersion::V3);

        // The cached copy survives the file going away.
        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
        assert!(source.get().unwrap().get("_CG").is_some());
    }

    #[test]
    fn missing_file_reports_path() {
        let mut source = FileSource::new("/definitely/not/here.mcg");
        match source.get() {
            Err(FormatError::Io { path, .. }) => assert_eq!(path, PathBuf::from("/definitely/not/here.mcg")),
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[test]
    fn json_source_version() {
        let mut source = JsonSource::new(json!({"_MetaCG": {"version": "2.0", "generator": {"name": "x", "version": "1.0"}}}));
        assert_eq!(source.format_version().unwrap(), FormatVersion::V2);
        assert!(JsonSource::parse("{not json").is_err());
    }
}
