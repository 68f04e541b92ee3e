//! Output buffer for writers.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde_json::Value;

use crate::error::FormatError;

/// Holds the complete document produced by a writer.
///
/// A writer replaces the content in one step, so [`json`](Self::json) never
/// observes a half-written document.
#[derive(Debug, Clone, Default)]
pub struct JsonSink {
    value: Value,
}

impl JsonSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_json(&mut self, value: Value) {
        self.value = value;
    }

    pub fn json(&self) -> &Value {
        &self.value
    }

    pub fn into_json(self) -> Value {
        self.value
    }

    /// Writes the document in compact form.
    pub fn output(&self, out: &mut impl Write) -> Result<(), FormatError> {
        serde_json::to_writer(&mut *out, &self.value)?;
        out.flush().map_err(FormatError::Write)
    }

    /// Writes the document indented, followed by a newline.
    pub fn output_pretty(&self, out: &mut impl Write) -> Result<(), FormatError> {
        serde_json::to_writer_pretty(&mut *out, &self.value)?;
        writeln!(out).map_err(FormatError::Write)?;
        out.flush().map_err(FormatError::Write)
    }

    /// Writes the document to `path`, replacing any existing file.
    pub fn write_file(&self, path: &Path, pretty: bool) -> Result<(), FormatError> {
        let io_error = |source| FormatError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut out = BufWriter::new(File::create(path).map_err(io_error)?);
        if pretty {
            self.output_pretty(&mut out)
        } else {
            self.output(&mut out)
        }
    }

    /// The document as a compact string.
    pub fn to_compact_string(&self) -> String {
        self.value.to_string()
    }
}
