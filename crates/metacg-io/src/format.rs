//! File-level information: format version, generator, top-level sections.
//!
//! Every MetaCG document is a JSON object with two sections:
//!
//! ```json
//! {
//!   "_MetaCG": {"generator": {"name": "...", "sha": "...", "version": "0.1"}, "version": "4.0"},
//!   "_CG": { ... }
//! }
//! ```
//!
//! Versions 3 and 4 may additionally carry graph-level metadata as
//! `_MetaCG.meta`.

use std::fmt;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::FormatError;

/// Key of the meta-info section.
pub const META_INFO_FIELD: &str = "_MetaCG";
/// Key of the call-graph section.
pub const CG_FIELD: &str = "_CG";
/// Key of graph-level metadata inside the meta-info section.
pub const GRAPH_META_FIELD: &str = "meta";

/// `major.minor` format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
}

impl FormatVersion {
    pub const V2: FormatVersion = FormatVersion::new(2, 0);
    pub const V3: FormatVersion = FormatVersion::new(3, 0);
    pub const V4: FormatVersion = FormatVersion::new(4, 0);

    pub const fn new(major: u32, minor: u32) -> Self {
        FormatVersion { major, minor }
    }

    /// Parses `"4"`, `"4.0"` or `"4.1"` style strings.
    pub fn parse(text: &str) -> Result<Self, FormatError> {
        let unsupported = || FormatError::UnsupportedVersion {
            version: text.to_string(),
        };
        let mut parts = text.trim().splitn(2, '.');
        let major = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(unsupported)?;
        let minor = match parts.next() {
            Some(p) => p.parse::<u32>().map_err(|_| unsupported())?,
            None => 0,
        };
        Ok(FormatVersion { major, minor })
    }

    /// The latest version with the given major number.
    pub fn for_major(major: u32) -> Option<Self> {
        match major {
            2 => Some(Self::V2),
            3 => Some(Self::V3),
            4 => Some(Self::V4),
            _ => None,
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Identification of the tool that produced a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorInfo {
    pub name: String,
    pub major: u32,
    pub minor: u32,
    pub sha: String,
}

impl GeneratorInfo {
    pub fn new(name: impl Into<String>, major: u32, minor: u32, sha: impl Into<String>) -> Self {
        GeneratorInfo {
            name: name.into(),
            major,
            minor,
            sha: sha.into(),
        }
    }

    pub fn version_string(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

impl Default for GeneratorInfo {
    /// This library, with the sha taken from `METACG_GIT_SHA` at build time.
    fn default() -> Self {
        let major = env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0);
        let minor = env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0);
        GeneratorInfo::new("MetaCG", major, minor, option_env!("METACG_GIT_SHA").unwrap_or(""))
    }
}

/// Everything a writer puts into the `_MetaCG` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub format: FormatVersion,
    pub generator: GeneratorInfo,
}

impl FileInfo {
    pub fn new(format: FormatVersion, generator: GeneratorInfo) -> Self {
        FileInfo { format, generator }
    }

    /// Default file info for the given format version.
    pub fn for_version(format: FormatVersion) -> Self {
        FileInfo::new(format, GeneratorInfo::default())
    }

    /// Builds the `_MetaCG` object.
    pub fn header(&self) -> Value {
        json!({
            "version": self.format.to_string(),
            "generator": {
                "name": self.generator.name,
                "sha": self.generator.sha,
                "version": self.generator.version_string(),
            }
        })
    }
}

// -----------------------------------------------------------------------
// Reading the meta-info section
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct RawGenerator {
    name: String,
    version: String,
    #[serde(default)]
    sha: String,
}

/// Parsed `_MetaCG` section.
#[derive(Debug, Clone, Deserialize)]
pub struct MetaInfo {
    version: String,
    generator: RawGenerator,
    #[serde(default)]
    meta: Option<Map<String, Value>>,
}

impl MetaInfo {
    /// Extracts and parses the `_MetaCG` section of `doc`.
    pub fn from_document(doc: &Value) -> Result<Self, FormatError> {
        let section = section(doc, META_INFO_FIELD)?;
        Ok(MetaInfo::deserialize(section)?)
    }

    pub fn version(&self) -> Result<FormatVersion, FormatError> {
        FormatVersion::parse(&self.version)
    }

    pub fn version_string(&self) -> &str {
        &self.version
    }

    pub fn generator_name(&self) -> &str {
        &self.generator.name
    }

    pub fn generator_version(&self) -> &str {
        &self.generator.version
    }

    pub fn generator_sha(&self) -> &str {
        &self.generator.sha
    }

    /// Graph-level metadata, if the file carries any.
    pub fn graph_meta(&self) -> Option<&Map<String, Value>> {
        self.meta.as_ref()
    }

    /// Fails unless the file's major version equals `expected`.
    pub fn expect_major(&self, expected: u32) -> Result<FormatVersion, FormatError> {
        let version = self.version()?;
        if version.major != expected {
            return Err(FormatError::VersionMismatch {
                expected,
                found: self.version.clone(),
            });
        }
        tracing::info!(
            version = %self.version,
            generator = %self.generator.name,
            generator_version = %self.generator.version,
            "reading MetaCG file"
        );
        Ok(version)
    }
}

/// Returns the non-null top-level section `name` of `doc`.
pub fn section<'a>(doc: &'a Value, name: &str) -> Result<&'a Value, FormatError> {
    match doc.get(name) {
        Some(Value::Null) | None => Err(FormatError::MissingSection {
            section: name.to_string(),
        }),
        Some(value) => Ok(value),
    }
}
