//! Errors raised while reading manifests.

use std::path::PathBuf;

/// Unreadable or malformed input. Surfaced before any run is attempted.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no manifest files given")]
    NoInput,

    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("pattern '{0}' matched no files")]
    NoMatch(String),

    #[error("invalid pattern '{pattern}': {message}")]
    BadPattern { pattern: String, message: String },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin}: malformed YAML: {message}")]
    Yaml { origin: String, message: String },

    #[error("{origin}: {message}")]
    Malformed { origin: String, message: String },

    #[error("{origin}: unsupported apiVersion '{api_version}'")]
    UnsupportedApiVersion { origin: String, api_version: String },

    #[error("{origin}: resource is missing required field '{field}'")]
    MissingField { origin: String, field: &'static str },

    #[error("{origin}: unknown kind '{kind}'")]
    UnknownKind { origin: String, kind: String },

    #[error("{origin}: invalid {kind} spec for '{name}': {message}")]
    InvalidSpec {
        origin: String,
        kind: String,
        name: String,
        message: String,
    },
}

impl LoadError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            LoadError::NoInput => "MATLAS-LOAD-001",
            LoadError::NotFound(_) => "MATLAS-LOAD-002",
            LoadError::NoMatch(_) => "MATLAS-LOAD-003",
            LoadError::Io { .. } => "MATLAS-LOAD-004",
            LoadError::Yaml { .. } => "MATLAS-LOAD-005",
            LoadError::Malformed { .. } => "MATLAS-LOAD-006",
            LoadError::UnsupportedApiVersion { .. } => "MATLAS-LOAD-007",
            LoadError::MissingField { .. } => "MATLAS-LOAD-008",
            LoadError::UnknownKind { .. } => "MATLAS-LOAD-009",
            LoadError::InvalidSpec { .. } => "MATLAS-LOAD-010",
            LoadError::BadPattern { .. } => "MATLAS-LOAD-011",
        }
    }

    /// Remediation hint, when there is a useful one.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            LoadError::NoInput => Some("pass one or more manifests with -f".into()),
            LoadError::NoMatch(_) => Some("check the pattern and the working directory".into()),
            LoadError::BadPattern { .. } => {
                Some("patterns support `*`, `?`, `**` and `[...]` classes".into())
            }
            LoadError::UnsupportedApiVersion { .. } => Some(format!(
                "use one of: {}",
                crate::manifest::API_VERSIONS.join(", ")
            )),
            LoadError::MissingField { field, .. } => {
                Some(format!("add '{field}' to the resource"))
            }
            LoadError::UnknownKind { .. } => Some(format!(
                "supported kinds: ApplyDocument, {}",
                crate::kind::ResourceKind::ALL
                    .iter()
                    .map(|k| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            _ => None,
        }
    }
}
