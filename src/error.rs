//! Error taxonomy shared by every stage of the pipeline.
use std::sync::Arc;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Structure could not be discovered or mapped. Fatal for that type.
    #[error("unsupported type `{type_name}`: {reason}")]
    UnsupportedType { type_name: String, reason: String },

    /// A runtime value (or a writer schema) disagrees with the inferred schema.
    #[error("schema mismatch at `{path}`: {detail}")]
    SchemaMismatch { path: String, detail: String },

    /// Decode could not instantiate the target type.
    #[error("cannot construct `{type_name}`: {reason}")]
    Construction { type_name: String, reason: String },

    /// A codec build failed; every caller waiting on that build sees this.
    #[error("codec build for `{type_name}` failed: {source}")]
    CacheBuild {
        type_name: String,
        #[source]
        source: Arc<Error>,
    },

    #[error("unresolved schema reference `{0}`")]
    UnresolvedReference(String),

    #[error("malformed avro payload: {0}")]
    Malformed(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("schema registry: {0}")]
    Registry(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn unsupported(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::UnsupportedType { type_name: type_name.into(), reason: reason.into() }
    }

    /// Mismatch at the current position; callers prepend their path segment on unwind.
    pub fn mismatch(detail: impl Into<String>) -> Self {
        Error::SchemaMismatch { path: String::new(), detail: detail.into() }
    }

    pub fn construction(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Construction { type_name: type_name.into(), reason: reason.into() }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Error::Malformed(detail.into())
    }

    /// Prefix a mismatch path with `segment` (`field` or `[3]`). Other variants pass through.
    pub fn at(self, segment: &str) -> Self {
        match self {
            Error::SchemaMismatch { path, detail } => {
                let path = if path.is_empty() {
                    segment.to_string()
                } else if path.starts_with('[') {
                    format!("{segment}{path}")
                } else {
                    format!("{segment}.{path}")
                };
                Error::SchemaMismatch { path, detail }
            }
            other => other,
        }
    }

    /// The error a failed cache build was caused by.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::CacheBuild { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
