use crate::markers::MarkerError;

pub mod codes {
    pub const MARKER_SYNTAX: &str = "PL100";
    pub const MARKER_COMPARISON: &str = "PL101";
    pub const LOCK_PARSE: &str = "PL200";
    pub const REQUIREMENTS_PARSE: &str = "PL210";
    pub const HASH_MISMATCH: &str = "PL300";
    pub const PYTHON_MISMATCH: &str = "PL310";
    pub const NOT_SUPPORTED: &str = "PL400";
}

/// Errors raised while turning lock files and manifests into a canonical model.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LockError {
    #[error(transparent)]
    Marker(#[from] MarkerError),
    #[error("[PL200] failed to parse {file}: {reason}")]
    Parse { file: String, reason: String },
    #[error("[PL210] failed to parse requirements in {file}: {reason}")]
    Requirements { file: String, reason: String },
    #[error(
        "[PL300] {lock} hash {recorded:?} does not correspond to hash computed based on {manifest} {computed:?}, aborting deployment"
    )]
    HashMismatch {
        lock: String,
        manifest: String,
        recorded: String,
        computed: String,
    },
    #[error("[PL310] running Python version {running}, but {lock} requires Python version {required}")]
    PythonVersionMismatch {
        lock: String,
        running: String,
        required: String,
    },
    #[error("[PL400] {package}: source kind `{kind}` is not supported, only git is")]
    NotSupported { package: String, kind: String },
}

impl LockError {
    pub(crate) fn parse(file: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            file: file.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn requirements(file: &str, reason: impl Into<String>) -> Self {
        Self::Requirements {
            file: file.to_string(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Marker(err) => err.code(),
            Self::Parse { .. } => codes::LOCK_PARSE,
            Self::Requirements { .. } => codes::REQUIREMENTS_PARSE,
            Self::HashMismatch { .. } => codes::HASH_MISMATCH,
            Self::PythonVersionMismatch { .. } => codes::PYTHON_MISMATCH,
            Self::NotSupported { .. } => codes::NOT_SUPPORTED,
        }
    }
}

pub type LockResult<T> = Result<T, LockError>;
