use std::fmt;

/// Error taxonomy shared by all three engines. Internal functions return
/// `Result<T, EngineError>`; the `#[pg_extern]` boundary converts an `Err`
/// into `pgrx::error!`, which aborts the current transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidPath(String),
    InvalidEventType(String),
    NotFound(String),
    CrossRepository(String),
    CrossSchemaMismatch(String),
    ConcurrencyConflict(String),
    MergeRequiresResolutions(String),
    RebaseBlocked(String),
    ParameterizedFragmentRejected(String),
    InvariantViolation(String),
    ExhaustedHistory(String),
    Spi(String),
}

impl EngineError {
    fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "InvalidPath",
            Self::InvalidEventType(_) => "InvalidEventType",
            Self::NotFound(_) => "NotFound",
            Self::CrossRepository(_) => "CrossRepository",
            Self::CrossSchemaMismatch(_) => "CrossSchemaMismatch",
            Self::ConcurrencyConflict(_) => "ConcurrencyConflict",
            Self::MergeRequiresResolutions(_) => "MergeRequiresResolutions",
            Self::RebaseBlocked(_) => "RebaseBlocked",
            Self::ParameterizedFragmentRejected(_) => "ParameterizedFragmentRejected",
            Self::InvariantViolation(_) => "InvariantViolation",
            Self::ExhaustedHistory(_) => "ExhaustedHistory",
            Self::Spi(_) => "Spi",
        }
    }

    fn detail(&self) -> &str {
        match self {
            Self::InvalidPath(s)
            | Self::InvalidEventType(s)
            | Self::NotFound(s)
            | Self::CrossRepository(s)
            | Self::CrossSchemaMismatch(s)
            | Self::ConcurrencyConflict(s)
            | Self::MergeRequiresResolutions(s)
            | Self::RebaseBlocked(s)
            | Self::ParameterizedFragmentRejected(s)
            | Self::InvariantViolation(s)
            | Self::ExhaustedHistory(s)
            | Self::Spi(s) => s,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.detail())
    }
}

impl From<pgrx::spi::Error> for EngineError {
    fn from(e: pgrx::spi::Error) -> Self {
        Self::Spi(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Unwrap a `Result` at the `#[pg_extern]` boundary, raising a Postgres
/// `ERROR` (via `pgrx::error!`) on failure. Never returns on `Err`.
#[macro_export]
macro_rules! ok_or_pg_error {
    ($result:expr) => {
        match $result {
            Ok(v) => v,
            Err(e) => pgrx::error!("{}", e),
        }
    };
}
