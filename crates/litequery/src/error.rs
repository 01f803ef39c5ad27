use thiserror::Error;

/// Errors reported by the query layer.
///
/// Engine-originated errors keep the engine's message verbatim; the
/// remaining variants describe misuse of the layer itself (closed handles,
/// bad parameters, invalid arguments).
#[derive(Debug, Error)]
pub enum Error {
    /// Operation attempted on a closed database or query.
    #[error("{0} is closed")]
    Closed(&'static str),

    /// A parameter could not be bound (unknown name, position out of range).
    #[error("invalid parameter: {0}")]
    Parameter(String),

    /// The engine reported a syntax or execution error.
    #[error("{0}")]
    Sql(String),

    /// The engine reported contention that the retry policy did not resolve.
    #[error("database is busy")]
    Busy,

    /// A step was aborted by an interrupt.
    #[error("query was interrupted")]
    Interrupted,

    /// Invalid argument to the layer (empty SQL, bad limit category, etc.).
    #[error("{0}")]
    Argument(String),

    /// Unexpected engine return code or value type.
    #[error("{message}")]
    Engine { code: i32, message: String },
}

impl Error {
    pub fn parameter(msg: impl Into<String>) -> Self {
        Self::Parameter(msg.into())
    }

    pub fn sql(msg: impl Into<String>) -> Self {
        Self::Sql(msg.into())
    }

    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    pub fn engine(code: i32, message: impl Into<String>) -> Self {
        Self::Engine {
            code,
            message: message.into(),
        }
    }

    /// Whether the error was caused by contention or cancellation rather
    /// than by the query itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy | Self::Interrupted)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) => Self::Busy,
            Some(rusqlite::ErrorCode::OperationInterrupted) => Self::Interrupted,
            _ => Self::Sql(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
