use thiserror::Error;

pub use color_eyre::eyre::eyre;

/// An error reported by the database driver itself
///
/// The proxy forwards these untouched, so a caller sees the same
/// SQLSTATE/code/message it would see against a plain statement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("SQLSTATE[{sqlstate}] {message}")]
pub struct DriverError {
    /// Five-character SQLSTATE class/subclass
    pub sqlstate: String,
    /// Driver-specific error number, if the driver has one
    pub code: Option<i64>,
    pub message: String,
}

impl DriverError {
    pub fn new(sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sqlstate: sqlstate.into(),
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The operation needs a live statement and it could not be (re)created
    #[error("Not connected to the database")]
    NotConnected,

    /// The driver noticed that the physical connection is gone
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Reconnect failed after {attempts} attempt(s): {source}")]
    ReconnectFailed {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Bad config error: {0}")]
    BadConfigError(String),

    #[error("Library bug: {0}")]
    LibraryBug(#[from] color_eyre::Report),
}

impl Error {
    /// Whether this error means the physical connection has to be re-established
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Error::ConnectionLost(_) | Error::NotConnected => true,
            Error::ReconnectFailed { source, .. } => source.is_connection_lost(),
            _ => false,
        }
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

pub type Result<T> = std::result::Result<T, Error>;
