use std::path::PathBuf;

/// Error type for the foundation crate.
///
/// Every variant is returned to the caller rather than aborting; a test that
/// returns `Result<(), Error>` fails with the message below when one of these
/// propagates out of it.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[cfg(feature = "sqlite")]
    #[error("{0}")]
    Rusqlite(rusqlite::Error),
    #[cfg(feature = "mysql")]
    #[error("{0}")]
    Mysql(String),
    #[cfg(feature = "postgres")]
    #[error("{0}")]
    Postgres(#[from] postgres::Error),
    /// The migrator could not be prepared; nothing was migrated.
    #[error("error setting up the migrator: {source}")]
    Setup { source: Box<Error> },
    /// A step below the current one was requested.
    #[error("down migrations not supported yet (current step {current}, requested step {target})")]
    DowngradeUnsupported { current: u32, target: u32 },
    #[error("migration to step {step} failed: {source}")]
    Migration { step: u32, source: Box<Error> },
    /// The interceptor registered at `step` returned an error.
    ///
    /// The message names the step only. The interceptor's own error is kept
    /// as the [source](std::error::Error::source).
    #[error("interceptor function for step {step} failed")]
    Interceptor { step: u32, source: Box<Error> },
    #[error("error tearing down migrator: {source}")]
    Teardown { source: Box<Error> },
    #[error("failed to run {sql}: {source}")]
    Exec { sql: String, source: Box<Error> },
    #[error("failed to read file {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{0}")]
    Generic(String),
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Self::Rusqlite(value)
    }
}

#[cfg(feature = "mysql")]
impl From<mysql::Error> for Error {
    fn from(value: mysql::Error) -> Self {
        Self::Mysql(value.to_string())
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Generic(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Self::Generic(value.to_string())
    }
}
