use std::path::PathBuf;

use thiserror::Error;

use crate::dataset::FormatError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("request to market data provider failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("market data provider rejected {symbol}: {message}")]
    Provider { symbol: String, message: String },

    #[error("market data provider returned no bars for any ticker")]
    EmptyDataset,

    #[error("dataset {} is malformed: {source}", path.display())]
    Corrupt { path: PathBuf, source: FormatError },

    #[error("i/o error on {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("couldn't render chart: {0}")]
    Render(String),

    #[error("invalid config: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }

    /// Fatal errors abort the run. Everything else leaves the data directory
    /// usable and is reported and skipped.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Http(_)
            | Error::Provider { .. }
            | Error::EmptyDataset
            | Error::Corrupt { .. } => false,
            Error::Io { .. } | Error::Render(_) | Error::Config(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::dataset::FormatError;

    #[test]
    fn classifies_fatality() {
        assert!(!Error::EmptyDataset.is_fatal());
        let corrupt = Error::Corrupt {
            path: "data/x.csv".into(),
            source: FormatError::MissingHeader,
        };
        assert!(!corrupt.is_fatal());
        assert!(Error::Render(String::from("no fonts")).is_fatal());
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(Error::io("data", denied).is_fatal());
    }
}
