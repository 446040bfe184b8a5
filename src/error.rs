use std::sync::Arc;

pub use anyhow::Error as CalcError;
use thiserror::Error;

/// Cloneable failure reason recorded against an artifact whose calculation
/// failed. Reasons originate in userland calculators as [`anyhow::Error`]
/// values; the same reason is stored both on the failed node and in the
/// error-origin map of the [`Graph`](crate::Graph), hence the `Arc`.
#[derive(Debug, Error, Clone)]
#[error(transparent)]
pub struct Reason(#[from] pub(crate) Arc<anyhow::Error>);

impl Reason {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }
}

impl From<anyhow::Error> for Reason {
    fn from(e: anyhow::Error) -> Self {
        Reason(Arc::new(e))
    }
}

#[derive(Debug, Error)]
pub enum KakehashiError {
    #[error("Invalid diagnostics filter pattern.\n{0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Error while writing the generated bundle.\n{0}")]
    Output(#[from] OutputError),
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Couldn't write generated code to disk.\n{0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Couldn't serialize the import manifest.\n{0}")]
    Manifest(#[from] serde_json::Error),
}
