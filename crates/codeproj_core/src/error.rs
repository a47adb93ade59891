use std::fmt;
use std::io;

use thiserror::Error;

/// Which half of a train/validation split an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSetKind {
    Training,
    Validation,
}

impl fmt::Display for PairSetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairSetKind::Training => f.write_str("training"),
            PairSetKind::Validation => f.write_str("validation"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProjectionError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("dataset contains no examples")]
    EmptyDataset,

    #[error("{0} pair set is empty")]
    EmptyPairSet(PairSetKind),

    #[error("retrieval corpus is empty")]
    EmptyCorpus,

    #[error("no example has another example to draw negatives from")]
    InsufficientNegatives,

    #[error("training diverged at epoch {epoch}: loss={loss}")]
    DivergedTraining { epoch: usize, loss: f32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("embedding provider failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ProjectionError {
    pub(crate) fn check_dim(expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(ProjectionError::DimensionMismatch { expected, actual })
        }
    }
}

pub type Result<T> = std::result::Result<T, ProjectionError>;
