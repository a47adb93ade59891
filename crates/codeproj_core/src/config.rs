use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ProjectionError, Result};

pub const DEFAULT_NEGATIVES_PER_POSITIVE: usize = 1;
pub const DEFAULT_TRAIN_VAL_SPLIT: f32 = 0.8;
pub const DEFAULT_SEED: u64 = 0;
pub const DEFAULT_LEARNING_RATE: f32 = 0.1;
pub const DEFAULT_NUM_EPOCHS: usize = 25;
pub const DEFAULT_TOP_K: usize = 10;

/// Every tunable option of an experiment. Missing fields in a config file fall
/// back to the `DEFAULT_*` constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    pub negatives_per_positive: usize,
    pub train_val_split: f32,
    pub seed: u64,
    pub learning_rate: f32,
    pub num_epochs: usize,
    pub top_k: usize,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            negatives_per_positive: DEFAULT_NEGATIVES_PER_POSITIVE,
            train_val_split: DEFAULT_TRAIN_VAL_SPLIT,
            seed: DEFAULT_SEED,
            learning_rate: DEFAULT_LEARNING_RATE,
            num_epochs: DEFAULT_NUM_EPOCHS,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.sampler().validate()?;
        self.trainer().validate()?;
        if self.top_k == 0 {
            return Err(invalid("top_k must be > 0"));
        }
        Ok(())
    }

    pub fn sampler(&self) -> SamplerConfig {
        SamplerConfig {
            negatives_per_positive: self.negatives_per_positive,
            train_val_split: self.train_val_split,
            seed: self.seed,
        }
    }

    pub fn trainer(&self) -> TrainerConfig {
        TrainerConfig {
            learning_rate: self.learning_rate,
            num_epochs: self.num_epochs,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    pub negatives_per_positive: usize,
    pub train_val_split: f32,
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        ExperimentConfig::default().sampler()
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.train_val_split > 0.0 && self.train_val_split < 1.0) {
            return Err(invalid(format!(
                "train_val_split must be in (0, 1), got {}",
                self.train_val_split
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainerConfig {
    pub learning_rate: f32,
    pub num_epochs: usize,
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        ExperimentConfig::default().trainer()
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.learning_rate.is_finite() || self.learning_rate < 0.0 {
            return Err(invalid(format!(
                "learning_rate must be finite and >= 0, got {}",
                self.learning_rate
            )));
        }
        if self.num_epochs == 0 {
            return Err(invalid("num_epochs must be > 0"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ProjectionError {
    ProjectionError::InvalidConfig(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ExperimentConfig::default();
        assert_eq!(cfg.negatives_per_positive, 1);
        assert_eq!(cfg.train_val_split, 0.8);
        assert_eq!(cfg.learning_rate, 0.1);
        assert_eq!(cfg.num_epochs, 25);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"seed": 42, "top_k": 3}}"#).unwrap();

        let cfg = ExperimentConfig::load(file.path()).unwrap();
        assert_eq!(cfg.seed, 42);
        assert_eq!(cfg.top_k, 3);
        assert_eq!(cfg.num_epochs, DEFAULT_NUM_EPOCHS);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let bad_split = ExperimentConfig {
            train_val_split: 1.0,
            ..Default::default()
        };
        assert!(matches!(
            bad_split.validate(),
            Err(ProjectionError::InvalidConfig(_))
        ));

        let bad_lr = ExperimentConfig {
            learning_rate: f32::NAN,
            ..Default::default()
        };
        assert!(bad_lr.validate().is_err());

        let zero_k = ExperimentConfig {
            top_k: 0,
            ..Default::default()
        };
        assert!(zero_k.validate().is_err());
    }
}
