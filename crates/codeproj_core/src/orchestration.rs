use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ExperimentConfig, TrainerConfig};
use crate::embed::{EmbeddingCache, EmbeddingProvider};
use crate::error::Result;
use crate::eval::{compare_strategies, StrategyComparison};
use crate::model::Dataset;
use crate::pairs::{PairSampler, PairSplit};
use crate::retrieval::Retriever;
use crate::train::{sweep_learning_rates, SweepCandidate, Trainer, TrainingHistory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Sampling,
    Training,
    Evaluating,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentRun {
    pub run_id: String,
    pub dataset: String,
    pub status: RunStatus,
    pub requested_at: DateTime<Utc>,
    pub training_started_at: Option<DateTime<Utc>>,
    pub evaluation_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ExperimentRun {
    pub fn start(run_id: String, dataset: String) -> Self {
        Self {
            run_id,
            dataset,
            status: RunStatus::Sampling,
            requested_at: Utc::now(),
            training_started_at: None,
            evaluation_started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn on_pairs_sampled(&mut self) {
        if self.status != RunStatus::Sampling {
            return;
        }
        self.status = RunStatus::Training;
        self.training_started_at = Some(Utc::now());
    }

    pub fn on_training_completed(&mut self) {
        if self.status != RunStatus::Training {
            return;
        }
        self.status = RunStatus::Evaluating;
        self.evaluation_started_at = Some(Utc::now());
    }

    pub fn on_eval_completed(&mut self) {
        if self.status != RunStatus::Evaluating {
            return;
        }
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn on_failed(&mut self, reason: impl Into<String>) {
        if self.is_finished() {
            return;
        }
        self.status = RunStatus::Failed;
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub run: ExperimentRun,
    pub config: ExperimentConfig,
    pub dim: usize,
    pub train_pairs: usize,
    pub validation_pairs: usize,
    pub learning_rate: f32,
    pub sweep: Vec<SweepCandidate>,
    pub history: TrainingHistory,
    pub comparison: StrategyComparison,
}

/// Drives sample -> train -> evaluate over one dataset, sharing a single
/// embedding cache across all stages.
pub struct Experiment<E> {
    config: ExperimentConfig,
    cache: EmbeddingCache<E>,
    run: ExperimentRun,
}

impl<E: EmbeddingProvider> Experiment<E> {
    pub fn new(provider: E, config: ExperimentConfig, run: ExperimentRun) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache: EmbeddingCache::new(provider),
            run,
        })
    }

    pub fn run(&self) -> &ExperimentRun {
        &self.run
    }

    pub fn cache(&self) -> &EmbeddingCache<E> {
        &self.cache
    }

    pub fn sample(&self, dataset: &Dataset) -> Result<PairSplit> {
        PairSampler::new(self.config.sampler()).sample_split(dataset)
    }

    /// Runs the full pipeline. `learning_rates` with more than one entry
    /// triggers a sweep; an empty slice uses the configured rate.
    pub fn execute(
        &mut self,
        dataset: &Dataset,
        learning_rates: &[f32],
    ) -> Result<ExperimentReport> {
        match self.execute_stages(dataset, learning_rates) {
            Ok(report) => Ok(report),
            Err(err) => {
                warn!(run_id = %self.run.run_id, error = %err, "experiment failed");
                self.run.on_failed(err.to_string());
                Err(err)
            }
        }
    }

    fn execute_stages(
        &mut self,
        dataset: &Dataset,
        learning_rates: &[f32],
    ) -> Result<ExperimentReport> {
        let split = self.sample(dataset)?;
        self.run.on_pairs_sampled();

        let trainer_config = self.config.trainer();
        let (trained, sweep) = match learning_rates {
            [] => (
                Trainer::new(self.cache.dim(), trainer_config).fit(&split, &mut self.cache)?,
                Vec::new(),
            ),
            [single] => {
                let config = TrainerConfig {
                    learning_rate: *single,
                    ..trainer_config
                };
                (
                    Trainer::new(self.cache.dim(), config).fit(&split, &mut self.cache)?,
                    Vec::new(),
                )
            }
            rates => sweep_learning_rates(trainer_config, rates, &split, &mut self.cache)?,
        };
        self.run.on_training_completed();

        let retriever = Retriever::from_dataset(dataset, &mut self.cache)?;
        let comparison = compare_strategies(
            dataset,
            &retriever,
            &trained.matrix,
            self.config.top_k,
            &mut self.cache,
        )?;
        self.run.on_eval_completed();

        info!(
            run_id = %self.run.run_id,
            plain = comparison.plain.recall_at_k,
            projected = comparison.projected.recall_at_k,
            cached_embeddings = self.cache.len(),
            "experiment complete"
        );

        Ok(ExperimentReport {
            run: self.run.clone(),
            config: ExperimentConfig {
                learning_rate: trained.learning_rate,
                ..self.config.clone()
            },
            dim: self.cache.dim(),
            train_pairs: split.train.len(),
            validation_pairs: split.validation.len(),
            learning_rate: trained.learning_rate,
            sweep,
            history: trained.history,
            comparison,
        })
    }
}
