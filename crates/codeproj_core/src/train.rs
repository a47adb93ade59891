//! Fits the projection matrix with full-batch Adam on the logistic loss.
//!
//! Each pair contributes `softplus(z) - y*z` where `z = s·(P q)`. The gradient
//! with respect to `P` is `sum_i (sigmoid(z_i) - y_i) s_i q_i^T`, so no autodiff
//! is needed.

use nalgebra::{DMatrix, RowDVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::TrainerConfig;
use crate::embed::{EmbeddingCache, EmbeddingProvider};
use crate::error::{PairSetKind, ProjectionError, Result};
use crate::model::Pair;
use crate::pairs::PairSplit;
use crate::similarity::{batch_similarity_with_projection, ProjectionMatrix};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f32,
    pub val_loss: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    pub fn best_val_loss(&self) -> Option<f32> {
        self.epochs
            .iter()
            .map(|e| e.val_loss)
            .min_by(|a, b| a.total_cmp(b))
    }
}

#[derive(Debug, Clone)]
pub struct TrainedProjection {
    pub matrix: ProjectionMatrix,
    pub history: TrainingHistory,
    pub learning_rate: f32,
}

impl TrainedProjection {
    fn final_val_loss(&self) -> f32 {
        self.history.last().map_or(f32::INFINITY, |e| e.val_loss)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepCandidate {
    pub learning_rate: f32,
    pub final_val_loss: f32,
}

/// Numerically stable `ln(1 + e^z)`.
fn softplus(z: f32) -> f32 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

fn sigmoid(z: f32) -> f32 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Embeddings of a pair set laid out column-wise, built once and reused every epoch.
pub(crate) struct PairBatch {
    queries: DMatrix<f32>,
    snippets: DMatrix<f32>,
    targets: RowDVector<f32>,
}

impl PairBatch {
    pub(crate) fn build<E: EmbeddingProvider>(
        pairs: &[Pair],
        kind: PairSetKind,
        cache: &mut EmbeddingCache<E>,
    ) -> Result<Self> {
        if pairs.is_empty() {
            return Err(ProjectionError::EmptyPairSet(kind));
        }
        Ok(Self {
            queries: cache.matrix_of(pairs.iter().map(|p| p.query.as_str()))?,
            snippets: cache.matrix_of(pairs.iter().map(|p| p.snippet.as_str()))?,
            targets: RowDVector::from_iterator(pairs.len(), pairs.iter().map(|p| p.label.target())),
        })
    }

    fn len(&self) -> usize {
        self.targets.len()
    }

    fn logits(&self, projection: &ProjectionMatrix) -> Result<RowDVector<f32>> {
        batch_similarity_with_projection(&self.queries, &self.snippets, projection)
    }

    pub(crate) fn mean_loss(&self, projection: &ProjectionMatrix) -> Result<f32> {
        let logits = self.logits(projection)?;
        let total: f32 = logits
            .iter()
            .zip(self.targets.iter())
            .map(|(&z, &y)| softplus(z) - y * z)
            .sum();
        Ok(total / self.len() as f32)
    }

    /// Mean loss and its gradient with respect to the projection.
    fn loss_and_gradient(&self, projection: &ProjectionMatrix) -> Result<(f32, DMatrix<f32>)> {
        let logits = self.logits(projection)?;
        let n = self.len() as f32;

        let mut total = 0.0f32;
        let mut weighted = self.snippets.clone();
        for ((mut column, &z), &y) in weighted
            .column_iter_mut()
            .zip(logits.iter())
            .zip(self.targets.iter())
        {
            total += softplus(z) - y * z;
            column *= (sigmoid(z) - y) / n;
        }

        Ok((total / n, weighted * self.queries.transpose()))
    }
}

/// Adam with PyTorch's default moment decay and epsilon.
struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    step: i32,
    m: DMatrix<f32>,
    v: DMatrix<f32>,
}

impl Adam {
    fn new(dim: usize, learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step: 0,
            m: DMatrix::zeros(dim, dim),
            v: DMatrix::zeros(dim, dim),
        }
    }

    fn update(&mut self, param: &mut DMatrix<f32>, grad: &DMatrix<f32>) {
        self.step += 1;
        let (b1, b2) = (self.beta1, self.beta2);
        self.m.zip_apply(grad, |m, g| *m = b1 * *m + (1.0 - b1) * g);
        self.v.zip_apply(grad, |v, g| *v = b2 * *v + (1.0 - b2) * g * g);

        let m_scale = 1.0 / (1.0 - b1.powi(self.step));
        let v_scale = 1.0 / (1.0 - b2.powi(self.step));
        let (lr, eps) = (self.learning_rate, self.eps);
        param.zip_zip_apply(&self.m, &self.v, |p, m, v| {
            *p -= lr * (m * m_scale) / ((v * v_scale).sqrt() + eps);
        });
    }
}

pub struct Trainer {
    config: TrainerConfig,
    projection: ProjectionMatrix,
}

impl Trainer {
    /// Starts from a standard-normal matrix seeded by `config.seed`.
    pub fn new(dim: usize, config: TrainerConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        Self::with_projection(ProjectionMatrix::random(dim, &mut rng), config)
    }

    pub fn with_projection(projection: ProjectionMatrix, config: TrainerConfig) -> Self {
        Self { config, projection }
    }

    pub fn projection(&self) -> &ProjectionMatrix {
        &self.projection
    }

    /// Mean logistic loss of `pairs` under the current matrix, without updating it.
    pub fn mean_loss<E: EmbeddingProvider>(
        &self,
        pairs: &[Pair],
        cache: &mut EmbeddingCache<E>,
    ) -> Result<f32> {
        PairBatch::build(pairs, PairSetKind::Training, cache)?.mean_loss(&self.projection)
    }

    pub fn fit<E: EmbeddingProvider>(
        self,
        split: &PairSplit,
        cache: &mut EmbeddingCache<E>,
    ) -> Result<TrainedProjection> {
        let train = PairBatch::build(&split.train, PairSetKind::Training, cache)?;
        let validation = PairBatch::build(&split.validation, PairSetKind::Validation, cache)?;
        self.fit_batches(&train, &validation)
    }

    fn fit_batches(
        mut self,
        train: &PairBatch,
        validation: &PairBatch,
    ) -> Result<TrainedProjection> {
        self.config.validate()?;
        ProjectionError::check_dim(self.projection.dim(), train.queries.nrows())?;

        let mut optimizer = Adam::new(self.projection.dim(), self.config.learning_rate);
        let mut history = TrainingHistory::default();

        for epoch in 0..self.config.num_epochs {
            let (train_loss, gradient) = train.loss_and_gradient(&self.projection)?;
            if !train_loss.is_finite() {
                return Err(ProjectionError::DivergedTraining {
                    epoch,
                    loss: train_loss,
                });
            }
            optimizer.update(self.projection.as_matrix_mut(), &gradient);

            let val_loss = validation.mean_loss(&self.projection)?;
            if !val_loss.is_finite() {
                return Err(ProjectionError::DivergedTraining {
                    epoch,
                    loss: val_loss,
                });
            }

            info!(epoch, train_loss, val_loss, "epoch complete");
            history.epochs.push(EpochRecord {
                epoch,
                train_loss,
                val_loss,
            });
        }

        Ok(TrainedProjection {
            matrix: self.projection,
            history,
            learning_rate: self.config.learning_rate,
        })
    }
}

/// Trains one model per learning rate from the same initial matrix and keeps
/// the one with the lowest final validation loss.
pub fn sweep_learning_rates<E: EmbeddingProvider>(
    base: TrainerConfig,
    learning_rates: &[f32],
    split: &PairSplit,
    cache: &mut EmbeddingCache<E>,
) -> Result<(TrainedProjection, Vec<SweepCandidate>)> {
    if learning_rates.is_empty() {
        return Err(ProjectionError::InvalidConfig(
            "at least one learning rate is required".to_string(),
        ));
    }

    let train = PairBatch::build(&split.train, PairSetKind::Training, cache)?;
    let validation = PairBatch::build(&split.validation, PairSetKind::Validation, cache)?;
    let dim = cache.dim();

    let mut best: Option<TrainedProjection> = None;
    let mut candidates = Vec::with_capacity(learning_rates.len());
    for &learning_rate in learning_rates {
        let config = TrainerConfig {
            learning_rate,
            ..base
        };
        let trained = Trainer::new(dim, config).fit_batches(&train, &validation)?;
        candidates.push(SweepCandidate {
            learning_rate,
            final_val_loss: trained.final_val_loss(),
        });
        info!(learning_rate, final_val_loss = trained.final_val_loss(), "sweep candidate");

        if best
            .as_ref()
            .map_or(true, |b| trained.final_val_loss() < b.final_val_loss())
        {
            best = Some(trained);
        }
    }

    let best = best.ok_or_else(|| {
        ProjectionError::InvalidConfig("learning-rate sweep produced no model".to_string())
    })?;
    Ok((best, candidates))
}
