//! Builds labelled (query, snippet) pairs from a relevance dataset.
//!
//! Every listed snippet yields a positive pair. Negatives are drawn uniformly
//! from the snippets of *other* examples, excluding anything relevant to the
//! same query text, so a negative can never be a mislabelled positive.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SamplerConfig;
use crate::error::{ProjectionError, Result};
use crate::model::{Dataset, Label, Pair};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairSplit {
    pub train: Vec<Pair>,
    pub validation: Vec<Pair>,
}

impl PairSplit {
    pub fn len(&self) -> usize {
        self.train.len() + self.validation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pair> {
        self.train.iter().chain(self.validation.iter())
    }
}

/// Contiguous cut: the first `round(len * train_fraction)` pairs train, the rest validate.
pub fn split_pairs(mut pairs: Vec<Pair>, train_fraction: f32) -> PairSplit {
    let cut = ((pairs.len() as f32 * train_fraction).round() as usize).min(pairs.len());
    let validation = pairs.split_off(cut);
    PairSplit {
        train: pairs,
        validation,
    }
}

pub struct PairSampler<R = StdRng> {
    config: SamplerConfig,
    rng: R,
}

impl PairSampler<StdRng> {
    pub fn new(config: SamplerConfig) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(config.seed))
    }
}

impl<R: Rng> PairSampler<R> {
    pub fn with_rng(config: SamplerConfig, rng: R) -> Self {
        Self { config, rng }
    }

    /// Shuffled, deduplicated positives and negatives.
    pub fn sample(&mut self, dataset: &Dataset) -> Result<Vec<Pair>> {
        if dataset.is_empty() {
            return Err(ProjectionError::EmptyDataset);
        }
        if dataset.len() < 2 {
            return Err(ProjectionError::InsufficientNegatives);
        }

        let examples = dataset.examples();
        let mut relevant: HashMap<&str, HashSet<&str>> = HashMap::new();
        for ex in examples {
            relevant
                .entry(ex.query.as_str())
                .or_default()
                .extend(ex.snippets.iter().map(String::as_str));
        }

        let mut pairs = PairSet::default();
        for ex in examples {
            for snippet in &ex.snippets {
                pairs.insert(&ex.query, snippet, Label::Positive);
            }
        }
        let positives = pairs.len();

        let mut sourced = 0usize;
        for (i, ex) in examples.iter().enumerate() {
            let wanted = ex.snippets.len() * self.config.negatives_per_positive;
            if wanted == 0 {
                continue;
            }

            let excluded = &relevant[ex.query.as_str()];
            let mut seen = HashSet::new();
            let pool: Vec<&str> = examples
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .flat_map(|(_, other)| other.snippets.iter().map(String::as_str))
                .filter(|s| !excluded.contains(s) && seen.insert(*s))
                .collect();

            if pool.is_empty() {
                debug!(query = %ex.query, "no negative pool for example");
                continue;
            }
            sourced += 1;

            for _ in 0..wanted {
                if let Some(snippet) = pool.choose(&mut self.rng) {
                    pairs.insert(&ex.query, snippet, Label::Negative);
                }
            }
        }

        if positives > 0 && self.config.negatives_per_positive > 0 && sourced == 0 {
            return Err(ProjectionError::InsufficientNegatives);
        }

        let mut pairs = pairs.into_vec();
        pairs.shuffle(&mut self.rng);

        info!(
            total = pairs.len(),
            positives,
            negatives = pairs.len() - positives,
            "sampled pairs"
        );
        Ok(pairs)
    }

    pub fn sample_split(&mut self, dataset: &Dataset) -> Result<PairSplit> {
        self.config.validate()?;
        let pairs = self.sample(dataset)?;
        Ok(split_pairs(pairs, self.config.train_val_split))
    }
}

/// Insertion-ordered pair set keyed by (query, snippet); a positive label
/// overrides a negative one for the same key.
#[derive(Default)]
struct PairSet {
    pairs: Vec<Pair>,
    index: HashMap<(String, String), usize>,
}

impl PairSet {
    fn insert(&mut self, query: &str, snippet: &str, label: Label) {
        let key = (query.to_string(), snippet.to_string());
        match self.index.get(&key) {
            Some(&idx) => {
                if label == Label::Positive {
                    self.pairs[idx].label = Label::Positive;
                }
            }
            None => {
                self.index.insert(key, self.pairs.len());
                self.pairs.push(Pair::new(query, snippet, label));
            }
        }
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }

    fn into_vec(self) -> Vec<Pair> {
        self.pairs
    }
}
