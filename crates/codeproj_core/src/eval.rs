use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::embed::{EmbeddingCache, EmbeddingProvider};
use crate::error::{ProjectionError, Result};
use crate::model::{Dataset, RetrievalResult, ScoredSnippet};
use crate::retrieval::{Retriever, Strategy, StrategyKind};
use crate::similarity::ProjectionMatrix;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub query: String,
    pub relevant: usize,
    pub hits: usize,
    pub recall: f32,
    pub reciprocal_rank: f32,
    pub ndcg: f32,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSummary {
    pub top_k: usize,
    pub total: usize,
    /// Mean recall@K over all examples; the headline score.
    pub recall_at_k: f32,
    pub mean_reciprocal_rank: f32,
    pub ndcg_at_k: f32,
    pub outcomes: Vec<QueryOutcome>,
}

/// Fraction of `relevant` found among the first `k` results. An example with
/// nothing relevant counts as fully recovered.
pub fn recall_at_k(retrieved: &[ScoredSnippet], relevant: &HashSet<&str>, k: usize) -> f32 {
    if relevant.is_empty() {
        return 1.0;
    }
    hits_at_k(retrieved, relevant, k) as f32 / relevant.len() as f32
}

fn hits_at_k(retrieved: &[ScoredSnippet], relevant: &HashSet<&str>, k: usize) -> usize {
    retrieved
        .iter()
        .take(k)
        .map(|r| r.snippet.as_str())
        .filter(|s| relevant.contains(s))
        .collect::<HashSet<_>>()
        .len()
}

fn reciprocal_rank(retrieved: &[ScoredSnippet], relevant: &HashSet<&str>, k: usize) -> f32 {
    if relevant.is_empty() {
        return 1.0;
    }
    retrieved
        .iter()
        .take(k)
        .position(|r| relevant.contains(r.snippet.as_str()))
        .map_or(0.0, |rank| 1.0 / (rank as f32 + 1.0))
}

/// Binary-gain nDCG over the first `k` results.
fn ndcg_at_k(retrieved: &[ScoredSnippet], relevant: &HashSet<&str>, k: usize) -> f32 {
    if relevant.is_empty() {
        return 1.0;
    }
    let discount = |rank: usize| 1.0 / (rank as f32 + 2.0).log2();

    let mut seen = HashSet::new();
    let dcg: f32 = retrieved
        .iter()
        .take(k)
        .enumerate()
        .filter(|(_, r)| relevant.contains(r.snippet.as_str()) && seen.insert(r.snippet.as_str()))
        .map(|(rank, _)| discount(rank))
        .sum();
    let ideal: f32 = (0..relevant.len().min(k)).map(discount).sum();

    if ideal == 0.0 {
        0.0
    } else {
        dcg / ideal
    }
}

/// Runs `strategy` on every example's query and scores the top `top_k` results
/// against that example's relevant snippets.
pub fn evaluate<F>(dataset: &Dataset, top_k: usize, mut strategy: F) -> Result<EvalSummary>
where
    F: FnMut(&str) -> Result<RetrievalResult>,
{
    if dataset.is_empty() {
        return Err(ProjectionError::EmptyDataset);
    }

    let mut outcomes = Vec::with_capacity(dataset.len());
    for example in dataset.examples() {
        let start = Instant::now();
        let retrieved = strategy(&example.query)?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let relevant: HashSet<&str> = example.snippets.iter().map(String::as_str).collect();
        outcomes.push(QueryOutcome {
            query: example.query.clone(),
            relevant: relevant.len(),
            hits: hits_at_k(&retrieved, &relevant, top_k),
            recall: recall_at_k(&retrieved, &relevant, top_k),
            reciprocal_rank: reciprocal_rank(&retrieved, &relevant, top_k),
            ndcg: ndcg_at_k(&retrieved, &relevant, top_k),
            latency_ms,
        });
    }

    Ok(EvalSummary {
        top_k,
        total: outcomes.len(),
        recall_at_k: mean_of(&outcomes, |o| o.recall),
        mean_reciprocal_rank: mean_of(&outcomes, |o| o.reciprocal_rank),
        ndcg_at_k: mean_of(&outcomes, |o| o.ndcg),
        outcomes,
    })
}

fn mean_of(outcomes: &[QueryOutcome], metric: impl Fn(&QueryOutcome) -> f32) -> f32 {
    outcomes.iter().map(metric).sum::<f32>() / outcomes.len() as f32
}

/// [`evaluate`] with the retriever itself as the strategy.
pub fn evaluate_retriever<E: EmbeddingProvider>(
    dataset: &Dataset,
    retriever: &Retriever,
    strategy: Strategy<'_>,
    top_k: usize,
    cache: &mut EmbeddingCache<E>,
) -> Result<EvalSummary> {
    let summary = evaluate(dataset, top_k, |query| {
        retriever.retrieve(query, strategy, top_k, cache)
    })?;
    info!(
        strategy = ?strategy.kind(),
        top_k,
        recall = summary.recall_at_k,
        mrr = summary.mean_reciprocal_rank,
        ndcg = summary.ndcg_at_k,
        "evaluated strategy"
    );
    Ok(summary)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyComparison {
    pub plain: EvalSummary,
    pub projected: EvalSummary,
}

impl StrategyComparison {
    /// Projected minus plain recall@K.
    pub fn recall_delta(&self) -> f32 {
        self.projected.recall_at_k - self.plain.recall_at_k
    }

    pub fn winner(&self) -> Option<StrategyKind> {
        match self.projected.recall_at_k.total_cmp(&self.plain.recall_at_k) {
            std::cmp::Ordering::Greater => Some(StrategyKind::Projected),
            std::cmp::Ordering::Less => Some(StrategyKind::Plain),
            std::cmp::Ordering::Equal => None,
        }
    }
}

pub fn compare_strategies<E: EmbeddingProvider>(
    dataset: &Dataset,
    retriever: &Retriever,
    projection: &ProjectionMatrix,
    top_k: usize,
    cache: &mut EmbeddingCache<E>,
) -> Result<StrategyComparison> {
    Ok(StrategyComparison {
        plain: evaluate_retriever(dataset, retriever, Strategy::Plain, top_k, cache)?,
        projected: evaluate_retriever(
            dataset,
            retriever,
            Strategy::Projected(projection),
            top_k,
            cache,
        )?,
    })
}
