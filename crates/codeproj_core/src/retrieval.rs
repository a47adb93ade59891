use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::embed::{EmbeddingCache, EmbeddingProvider};
use crate::error::{ProjectionError, Result};
use crate::model::{Dataset, RetrievalResult, ScoredSnippet};
use crate::similarity::ProjectionMatrix;

/// How a query embedding is scored against the corpus.
#[derive(Debug, Clone, Copy)]
pub enum Strategy<'a> {
    Plain,
    Projected(&'a ProjectionMatrix),
}

impl Strategy<'_> {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Plain => StrategyKind::Plain,
            Strategy::Projected(_) => StrategyKind::Projected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Plain,
    Projected,
}

/// A fixed snippet corpus with its embeddings stacked as columns.
pub struct Retriever {
    corpus: Vec<String>,
    embeddings: DMatrix<f32>,
}

impl Retriever {
    pub fn new<E: EmbeddingProvider>(
        corpus: Vec<String>,
        cache: &mut EmbeddingCache<E>,
    ) -> Result<Self> {
        if corpus.is_empty() {
            return Err(ProjectionError::EmptyCorpus);
        }
        let embeddings = cache.matrix_of(corpus.iter().map(String::as_str))?;
        Ok(Self { corpus, embeddings })
    }

    /// Corpus = every snippet in the dataset, in first-appearance order.
    pub fn from_dataset<E: EmbeddingProvider>(
        dataset: &Dataset,
        cache: &mut EmbeddingCache<E>,
    ) -> Result<Self> {
        Self::new(dataset.corpus(), cache)
    }

    pub fn corpus(&self) -> &[String] {
        &self.corpus
    }

    pub fn len(&self) -> usize {
        self.corpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpus.is_empty()
    }

    /// One score per corpus entry, in corpus order.
    pub fn scores(&self, query: &DVector<f32>, strategy: Strategy<'_>) -> Result<DVector<f32>> {
        let dim = self.embeddings.nrows();
        ProjectionError::check_dim(dim, query.len())?;
        match strategy {
            Strategy::Plain => Ok(self.embeddings.tr_mul(query)),
            Strategy::Projected(projection) => {
                ProjectionError::check_dim(dim, projection.dim())?;
                Ok(self.embeddings.tr_mul(&(projection.as_matrix() * query)))
            }
        }
    }

    pub fn rank(
        &self,
        query: &DVector<f32>,
        strategy: Strategy<'_>,
        top_k: usize,
    ) -> Result<RetrievalResult> {
        let scores = self.scores(query, strategy)?;
        let mut scored: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();

        // Stable: equal scores keep corpus order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(idx, score)| ScoredSnippet {
                snippet: self.corpus[idx].clone(),
                score,
            })
            .collect())
    }

    pub fn retrieve<E: EmbeddingProvider>(
        &self,
        query: &str,
        strategy: Strategy<'_>,
        top_k: usize,
        cache: &mut EmbeddingCache<E>,
    ) -> Result<RetrievalResult> {
        let query_embedding = cache.get_or_embed(query)?.clone();
        self.rank(&query_embedding, strategy, top_k)
    }
}
