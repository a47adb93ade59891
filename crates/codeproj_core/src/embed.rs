use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{ProjectionError, Result};

/// Maps text to a fixed-dimension vector. Must be deterministic for identical text.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    fn dim(&self) -> usize;
}

impl EmbeddingProvider for Box<dyn EmbeddingProvider> {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        (**self).embed(text)
    }

    fn dim(&self) -> usize {
        (**self).dim()
    }
}

/// Bag-of-tokens embedder: each alphanumeric token is FNV-hashed into a bucket,
/// and the resulting count vector is L2-normalised.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dim: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self { dim: 256 }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ u64::from(*b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

impl EmbeddingProvider for HashEmbeddingProvider {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dim];

        // Identifiers like `parse_header` also contribute their parts.
        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let lower = token.to_lowercase();
            v[(fnv1a(lower.as_bytes()) as usize) % self.dim] += 1.0;
            if lower.contains('_') {
                for part in lower.split('_').filter(|p| !p.is_empty()) {
                    v[(fnv1a(part.as_bytes()) as usize) % self.dim] += 0.5;
                }
            }
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }

        Ok(v)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Content-addressed memo of embeddings, keyed by exact text.
///
/// Lookups that miss are resolved by calling the provider once and storing the
/// result; a text is never embedded twice for the lifetime of the cache.
pub struct EmbeddingCache<E> {
    provider: E,
    dim: usize,
    entries: HashMap<String, DVector<f32>>,
}

impl<E: EmbeddingProvider> EmbeddingCache<E> {
    pub fn new(provider: E) -> Self {
        let dim = provider.dim();
        Self {
            provider,
            dim,
            entries: HashMap::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, text: &str) -> bool {
        self.entries.contains_key(text)
    }

    pub fn get(&self, text: &str) -> Option<&DVector<f32>> {
        self.entries.get(text)
    }

    pub fn get_or_embed(&mut self, text: &str) -> Result<&DVector<f32>> {
        if !self.entries.contains_key(text) {
            let embedding = self.compute(text)?;
            self.entries.insert(text.to_string(), embedding);
        }
        Ok(&self.entries[text])
    }

    /// Embeds every text not yet cached. Distinct missing texts are sent to the
    /// provider in parallel.
    pub fn warm<'a, I>(&mut self, texts: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut missing: Vec<&str> = texts
            .into_iter()
            .filter(|t| !self.entries.contains_key(*t))
            .collect();
        missing.sort_unstable();
        missing.dedup();

        if missing.is_empty() {
            return Ok(());
        }
        debug!(count = missing.len(), "embedding uncached texts");

        let computed: Vec<DVector<f32>> = missing
            .par_iter()
            .map(|text| self.compute(text))
            .collect::<Result<_>>()?;

        for (text, embedding) in missing.into_iter().zip(computed) {
            self.entries.insert(text.to_string(), embedding);
        }
        Ok(())
    }

    /// Stacks the embeddings of `texts` as columns of a `dim x texts.len()` matrix.
    pub fn matrix_of<'a, I>(&mut self, texts: I) -> Result<DMatrix<f32>>
    where
        I: IntoIterator<Item = &'a str>,
        I::IntoIter: Clone,
    {
        let texts = texts.into_iter();
        self.warm(texts.clone())?;

        let columns: Vec<&DVector<f32>> = texts.map(|t| &self.entries[t]).collect();
        let mut out = DMatrix::zeros(self.dim, columns.len());
        for (j, column) in columns.into_iter().enumerate() {
            out.set_column(j, column);
        }
        Ok(out)
    }

    fn compute(&self, text: &str) -> Result<DVector<f32>> {
        let raw = self
            .provider
            .embed(text)
            .map_err(ProjectionError::Embedding)?;
        ProjectionError::check_dim(self.dim, raw.len())?;
        Ok(DVector::from_vec(raw))
    }
}
