use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::embed::EmbeddingProvider;

/// Provider backed by a lookup table, counting calls.
pub(crate) struct FixedEmbeddingProvider {
    dim: usize,
    table: HashMap<String, Vec<f32>>,
    calls: Arc<AtomicUsize>,
}

impl FixedEmbeddingProvider {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            dim,
            table: HashMap::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with<const N: usize>(mut self, text: &str, embedding: [f32; N]) -> Self {
        self.table.insert(text.to_string(), embedding.to_vec());
        self
    }

    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl EmbeddingProvider for FixedEmbeddingProvider {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no fixture embedding for {text:?}"))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}
