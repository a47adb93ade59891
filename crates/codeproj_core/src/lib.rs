pub mod config;
pub mod embed;
pub mod error;
pub mod eval;
pub mod model;
pub mod orchestration;
pub mod pairs;
pub mod retrieval;
pub mod similarity;
pub mod storage;
pub mod train;

#[cfg(test)]
mod test_support;

pub use config::{
    ExperimentConfig, SamplerConfig, TrainerConfig, DEFAULT_LEARNING_RATE,
    DEFAULT_NEGATIVES_PER_POSITIVE, DEFAULT_NUM_EPOCHS, DEFAULT_SEED, DEFAULT_TOP_K,
    DEFAULT_TRAIN_VAL_SPLIT,
};
pub use embed::{EmbeddingCache, EmbeddingProvider, HashEmbeddingProvider};
pub use error::{PairSetKind, ProjectionError, Result};
pub use eval::{
    compare_strategies, evaluate, evaluate_retriever, recall_at_k, EvalSummary, QueryOutcome,
    StrategyComparison,
};
pub use model::{Dataset, Example, Label, Pair, RetrievalResult, ScoredSnippet};
pub use orchestration::{Experiment, ExperimentReport, ExperimentRun, RunStatus};
pub use pairs::{split_pairs, PairSampler, PairSplit};
pub use retrieval::{Retriever, Strategy, StrategyKind};
pub use similarity::{
    batch_similarity, batch_similarity_with_projection, similarity, similarity_with_projection,
    ProjectionMatrix,
};
pub use storage::{load_dataset_jsonl, save_history_csv, save_json, save_pairs_jsonl};
pub use train::{
    sweep_learning_rates, EpochRecord, SweepCandidate, TrainedProjection, Trainer, TrainingHistory,
};
