use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codeproj_core::{
    load_dataset_jsonl, save_history_csv, save_json, save_pairs_jsonl, Experiment,
    ExperimentConfig, ExperimentRun, HashEmbeddingProvider, Label, PairSampler,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_DIM: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "codeproj")]
#[command(about = "Learn a query projection for code-snippet retrieval and measure recall@K")]
struct Cli {
    /// Dimension of the built-in hashing embedder.
    #[arg(long, global = true, default_value_t = DEFAULT_DIM)]
    dim: usize,

    /// JSON file with experiment options; flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Args)]
struct SamplingArgs {
    #[arg(long)]
    dataset: PathBuf,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    negatives_per_positive: Option<usize>,
    #[arg(long)]
    train_val_split: Option<f32>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build labelled pairs and report the train/validation split.
    Sample {
        #[command(flatten)]
        sampling: SamplingArgs,
        /// Write all sampled pairs (train first, then validation) as JSONL.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Sample, train and compare plain against projected retrieval.
    Run {
        #[command(flatten)]
        sampling: SamplingArgs,
        /// Repeat to sweep several rates and keep the best by validation loss.
        #[arg(long = "learning-rate")]
        learning_rates: Vec<f32>,
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long)]
        history_csv: Option<PathBuf>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>, sampling: &SamplingArgs) -> Result<ExperimentConfig> {
    let mut config = match path {
        Some(p) => ExperimentConfig::load(p)
            .with_context(|| format!("load config {}", p.display()))?,
        None => ExperimentConfig::default(),
    };
    if let Some(seed) = sampling.seed {
        config.seed = seed;
    }
    if let Some(n) = sampling.negatives_per_positive {
        config.negatives_per_positive = n;
    }
    if let Some(split) = sampling.train_val_split {
        config.train_val_split = split;
    }
    Ok(config)
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match &cli.command {
        Commands::Sample { sampling, output } => {
            let config = load_config(cli.config.as_deref(), sampling)?;
            config.validate()?;
            let dataset = load_dataset_jsonl(&sampling.dataset)?;
            let split = PairSampler::new(config.sampler()).sample_split(&dataset)?;

            let positives = split.iter().filter(|p| p.label == Label::Positive).count();
            println!(
                "examples={} pairs={} positives={} negatives={} train={} validation={}",
                dataset.len(),
                split.len(),
                positives,
                split.len() - positives,
                split.train.len(),
                split.validation.len()
            );

            if let Some(path) = output {
                let all: Vec<_> = split.iter().cloned().collect();
                save_pairs_jsonl(path, &all)?;
                println!("output={}", path.display());
            }
        }
        Commands::Run {
            sampling,
            learning_rates,
            epochs,
            top_k,
            report,
            history_csv,
        } => {
            let mut config = load_config(cli.config.as_deref(), sampling)?;
            if let Some(epochs) = epochs {
                config.num_epochs = *epochs;
            }
            if let Some(k) = top_k {
                config.top_k = *k;
            }

            let dataset = load_dataset_jsonl(&sampling.dataset)?;
            let run = ExperimentRun::start(
                format!("run-{}", chrono::Utc::now().timestamp_millis()),
                sampling.dataset.to_string_lossy().into_owned(),
            );
            let mut experiment =
                Experiment::new(HashEmbeddingProvider::new(cli.dim), config, run)?;

            let outcome = experiment.execute(&dataset, learning_rates);
            let result = match outcome {
                Ok(result) => result,
                Err(err) => {
                    let run = experiment.run();
                    println!(
                        "run_id={} status={:?} error={}",
                        run.run_id,
                        run.status,
                        run.error.as_deref().unwrap_or("unknown")
                    );
                    return Err(err.into());
                }
            };
            for candidate in &result.sweep {
                println!(
                    "sweep learning_rate={} final_val_loss={:.4}",
                    candidate.learning_rate, candidate.final_val_loss
                );
            }
            if let Some(last) = result.history.last() {
                println!(
                    "epochs={} learning_rate={} train_loss={:.4} val_loss={:.4} best_val_loss={:.4}",
                    result.history.epochs.len(),
                    result.learning_rate,
                    last.train_loss,
                    last.val_loss,
                    result.history.best_val_loss().unwrap_or(last.val_loss)
                );
            }

            let cmp = &result.comparison;
            for (name, summary) in [("plain", &cmp.plain), ("projected", &cmp.projected)] {
                println!(
                    "strategy={} top_k={} recall={:.4} mrr={:.4} ndcg={:.4}",
                    name,
                    summary.top_k,
                    summary.recall_at_k,
                    summary.mean_reciprocal_rank,
                    summary.ndcg_at_k
                );
            }
            println!(
                "run_id={} status={:?} train_pairs={} validation_pairs={} cached_embeddings={} recall_delta={:+.4}",
                result.run.run_id,
                result.run.status,
                result.train_pairs,
                result.validation_pairs,
                experiment.cache().len(),
                cmp.recall_delta()
            );

            if let Some(path) = history_csv {
                save_history_csv(path, &result.history)?;
            }
            if let Some(path) = report {
                save_json(path, &result)?;
            }
        }
    }

    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_learning_rates() {
        let cli = Cli::try_parse_from([
            "codeproj",
            "run",
            "--dataset",
            "d.jsonl",
            "--learning-rate",
            "0.1",
            "--learning-rate",
            "0.01",
            "--top-k",
            "3",
        ])
        .expect("parse");

        match cli.command {
            Commands::Run {
                learning_rates,
                top_k,
                ..
            } => {
                assert_eq!(learning_rates, vec![0.1, 0.01]);
                assert_eq!(top_k, Some(3));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.dim, DEFAULT_DIM);
    }

    #[test]
    fn flags_override_defaults() {
        let sampling = SamplingArgs {
            dataset: PathBuf::from("d.jsonl"),
            seed: Some(9),
            negatives_per_positive: None,
            train_val_split: Some(0.5),
        };
        let config = load_config(None, &sampling).unwrap();
        assert_eq!(config.seed, 9);
        assert_eq!(config.train_val_split, 0.5);
        assert_eq!(config.negatives_per_positive, 1);
    }
}
