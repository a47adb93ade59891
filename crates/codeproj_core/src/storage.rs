use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::model::{Dataset, Example, Pair};
use crate::train::TrainingHistory;

/// Reads one `{"query": .., "snippets": [..]}` record per line. Records
/// without a query are rejected here, before anything downstream sees them.
pub fn load_dataset_jsonl(path: &Path) -> Result<Dataset> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut examples = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line.context("read jsonl line")?;
        if line.trim().is_empty() {
            continue;
        }
        let example: Example = serde_json::from_str(&line)
            .with_context(|| format!("parse dataset record at line {}", idx + 1))?;
        examples.push(example);
    }

    Ok(Dataset::new(examples))
}

pub fn save_pairs_jsonl(path: &Path, pairs: &[Pair]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    for pair in pairs {
        let line = serde_json::to_string(pair).context("serialize pair")?;
        writer.write_all(line.as_bytes()).context("write pair line")?;
        writer.write_all(b"\n").context("write newline")?;
    }

    writer.flush().context("flush output")
}

/// One row per epoch: `epoch,train_loss,val_loss`.
pub fn save_history_csv(path: &Path, history: &TrainingHistory) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("create {}", path.display()))?;
    for record in &history.epochs {
        writer.serialize(record).context("write history row")?;
    }
    writer.flush().context("flush history")
}

pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value).context("serialize json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Label;
    use crate::train::EpochRecord;

    #[test]
    fn loads_records_and_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.jsonl");
        std::fs::write(
            &path,
            "{\"query\":\"auth\",\"snippets\":[\"def login(): ...\"]}\n\n{\"query\":\"empty\"}\n",
        )
        .unwrap();

        let ds = load_dataset_jsonl(&path).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.examples()[0].snippets, vec!["def login(): ..."]);
        assert!(ds.examples()[1].snippets.is_empty());
    }

    #[test]
    fn missing_query_is_rejected_with_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.jsonl");
        std::fs::write(
            &path,
            "{\"query\":\"ok\",\"snippets\":[]}\n{\"snippets\":[\"x\"]}\n",
        )
        .unwrap();

        let err = load_dataset_jsonl(&path).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn writes_pairs_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let pairs_path = dir.path().join("pairs.jsonl");
        let history_path = dir.path().join("history.csv");

        save_pairs_jsonl(
            &pairs_path,
            &[
                Pair::new("q", "s", Label::Positive),
                Pair::new("q", "t", Label::Negative),
            ],
        )
        .unwrap();
        let written = std::fs::read_to_string(&pairs_path).unwrap();
        assert_eq!(written.lines().count(), 2);
        let first: Pair = serde_json::from_str(written.lines().next().unwrap()).unwrap();
        assert_eq!(first.label, Label::Positive);

        let history = TrainingHistory {
            epochs: vec![EpochRecord {
                epoch: 0,
                train_loss: 0.5,
                val_loss: 0.75,
            }],
        };
        save_history_csv(&history_path, &history).unwrap();
        let csv = std::fs::read_to_string(&history_path).unwrap();
        assert_eq!(csv, "epoch,train_loss,val_loss\n0,0.5,0.75\n");
    }
}
