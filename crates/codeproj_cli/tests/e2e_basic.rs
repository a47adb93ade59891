use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn bin() -> Command {
    let path = assert_cmd::cargo::cargo_bin!("codeproj");
    Command::new(path)
}

fn write_dataset(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("dataset.jsonl");
    let lines = [
        r#"{"query": "authenticate a user", "snippets": ["def login(user, password): return check(user, password)"]}"#,
        r#"{"query": "add two numbers", "snippets": ["def add(a, b): return a + b"]}"#,
        r#"{"query": "read a file", "snippets": ["def read_file(path): return open(path).read()", "with open(path) as f: data = f.read()"]}"#,
        r#"{"query": "sort a list", "snippets": ["def sort_items(items): return sorted(items)"]}"#,
        r#"{"query": "no answers yet"}"#,
    ];
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}

#[test]
fn run_reports_both_strategies_and_writes_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());
    let report = dir.path().join("report.json");
    let history = dir.path().join("history.csv");

    bin()
        .args(["--dim", "32", "run", "--epochs", "3", "--top-k", "100", "--dataset"])
        .arg(&dataset)
        .arg("--report")
        .arg(&report)
        .arg("--history-csv")
        .arg(&history)
        .assert()
        .success()
        .stdout(predicate::str::contains("strategy=plain top_k=100 recall=1.0000"))
        .stdout(predicate::str::contains("strategy=projected top_k=100 recall=1.0000"))
        .stdout(predicate::str::contains("status=Completed"));

    let json: Value = serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["run"]["status"], "completed");
    assert_eq!(json["dim"], 32);
    assert_eq!(json["history"]["epochs"].as_array().unwrap().len(), 3);
    assert_eq!(json["comparison"]["plain"]["outcomes"].as_array().unwrap().len(), 5);

    let csv = std::fs::read_to_string(&history).unwrap();
    assert_eq!(csv.lines().count(), 4);
    assert!(csv.starts_with("epoch,train_loss,val_loss"));
}

#[test]
fn sweep_prints_each_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());

    bin()
        .args(["--dim", "16", "run", "--epochs", "2", "--top-k", "2"])
        .args(["--learning-rate", "0.01", "--learning-rate", "0.5", "--dataset"])
        .arg(&dataset)
        .assert()
        .success()
        .stdout(predicate::str::contains("sweep learning_rate=0.01"))
        .stdout(predicate::str::contains("sweep learning_rate=0.5"));
}

#[test]
fn sample_writes_labelled_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());
    let output = dir.path().join("pairs.jsonl");

    bin()
        .args(["sample", "--seed", "3", "--dataset"])
        .arg(&dataset)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("examples=5"))
        .stdout(predicate::str::contains("positives=5"));

    let written = std::fs::read_to_string(&output).unwrap();
    for line in written.lines() {
        let pair: Value = serde_json::from_str(line).unwrap();
        let label = pair["label"].as_u64().unwrap();
        assert!(label == 0 || label == 1);
    }
}

#[test]
fn single_example_dataset_fails() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("one.jsonl");
    std::fs::write(&dataset, r#"{"query": "q", "snippets": ["s"]}"#).unwrap();

    bin()
        .args(["run", "--dataset"])
        .arg(&dataset)
        .assert()
        .failure()
        .stdout(predicate::str::contains("status=Failed"))
        .stderr(predicate::str::contains("no example has another example"));
}

#[test]
fn record_without_query_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("bad.jsonl");
    std::fs::write(&dataset, "{\"query\": \"ok\"}\n{\"snippets\": [\"x\"]}\n").unwrap();

    bin()
        .args(["sample", "--dataset"])
        .arg(&dataset)
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn invalid_split_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());

    bin()
        .args(["sample", "--train-val-split", "1.5", "--dataset"])
        .arg(&dataset)
        .assert()
        .failure()
        .stderr(predicate::str::contains("train_val_split"));
}
