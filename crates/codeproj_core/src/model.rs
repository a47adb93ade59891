use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A query and the code snippets judged relevant to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub query: String,
    #[serde(default)]
    pub snippets: Vec<String>,
}

impl Example {
    pub fn new(
        query: impl Into<String>,
        snippets: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            query: query.into(),
            snippets: snippets.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    examples: Vec<Example>,
}

impl Dataset {
    pub fn new(examples: Vec<Example>) -> Self {
        Self { examples }
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Every snippet in the dataset, deduplicated, in first-appearance order.
    pub fn corpus(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.examples
            .iter()
            .flat_map(|ex| ex.snippets.iter())
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect()
    }
}

impl From<Vec<Example>> for Dataset {
    fn from(examples: Vec<Example>) -> Self {
        Self::new(examples)
    }
}

/// Binary relevance label, serialized as `0` / `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Label {
    Negative,
    Positive,
}

impl Label {
    pub fn target(self) -> f32 {
        match self {
            Label::Negative => 0.0,
            Label::Positive => 1.0,
        }
    }
}

impl From<Label> for u8 {
    fn from(label: Label) -> Self {
        match label {
            Label::Negative => 0,
            Label::Positive => 1,
        }
    }
}

impl TryFrom<u8> for Label {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Label::Negative),
            1 => Ok(Label::Positive),
            other => Err(format!("label must be 0 or 1, got {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub query: String,
    pub snippet: String,
    pub label: Label,
}

impl Pair {
    pub fn new(query: impl Into<String>, snippet: impl Into<String>, label: Label) -> Self {
        Self {
            query: query.into(),
            snippet: snippet.into(),
            label,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSnippet {
    pub snippet: String,
    pub score: f32,
}

/// Snippets ranked for one query, best first.
pub type RetrievalResult = Vec<ScoredSnippet>;
