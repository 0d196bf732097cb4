//! Scoring gateway: turns a transcript into one score per configured
//! dimension via an external LLM.
//!
//! Parsing is strict. A response that does not name every configured
//! dimension exactly once with an integer value in `0..=100` is an
//! [`Error::Assessment`]; nothing is defaulted.

mod client;

pub use client::{HttpCompletionClient, LlmCompletionClient};

use crate::config::Config;
use crate::types::Score;
use crate::{Error, Result};
use serde_json::Value;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are an assessment engine for tutoring conversations between a student and an AI mentor. Score the student's reasoning and return strict JSON only.";

/// Converts transcript text into a score vector. Stateless and safe to retry.
pub trait ScoringGateway: Send + Sync {
    /// One [`Score`] per configured dimension, in configured order.
    fn assess(&self, transcript: &str) -> Result<Vec<Score>>;
}

/// Build the LLM-backed gateway from `[llm]` and `[scoring]`.
pub fn create_scoring_gateway(config: &Config) -> Result<Arc<dyn ScoringGateway>> {
    let llm = config
        .llm
        .as_ref()
        .ok_or_else(|| Error::Config("[llm] section is required for scoring".to_string()))?;
    let client = HttpCompletionClient::new(llm, SYSTEM_PROMPT)?;
    let gateway = LlmScoringGateway::new(Box::new(client), config.scoring.dimensions.clone())?;
    Ok(Arc::new(gateway))
}

/// [`ScoringGateway`] that prompts an [`LlmCompletionClient`].
pub struct LlmScoringGateway {
    client: Box<dyn LlmCompletionClient>,
    dimensions: Vec<String>,
}

impl LlmScoringGateway {
    pub fn new(client: Box<dyn LlmCompletionClient>, dimensions: Vec<String>) -> Result<Self> {
        if dimensions.is_empty() {
            return Err(Error::Config(
                "scoring needs at least one dimension".to_string(),
            ));
        }
        Ok(Self { client, dimensions })
    }

    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }
}

impl ScoringGateway for LlmScoringGateway {
    fn assess(&self, transcript: &str) -> Result<Vec<Score>> {
        let prompt = build_prompt(&self.dimensions, transcript);
        tracing::debug!(
            model = self.client.model(),
            prompt_chars = prompt.len(),
            "Requesting transcript assessment"
        );

        let raw = self.client.complete(&prompt)?;
        match parse_score_vector(&raw, &self.dimensions) {
            Ok(scores) => {
                tracing::info!(
                    model = self.client.model(),
                    dimension_count = scores.len(),
                    "Transcript assessed"
                );
                Ok(scores)
            }
            Err(e) => {
                tracing::warn!(error = %e, raw_len = raw.len(), "Rejected assessment response");
                tracing::debug!(raw = %raw, "Rejected assessment body");
                Err(e)
            }
        }
    }
}

fn build_prompt(dimensions: &[String], transcript: &str) -> String {
    let listed = dimensions
        .iter()
        .map(|d| format!("- {d}"))
        .collect::<Vec<_>>()
        .join("\n");
    let example = dimensions
        .iter()
        .map(|d| format!("{{\"element\": \"{d}\", \"value\": 0}}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Score the conversation below on each of these dimensions with an integer from 0 to 100:\n\
         {listed}\n\n\
         Respond with a JSON array containing exactly one object per dimension:\n\
         [{example}]\n\n\
         Conversation:\n{transcript}\n\n\
         Return only JSON."
    )
}

/// Parse an LLM response into scores for exactly `dimensions`.
///
/// Accepts `[{"element": name, "value": n}, ...]` (`dimension` or `name`
/// also work as the key) or `{"name": n, ...}`, optionally surrounded by
/// prose or a code fence. Names are matched case-insensitively and
/// returned with the configured spelling.
pub fn parse_score_vector(raw: &str, dimensions: &[String]) -> Result<Vec<Score>> {
    let parsed = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => value,
        Err(_) => {
            let extracted = extract_json(raw)?;
            serde_json::from_str::<Value>(extracted).map_err(|e| {
                Error::Assessment(format!("assessment response is not valid JSON: {e}"))
            })?
        }
    };

    let pairs: Vec<(&str, &Value)> = match &parsed {
        Value::Array(items) => items.iter().map(entry_pair).collect::<Result<_>>()?,
        Value::Object(map) => map.iter().map(|(k, v)| (k.as_str(), v)).collect(),
        _ => {
            return Err(Error::Assessment(
                "assessment response must be a JSON array or object".to_string(),
            ))
        }
    };

    let mut slots: Vec<Option<u8>> = vec![None; dimensions.len()];
    for (name, value) in pairs {
        let name = name.trim();
        let idx = dimensions
            .iter()
            .position(|d| d.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::Assessment(format!("unexpected dimension '{name}'")))?;
        let value = score_value(name, value)?;
        if slots[idx].replace(value).is_some() {
            return Err(Error::Assessment(format!(
                "dimension '{}' scored more than once",
                dimensions[idx]
            )));
        }
    }

    let scores: Option<Vec<Score>> = dimensions
        .iter()
        .zip(&slots)
        .map(|(d, v)| v.map(|v| Score::new(d.clone(), v)))
        .collect();
    scores.ok_or_else(|| {
        let missing: Vec<&str> = dimensions
            .iter()
            .zip(&slots)
            .filter(|(_, v)| v.is_none())
            .map(|(d, _)| d.as_str())
            .collect();
        Error::Assessment(format!("missing dimensions: {}", missing.join(", ")))
    })
}

fn entry_pair(item: &Value) -> Result<(&str, &Value)> {
    let name = ["element", "dimension", "name"]
        .iter()
        .find_map(|key| item.get(key).and_then(Value::as_str))
        .ok_or_else(|| Error::Assessment(format!("score entry without a dimension: {item}")))?;
    let value = ["value", "score"]
        .iter()
        .find_map(|key| item.get(key))
        .ok_or_else(|| Error::Assessment(format!("score entry '{name}' has no value")))?;
    Ok((name, value))
}

fn score_value(name: &str, value: &Value) -> Result<u8> {
    let integral = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= 100.0)
                .map(|f| f as u64)
        }),
        _ => None,
    };
    match integral {
        Some(v) if v <= 100 => Ok(v as u8),
        _ => Err(Error::Assessment(format!(
            "dimension '{name}' has invalid score {value}; expected an integer 0-100"
        ))),
    }
}

/// Slice out the outermost JSON array or object embedded in prose.
fn extract_json(raw: &str) -> Result<&str> {
    let start = raw
        .find(|c: char| c == '[' || c == '{')
        .ok_or_else(|| Error::Assessment("assessment response did not contain JSON".to_string()))?;
    let close = if raw[start..].starts_with('[') { ']' } else { '}' };
    let end = raw
        .rfind(close)
        .filter(|end| *end > start)
        .ok_or_else(|| Error::Assessment("assessment response JSON bounds are invalid".to_string()))?;
    Ok(&raw[start..=end])
}
