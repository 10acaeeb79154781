//! Benchmark test cases

use std::time::Duration;

use alpharoute_llm::{ChatMessage, ChatRequest};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Capability a test case exercises
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BenchmarkCategory {
    Reasoning,
    Creativity,
    Accuracy,
    Speed,
}

impl BenchmarkCategory {
    pub const ALL: [Self; 4] = [Self::Reasoning, Self::Creativity, Self::Accuracy, Self::Speed];

    /// Words a good answer in this category tends to use
    pub const fn lexicon(self) -> &'static [&'static str] {
        match self {
            Self::Reasoning => &[
                "therefore", "because", "thus", "hence", "since", "conclude", "follows", "step", "premise",
            ],
            Self::Creativity => &[
                "like", "as if", "imagine", "suddenly", "whisper", "dream", "felt", "once", "glow",
            ],
            Self::Accuracy => &["defined", "refers to", "means", "equals", "is the", "which", "known as"],
            Self::Speed => &[],
        }
    }
}

/// One fixed prompt with the elements and criteria used to grade answers
#[derive(Debug, Clone)]
pub struct BenchmarkTestCase {
    /// Unique within its suite
    pub id: String,
    pub category: BenchmarkCategory,
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Phrases a correct answer should contain, matched exactly or fuzzily
    pub expected_elements: Vec<String>,
    /// Criterion name to weight, e.g. `logic_correctness = 0.4`
    pub evaluation_criteria: IndexMap<String, f64>,
    /// Share of the suite score
    pub weight: f64,
    /// Overrides the configured default
    pub timeout: Option<Duration>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl BenchmarkTestCase {
    pub fn new(id: impl Into<String>, category: BenchmarkCategory, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category,
            prompt: prompt.into(),
            system_prompt: None,
            expected_elements: Vec::new(),
            evaluation_criteria: IndexMap::new(),
            weight: 1.0,
            timeout: None,
            temperature: None,
            max_tokens: None,
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    #[must_use]
    pub fn with_expected<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_elements = elements.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_criterion(mut self, name: impl Into<String>, weight: f64) -> Self {
        self.evaluation_criteria.insert(name.into(), weight);
        self
    }

    #[must_use]
    pub const fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Chat request sending this case to `model`
    pub fn request(&self, model: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(self.prompt.clone()));

        ChatRequest {
            messages,
            model: Some(model.to_owned()),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use alpharoute_llm::Role;

    use super::*;

    #[test]
    fn request_pins_model_and_prompt() {
        let case = BenchmarkTestCase::new("c1", BenchmarkCategory::Speed, "One word?")
            .with_system_prompt("Be brief")
            .with_max_tokens(10);
        let request = case.request("gpt-oss-20b");

        assert_eq!(request.model.as_deref(), Some("gpt-oss-20b"));
        assert_eq!(request.max_tokens, Some(10));
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[1].content, "One word?");
    }

    #[test]
    fn category_names_are_snake_case() {
        assert_eq!(BenchmarkCategory::Creativity.to_string(), "creativity");
        assert_eq!(BenchmarkCategory::from_str("speed").unwrap(), BenchmarkCategory::Speed);
    }
}
