//! Response scoring
//!
//! Pure heuristics: the same text and case always produce the same result.
//! Three signals are computed and blended by the case's criteria:
//! - **coverage**: share of expected elements found, exactly or fuzzily
//! - **structural**: length band, connectives and layout
//! - **category**: category lexicon, or brevity for speed cases

use std::collections::HashSet;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;

use crate::case::{BenchmarkCategory, BenchmarkTestCase};

/// Minimum word overlap for a fuzzy element match
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.5;

/// Longest answer a speed case gets full marks for
const SPEED_WORD_LIMIT: usize = 30;

const CONNECTIVES: &[&str] = &[
    "therefore", "because", "thus", "hence", "however", "since", "first", "second", "finally", "then", "so",
    "for example",
];

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+(?:'[a-z]+)?").expect("must be valid regex"));

static SENTENCE_BREAK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?\n]+").expect("must be valid regex"));

static LIST_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*•]|\d+[.)])\s+").expect("must be valid regex"));

/// Scores for one response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    /// Blended score in 0..=1
    pub score: f64,
    pub coverage: f64,
    pub structural: f64,
    pub category: f64,
    pub found_elements: Vec<String>,
    pub missing_elements: Vec<String>,
    /// Signal assigned to each criterion of the case
    pub criteria_scores: IndexMap<String, f64>,
}

/// Score a response against a test case
pub fn evaluate_response(text: &str, case: &BenchmarkTestCase) -> EvaluationResult {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return EvaluationResult {
            score: 0.0,
            coverage: 0.0,
            structural: 0.0,
            category: 0.0,
            found_elements: Vec::new(),
            missing_elements: case.expected_elements.clone(),
            criteria_scores: case.evaluation_criteria.keys().map(|k| (k.clone(), 0.0)).collect(),
        };
    }

    let words = tokenize(&normalized);
    let sentences: Vec<Vec<String>> = SENTENCE_BREAK_RE
        .split(&normalized)
        .map(tokenize)
        .filter(|s| !s.is_empty())
        .collect();

    let (found_elements, missing_elements): (Vec<String>, Vec<String>) = case
        .expected_elements
        .iter()
        .cloned()
        .partition(|element| contains_element(&normalized, &sentences, element));

    let coverage = if case.expected_elements.is_empty() {
        1.0
    } else {
        found_elements.len() as f64 / case.expected_elements.len() as f64
    };
    let structural = structural_score(text, &normalized, &words, sentences.len(), case.category);
    let category = category_score(&normalized, &words, case.category);

    let criteria_scores: IndexMap<String, f64> = case
        .evaluation_criteria
        .keys()
        .map(|name| (name.clone(), criterion_signal(name, coverage, structural, category)))
        .collect();

    let total_weight: f64 = case.evaluation_criteria.values().filter(|w| **w > 0.0).sum();
    let score = if total_weight > 0.0 {
        case.evaluation_criteria
            .iter()
            .filter(|(_, w)| **w > 0.0)
            .map(|(name, w)| w * criteria_scores.get(name).copied().unwrap_or(0.0))
            .sum::<f64>()
            / total_weight
    } else {
        0.5 * coverage + 0.25 * structural + 0.25 * category
    };

    EvaluationResult {
        score: score.clamp(0.0, 1.0),
        coverage,
        structural,
        category,
        found_elements,
        missing_elements,
        criteria_scores,
    }
}

/// Which signal a named criterion measures
fn criterion_signal(name: &str, coverage: f64, structural: f64, category: f64) -> f64 {
    let name = name.to_ascii_lowercase();
    match name.as_str() {
        "conclusion" => coverage * structural,
        "accuracy" | "completeness" => coverage,
        "clarity" | "structure" => structural,
        "creativity" | "originality" => category,
        _ if name.contains("correct") => coverage,
        _ => (coverage + structural + category) / 3.0,
    }
}

/// Lowercase, collapse whitespace and drop thousands separators
fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let chars: Vec<char> = lowered.chars().collect();
    let mut out = String::with_capacity(lowered.len());

    for (i, c) in chars.iter().enumerate() {
        let between_digits = *c == ','
            && i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(char::is_ascii_digit);
        if !between_digits {
            out.push(*c);
        }
    }

    // keep line breaks so sentences and lists survive
    out.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

fn tokenize(text: &str) -> Vec<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_owned())
        .collect()
}

/// Exact phrase match, else a word window with enough overlap
fn contains_element(normalized: &str, sentences: &[Vec<String>], element: &str) -> bool {
    let element = normalize(element);
    if element.is_empty() {
        return true;
    }
    if normalized.contains(&element) {
        return true;
    }

    let target: HashSet<&str> = WORD_RE.find_iter(&element).map(|m| m.as_str()).collect();
    if target.is_empty() {
        return false;
    }

    let size = target.len();
    sentences.iter().any(|sentence| {
        if sentence.len() <= size {
            return fuzzy_match(&target, sentence);
        }
        (size..=size + 1)
            .filter(|window| *window <= sentence.len())
            .any(|window| sentence.windows(window).any(|w| fuzzy_match(&target, w)))
    })
}

/// Jaccard overlap at the threshold, sharing at least half of the element's
/// words and never a single word of a multi-word element
fn fuzzy_match(target: &HashSet<&str>, words: &[String]) -> bool {
    let candidate: HashSet<&str> = words.iter().map(String::as_str).collect();
    let shared = target.intersection(&candidate).count();
    let required = target.len().div_ceil(2).max(target.len().min(2));
    if shared < required {
        return false;
    }

    let union = target.union(&candidate).count();
    shared as f64 / union as f64 >= FUZZY_MATCH_THRESHOLD
}

fn brevity(word_count: usize) -> f64 {
    if word_count <= SPEED_WORD_LIMIT {
        1.0
    } else {
        SPEED_WORD_LIMIT as f64 / word_count as f64
    }
}

fn structural_score(
    raw: &str,
    normalized: &str,
    words: &[String],
    sentence_count: usize,
    category: BenchmarkCategory,
) -> f64 {
    if category == BenchmarkCategory::Speed {
        return brevity(words.len());
    }

    let length = match words.len() {
        n if n < 20 => n as f64 / 20.0,
        n if n <= 500 => 1.0,
        n => 500.0 / n as f64,
    };

    let vocabulary: HashSet<&str> = words.iter().map(String::as_str).collect();
    let connectives = CONNECTIVES
        .iter()
        .filter(|c| if c.contains(' ') { normalized.contains(*c) } else { vocabulary.contains(*c) })
        .count();
    let connective = (connectives as f64 / 2.0).min(1.0);

    let paragraphs = raw.split("\n\n").filter(|p| !p.trim().is_empty()).count();
    let layout = if LIST_MARKER_RE.find_iter(raw).count() >= 2 || paragraphs >= 2 {
        1.0
    } else if sentence_count >= 2 {
        0.7
    } else {
        0.4
    };

    0.5 * length + 0.3 * connective + 0.2 * layout
}

fn category_score(normalized: &str, words: &[String], category: BenchmarkCategory) -> f64 {
    if category == BenchmarkCategory::Speed {
        return brevity(words.len());
    }

    let vocabulary: HashSet<&str> = words.iter().map(String::as_str).collect();
    let hits = category
        .lexicon()
        .iter()
        .filter(|term| if term.contains(' ') { normalized.contains(*term) } else { vocabulary.contains(*term) })
        .count();
    let lexicon = (hits as f64 / 3.0).min(1.0);

    if category == BenchmarkCategory::Creativity && !words.is_empty() {
        let diversity = vocabulary.len() as f64 / words.len() as f64;
        0.6 * lexicon + 0.4 * diversity
    } else {
        lexicon
    }
}
