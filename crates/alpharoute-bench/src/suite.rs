//! Named, versioned benchmark suites

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::case::{BenchmarkCategory, BenchmarkTestCase};
use crate::error::BenchmarkError;

/// Name of the built-in suite
pub const STANDARD_SUITE: &str = "standard";

/// An ordered collection of test cases, immutable once built
#[derive(Debug, Clone)]
pub struct BenchmarkSuite {
    name: String,
    version: String,
    description: String,
    cases: Vec<BenchmarkTestCase>,
}

impl BenchmarkSuite {
    /// Build a suite
    ///
    /// # Errors
    ///
    /// `InvalidSuite` when the case list is empty, a case id repeats, or a
    /// case has a negative or non-finite weight
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        cases: Vec<BenchmarkTestCase>,
    ) -> Result<Self, BenchmarkError> {
        let name = name.into();
        if cases.is_empty() {
            return Err(BenchmarkError::InvalidSuite(format!("suite '{name}' has no test cases")));
        }

        let mut seen = HashSet::new();
        for case in &cases {
            if !seen.insert(case.id.as_str()) {
                return Err(BenchmarkError::InvalidSuite(format!(
                    "duplicate test case id '{}' in suite '{name}'",
                    case.id
                )));
            }
            if !case.weight.is_finite() || case.weight < 0.0 {
                return Err(BenchmarkError::InvalidSuite(format!(
                    "test case '{}' has invalid weight {}",
                    case.id, case.weight
                )));
            }
        }

        Ok(Self {
            name,
            version: version.into(),
            description: description.into(),
            cases,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn cases(&self) -> &[BenchmarkTestCase] {
        &self.cases
    }

    pub fn case(&self, id: &str) -> Option<&BenchmarkTestCase> {
        self.cases.iter().find(|c| c.id == id)
    }

    /// Cases of one category, in suite order
    pub fn by_category(&self, category: BenchmarkCategory) -> impl Iterator<Item = &BenchmarkTestCase> {
        self.cases.iter().filter(move |c| c.category == category)
    }

    /// The built-in general-purpose suite, two cases per category
    #[allow(clippy::too_many_lines)]
    pub fn standard() -> Self {
        let cases = vec![
            BenchmarkTestCase::new(
                "reasoning_syllogism",
                BenchmarkCategory::Reasoning,
                "All plants need water. A cactus is a plant. What can we conclude about a cactus? \
                 Explain your reasoning step by step and name the form of the argument.",
            )
            .with_expected(["needs water", "syllogism", "all plants"])
            .with_criterion("logic_correctness", 0.4)
            .with_criterion("clarity", 0.3)
            .with_criterion("conclusion", 0.3)
            .with_temperature(0.2)
            .with_max_tokens(600),
            BenchmarkTestCase::new(
                "reasoning_trade_arithmetic",
                BenchmarkCategory::Reasoning,
                "A trader buys 120 shares at $25 each and later sells 80 of them at $30 each. \
                 What is the realized profit, and how many shares remain? Show each step.",
            )
            .with_expected(["400", "40 shares", "profit"])
            .with_criterion("accuracy", 0.5)
            .with_criterion("clarity", 0.3)
            .with_criterion("completeness", 0.2)
            .with_weight(1.5)
            .with_temperature(0.0)
            .with_max_tokens(600),
            BenchmarkTestCase::new(
                "creativity_trading_story",
                BenchmarkCategory::Creativity,
                "Write a short story, under 200 words, about a trader who notices an unusual \
                 pattern in the market late one night.",
            )
            .with_expected(["trader", "market", "pattern"])
            .with_criterion("creativity", 0.5)
            .with_criterion("structure", 0.3)
            .with_criterion("completeness", 0.2)
            .with_temperature(0.9)
            .with_max_tokens(400),
            BenchmarkTestCase::new(
                "creativity_volatility_metaphors",
                BenchmarkCategory::Creativity,
                "Give three original metaphors that describe market volatility.",
            )
            .with_expected(["volatility", "market"])
            .with_criterion("originality", 0.6)
            .with_criterion("clarity", 0.4)
            .with_temperature(0.9)
            .with_max_tokens(300),
            BenchmarkTestCase::new(
                "accuracy_finance_definitions",
                BenchmarkCategory::Accuracy,
                "Define each of these finance terms in one sentence: liquidity, market \
                 capitalization, short selling.",
            )
            .with_expected(["liquidity", "market capitalization", "short selling", "borrow"])
            .with_criterion("accuracy", 0.6)
            .with_criterion("completeness", 0.2)
            .with_criterion("clarity", 0.2)
            .with_weight(1.5)
            .with_temperature(0.0)
            .with_max_tokens(400),
            BenchmarkTestCase::new(
                "accuracy_unit_conversion",
                BenchmarkCategory::Accuracy,
                "Convert 2.5 kilometers to meters and 3 hours to minutes. Give only the results with units.",
            )
            .with_expected(["2500 meters", "180 minutes"])
            .with_criterion("accuracy", 1.0)
            .with_temperature(0.0)
            .with_max_tokens(100),
            BenchmarkTestCase::new(
                "speed_one_word",
                BenchmarkCategory::Speed,
                "Answer with one word: what is the opposite of bullish?",
            )
            .with_expected(["bearish"])
            .with_criterion("accuracy", 1.0)
            .with_weight(0.5)
            .with_timeout(Duration::from_secs(15))
            .with_temperature(0.0)
            .with_max_tokens(10),
            BenchmarkTestCase::new(
                "speed_exchange_list",
                BenchmarkCategory::Speed,
                "List three major stock exchanges. Names only.",
            )
            .with_expected(["nasdaq", "exchange"])
            .with_criterion("accuracy", 0.7)
            .with_criterion("structure", 0.3)
            .with_weight(0.5)
            .with_timeout(Duration::from_secs(15))
            .with_temperature(0.0)
            .with_max_tokens(50),
        ];

        Self {
            name: STANDARD_SUITE.to_owned(),
            version: "1.0".to_owned(),
            description: "General reasoning, creativity, accuracy and speed checks".to_owned(),
            cases,
        }
    }
}

/// Suites keyed by `(name, version)`
#[derive(Debug, Default)]
pub struct SuiteRegistry {
    suites: BTreeMap<(String, String), Arc<BenchmarkSuite>>,
}

impl SuiteRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in suites
    pub fn builtin() -> Self {
        let standard = BenchmarkSuite::standard();
        let mut suites = BTreeMap::new();
        suites.insert(
            (standard.name.clone(), standard.version.clone()),
            Arc::new(standard),
        );
        Self { suites }
    }

    /// Add a suite
    ///
    /// # Errors
    ///
    /// `DuplicateSuite` if the same name and version is already registered
    pub fn register(&mut self, suite: BenchmarkSuite) -> Result<(), BenchmarkError> {
        let key = (suite.name.clone(), suite.version.clone());
        if self.suites.contains_key(&key) {
            return Err(BenchmarkError::DuplicateSuite {
                name: key.0,
                version: key.1,
            });
        }
        self.suites.insert(key, Arc::new(suite));
        Ok(())
    }

    /// Look up a suite, taking the latest version when none is given
    ///
    /// # Errors
    ///
    /// `SuiteNotFound` if nothing matches
    pub fn get(&self, name: &str, version: Option<&str>) -> Result<Arc<BenchmarkSuite>, BenchmarkError> {
        let found = match version {
            Some(version) => self.suites.get(&(name.to_owned(), version.to_owned())),
            None => self
                .suites
                .iter()
                .filter(|((n, _), _)| n == name)
                .max_by(|((_, a), _), ((_, b), _)| version_key(a).cmp(&version_key(b)).then_with(|| a.cmp(b)))
                .map(|(_, suite)| suite),
        };

        found.cloned().ok_or_else(|| {
            BenchmarkError::SuiteNotFound(version.map_or_else(|| name.to_owned(), |v| format!("{name} v{v}")))
        })
    }

    /// Distinct suite names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.suites.keys().map(|(n, _)| n.as_str()).collect();
        names.dedup();
        names
    }
}

/// Numeric ordering for dotted versions; non-numeric parts sort as zero
fn version_key(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| part.trim().parse().unwrap_or(0))
        .collect()
}
