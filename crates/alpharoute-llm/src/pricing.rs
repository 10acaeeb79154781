//! Per-provider, per-model token pricing

use std::collections::HashMap;

use alpharoute_config::{LlmConfig, ModelPricing, ProviderKind};

use crate::types::Usage;

/// Public list prices used when a hosted model has no configured pricing
const HOSTED_DEFAULTS: &[(ProviderKind, &str, f64, f64)] = &[
    (ProviderKind::Openai, "gpt-4o-mini", 0.000_15, 0.000_6),
    (ProviderKind::Openai, "gpt-4o", 0.002_5, 0.01),
    (ProviderKind::Openai, "gpt-4.1-mini", 0.000_4, 0.001_6),
    (ProviderKind::Openai, "gpt-4.1", 0.002, 0.008),
    (ProviderKind::Anthropic, "claude-3-5-haiku-latest", 0.000_8, 0.004),
    (ProviderKind::Anthropic, "claude-3-5-sonnet-latest", 0.003, 0.015),
    (ProviderKind::Anthropic, "claude-3-7-sonnet-latest", 0.003, 0.015),
    (ProviderKind::Anthropic, "claude-sonnet-4-0", 0.003, 0.015),
];

/// Cost lookup keyed by configured provider name and model
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    entries: HashMap<(String, String), ModelPricing>,
    kinds: HashMap<String, ProviderKind>,
}

impl PricingTable {
    /// Configured prices, with built-in list prices for hosted models
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut table = Self::default();

        for (name, provider) in &config.providers {
            table.kinds.insert(name.clone(), provider.kind);

            for (model, input_per_1k, output_per_1k) in HOSTED_DEFAULTS
                .iter()
                .filter(|(kind, ..)| *kind == provider.kind)
                .map(|(_, model, i, o)| (model, *i, *o))
            {
                table.entries.insert(
                    (name.clone(), (*model).to_owned()),
                    ModelPricing {
                        input_per_1k,
                        output_per_1k,
                    },
                );
            }

            for (model, pricing) in &provider.pricing {
                table.entries.insert((name.clone(), model.clone()), *pricing);
            }
        }

        table
    }

    /// Pricing for a model, if known
    pub fn get(&self, provider: &str, model: &str) -> Option<ModelPricing> {
        self.entries.get(&(provider.to_owned(), model.to_owned())).copied()
    }

    /// Cost of a call in USD
    ///
    /// Unknown models cost nothing on a self-hosted provider. On a hosted
    /// provider they fall back to the most expensive known model of that
    /// provider so spend is never under-reported.
    pub fn cost(&self, provider: &str, model: &str, usage: &Usage) -> f64 {
        let pricing = self.get(provider, model).or_else(|| match self.kinds.get(provider) {
            Some(ProviderKind::GptOss) | None => None,
            Some(_) => self
                .entries
                .iter()
                .filter(|((p, _), _)| p == provider)
                .map(|(_, pricing)| *pricing)
                .max_by(|a, b| a.output_per_1k.total_cmp(&b.output_per_1k)),
        });

        pricing.map_or(0.0, |p| {
            (usage.prompt_tokens as f64 / 1000.0) * p.input_per_1k
                + (usage.completion_tokens as f64 / 1000.0) * p.output_per_1k
        })
    }
}
