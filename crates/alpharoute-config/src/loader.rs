use std::path::Path;

use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, a placeholder cannot be
    /// expanded, the TOML is malformed, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        let config = Self::parse(&raw)?;
        tracing::debug!(
            path = %path.display(),
            providers = config.llm.providers.len(),
            models = config.routing.models.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parse and validate configuration text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing, or validation fails
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let expanded = crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistency found
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_providers()?;
        self.validate_routing()?;
        self.validate_benchmark()?;
        Ok(())
    }

    fn validate_providers(&self) -> anyhow::Result<()> {
        let llm = &self.llm;

        if llm.providers.is_empty() {
            anyhow::bail!("at least one provider must be configured under [llm.providers]");
        }

        if let Some(ref name) = llm.provider
            && !llm.providers.contains_key(name)
        {
            anyhow::bail!("default provider '{name}' is not configured");
        }

        for name in &llm.provider_priority {
            if !llm.providers.contains_key(name) {
                anyhow::bail!("provider_priority references unknown provider '{name}'");
            }
        }

        if !llm.retry_delay.is_finite() || llm.retry_delay < 0.0 {
            anyhow::bail!("llm.retry_delay must be a non-negative number of seconds");
        }

        if llm.max_retries == 0 {
            anyhow::bail!("llm.max_retries must be at least 1");
        }

        Ok(())
    }

    fn validate_routing(&self) -> anyhow::Result<()> {
        let routing = &self.routing;

        for model in &routing.models {
            if !self.llm.providers.contains_key(&model.provider) {
                anyhow::bail!(
                    "routing model '{}/{}' references unknown provider '{}'",
                    model.provider,
                    model.model,
                    model.provider
                );
            }
            if !(0.0..=1.0).contains(&model.capability_score) {
                anyhow::bail!(
                    "capability_score for '{}/{}' must be between 0 and 1",
                    model.provider,
                    model.model
                );
            }
        }

        for (task, task_config) in &routing.tasks {
            if let Some(weights) = task_config.weights
                && !weights.is_valid()
            {
                anyhow::bail!("weights for task '{task}' must be finite and non-negative");
            }
        }

        if routing.ambiguity_margin < 0.0 {
            anyhow::bail!("routing.ambiguity_margin must not be negative");
        }

        Ok(())
    }

    fn validate_benchmark(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.benchmark.pass_threshold) {
            anyhow::bail!("benchmark.pass_threshold must be between 0 and 1");
        }
        if self.benchmark.max_concurrent == 0 {
            anyhow::bail!("benchmark.max_concurrent must be at least 1");
        }
        Ok(())
    }
}
