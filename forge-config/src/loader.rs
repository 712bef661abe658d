//! Loading: TOML file, then environment overrides, then validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{ForgeConfig, MAX_SANDBOX_TIMEOUT_MS, ProviderKind};

/// Environment variable read by [`ForgeConfig::apply_env`] for the GitHub token.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

impl ForgeConfig {
    /// Loads the configuration used by the server.
    ///
    /// Reads `path` when given (defaults otherwise), applies process
    /// environment overrides and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed, an
    /// override is malformed, or validation fails.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Parses a TOML file without applying overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parses a TOML document without applying overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed documents or unknown keys.
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Applies overrides read through `lookup`.
    ///
    /// `TOOLFORGE_*` variables override their fields. Provider API keys and
    /// the GitHub token only fill values the file left empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first malformed
    /// variable.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        if let Some(value) = env.parsed("TOOLFORGE_AUTO_EVOLVE", "must be true or false")? {
            self.evolution.auto_evolve = value;
        }
        if let Some(value) = env.parsed("TOOLFORGE_MAX_CONCURRENT", "must be a positive integer")? {
            self.evolution.max_concurrent = value;
        }
        if let Some(value) = env.parsed("TOOLFORGE_SANDBOX_TIMEOUT_MS", "must be milliseconds")? {
            self.sandbox.default_timeout_ms = value;
        }
        if let Some(value) = env.parsed("TOOLFORGE_SANDBOX_MAX_TIMEOUT_MS", "must be milliseconds")? {
            self.sandbox.max_timeout_ms = value;
        }
        if let Some(value) = env.parsed("TOOLFORGE_SANDBOX_MEMORY_MB", "must be a positive integer")? {
            self.sandbox.memory_limit_mb = value;
        }
        if let Some(value) = env.parsed("TOOLFORGE_GENERATOR_MAX_ATTEMPTS", "must be a positive integer")? {
            self.generator.max_attempts = value;
        }
        if let Some(value) = env.parsed("TOOLFORGE_DISCOVERY_ENABLED", "must be true or false")? {
            self.discovery.enabled = value;
        }
        if let Some(value) = env.get("TOOLFORGE_STORE_PATH") {
            self.store.path = Some(PathBuf::from(value));
        }
        if let Some(value) = env.get("TOOLFORGE_PROVIDER") {
            self.provider.kind = ProviderKind::from_str(&value).map_err(|err| match err {
                ConfigError::InvalidValue { message, .. } => ConfigError::InvalidValue {
                    key: "TOOLFORGE_PROVIDER".into(),
                    message,
                },
                other => other,
            })?;
        }
        if let Some(value) = env.get("TOOLFORGE_MODEL") {
            self.provider.model = Some(value);
        }
        if let Some(value) = env.get("TOOLFORGE_PROVIDER_BASE_URL") {
            self.provider.base_url = Some(value);
        }
        if let Some(value) = env.get("TOOLFORGE_LOG") {
            self.logging.filter = value;
        }
        if let Some(value) = env.parsed("TOOLFORGE_LOG_JSON", "must be true or false")? {
            self.logging.json = value;
        }

        if self.provider.api_key.is_none() {
            self.provider.api_key = env.get(self.provider.kind.api_key_env());
        }
        if self.discovery.github.token.is_none() {
            self.discovery.github.token = env.get(GITHUB_TOKEN_ENV);
        }
        Ok(())
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violated constraint.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.evolution.max_concurrent == 0 {
            return Err(ConfigError::invalid(
                "evolution.max_concurrent",
                "must be at least 1",
            ));
        }
        if self.sandbox.default_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "sandbox.default_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.sandbox.max_timeout_ms > MAX_SANDBOX_TIMEOUT_MS {
            return Err(ConfigError::invalid(
                "sandbox.max_timeout_ms",
                format!("must not exceed {MAX_SANDBOX_TIMEOUT_MS}"),
            ));
        }
        if self.sandbox.default_timeout_ms > self.sandbox.max_timeout_ms {
            return Err(ConfigError::invalid(
                "sandbox.default_timeout_ms",
                "must not exceed sandbox.max_timeout_ms",
            ));
        }
        if self.sandbox.memory_limit_mb == 0 {
            return Err(ConfigError::invalid(
                "sandbox.memory_limit_mb",
                "must be greater than zero",
            ));
        }
        if self.generator.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "generator.max_attempts",
                "must be at least 1",
            ));
        }
        if !(0.0..=2.0).contains(&self.generator.temperature) {
            return Err(ConfigError::invalid(
                "generator.temperature",
                "must be between 0.0 and 2.0",
            ));
        }
        if self.discovery.max_results == 0 {
            return Err(ConfigError::invalid(
                "discovery.max_results",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn parsed<T>(&self, key: &str, expected: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| raw.parse::<T>())
            .transpose()
            .map_err(|err| ConfigError::InvalidValue {
                key: key.to_owned(),
                message: format!("{expected}: {err}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = ForgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, ForgeConfig::default());
        assert!(config.evolution.auto_evolve);
        assert_eq!(config.evolution.max_concurrent, 5);
        assert_eq!(config.provider.model(), "gpt-4o-mini");
        config.validate().unwrap();
    }

    #[test]
    fn parses_sections() {
        let config = ForgeConfig::from_toml_str(
            r#"
            [evolution]
            auto_evolve = false
            max_concurrent = 2

            [sandbox]
            default_timeout_ms = 1000

            [store]
            path = "/var/lib/toolforge/store.jsonl"

            [provider]
            kind = "anthropic"

            [discovery.github]
            enabled = false
            "#,
        )
        .unwrap();
        assert!(!config.evolution.auto_evolve);
        assert_eq!(config.evolution.max_concurrent, 2);
        assert_eq!(config.sandbox.default_timeout_ms, 1_000);
        assert_eq!(config.sandbox.max_timeout_ms, MAX_SANDBOX_TIMEOUT_MS);
        assert_eq!(
            config.store.path.as_deref(),
            Some(Path::new("/var/lib/toolforge/store.jsonl"))
        );
        assert_eq!(config.provider.kind, ProviderKind::Anthropic);
        assert_eq!(config.provider.model(), "claude-3-5-sonnet-latest");
        assert!(!config.discovery.github.enabled);
        assert!(config.discovery.postman.enabled);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = ForgeConfig::from_toml_str("[evolution]\nmax_concurent = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = ForgeConfig::from_toml_str("[evolution]\nmax_concurrent = 2\n").unwrap();
        config
            .apply_env(env(&[
                ("TOOLFORGE_MAX_CONCURRENT", "7"),
                ("TOOLFORGE_AUTO_EVOLVE", "false"),
                ("TOOLFORGE_PROVIDER", "Anthropic"),
                ("ANTHROPIC_API_KEY", "sk-ant"),
                ("OPENAI_API_KEY", "sk-openai"),
                ("GITHUB_TOKEN", "ghp"),
                ("TOOLFORGE_STORE_PATH", "tools.jsonl"),
            ]))
            .unwrap();
        assert_eq!(config.evolution.max_concurrent, 7);
        assert!(!config.evolution.auto_evolve);
        assert_eq!(config.provider.kind, ProviderKind::Anthropic);
        assert_eq!(config.provider.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.discovery.github.token.as_deref(), Some("ghp"));
        assert_eq!(config.store.path.as_deref(), Some(Path::new("tools.jsonl")));
    }

    #[test]
    fn file_keys_win_over_ambient_secrets() {
        let mut config = ForgeConfig::from_toml_str("[provider]\napi_key = \"from-file\"\n").unwrap();
        config
            .apply_env(env(&[("OPENAI_API_KEY", "from-env")]))
            .unwrap();
        assert_eq!(config.provider.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn malformed_override_names_the_variable() {
        let mut config = ForgeConfig::default();
        let err = config
            .apply_env(env(&[("TOOLFORGE_MAX_CONCURRENT", "many")]))
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "TOOLFORGE_MAX_CONCURRENT"),
            other => panic!("unexpected error: {other}"),
        }

        let err = config
            .apply_env(env(&[("TOOLFORGE_PROVIDER", "llama")]))
            .unwrap_err();
        assert!(err.to_string().contains("TOOLFORGE_PROVIDER"));
    }

    #[test]
    fn blank_values_are_ignored() {
        let mut config = ForgeConfig::default();
        config
            .apply_env(env(&[("TOOLFORGE_MAX_CONCURRENT", "  ")]))
            .unwrap();
        assert_eq!(config.evolution.max_concurrent, 5);
    }

    #[test]
    fn validation_enforces_limits() {
        let mut config = ForgeConfig::default();
        config.evolution.max_concurrent = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "evolution.max_concurrent", .. })
        ));

        let mut config = ForgeConfig::default();
        config.sandbox.max_timeout_ms = 60_000;
        assert!(config.validate().is_err());

        let mut config = ForgeConfig::default();
        config.sandbox.default_timeout_ms = 20_000;
        config.sandbox.max_timeout_ms = 10_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "sandbox.default_timeout_ms", .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ForgeConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
