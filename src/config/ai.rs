//! AI provider configuration.

use serde::Deserialize;

use super::error::ValidationError;

/// Which `AiProvider` adapter to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProviderKind {
    Anthropic,
    /// Scripted echo provider; development and tests only.
    Mock,
}

impl Default for AiProviderKind {
    fn default() -> Self {
        AiProviderKind::Anthropic
    }
}

/// Streaming completion provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub provider: AiProviderKind,

    /// Provider API key; required for anthropic.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model override; the adapter's default applies when unset.
    #[serde(default)]
    pub model: Option<String>,

    /// Base URL override, for proxies.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProviderKind::default(),
            api_key: None,
            model: None,
            base_url: None,
            max_tokens: default_max_tokens(),
        }
    }
}

impl AiConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_tokens == 0 {
            return Err(ValidationError::new("ai.max_tokens", "must be at least 1"));
        }
        if self.provider == AiProviderKind::Anthropic
            && self.api_key.as_deref().map_or(true, str::is_empty)
        {
            return Err(ValidationError::new(
                "ai.api_key",
                "required for the anthropic provider",
            ));
        }
        Ok(())
    }
}
