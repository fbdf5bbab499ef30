use std::collections::BTreeMap;

use takeoff_consensus::ProviderId;
use thiserror::Error;

/// Errors raised while assembling the provider set
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("API key not configured for {provider} (set {var})")]
    MissingApiKey { provider: ProviderId, var: &'static str },

    #[error("Unknown provider '{0}' (expected claude, gpt, gemini or grok)")]
    UnknownProvider(String),

    #[error("No providers selected")]
    NoProviders,

    #[error("No provider response files found in {0}")]
    NoResponses(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Key and model for one vendor
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCredentials {
    pub api_key: String,
    pub model: String,
}

/// Live-mode settings read from the environment
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub credentials: BTreeMap<ProviderId, ProviderCredentials>,
}

impl CliConfig {
    /// Read `<VENDOR>_API_KEY` and `TAKEOFF_<PROVIDER>_MODEL` for every provider.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let credentials = ProviderId::all()
            .iter()
            .filter_map(|id| {
                let api_key = lookup(api_key_var(*id)).filter(|k| !k.trim().is_empty())?;
                let model = lookup(&model_var(*id))
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| id.model_id().to_string());
                Some((*id, ProviderCredentials { api_key, model }))
            })
            .collect();
        Self { credentials }
    }

    pub fn credentials(&self, provider: ProviderId) -> Result<&ProviderCredentials, ConfigError> {
        self.credentials
            .get(&provider)
            .ok_or(ConfigError::MissingApiKey {
                provider,
                var: api_key_var(provider),
            })
    }

    /// Providers with a configured key, in canonical order
    pub fn configured(&self) -> Vec<ProviderId> {
        self.credentials.keys().copied().collect()
    }
}

pub fn api_key_var(provider: ProviderId) -> &'static str {
    match provider {
        ProviderId::Claude => "ANTHROPIC_API_KEY",
        ProviderId::Gpt => "OPENAI_API_KEY",
        ProviderId::Gemini => "GEMINI_API_KEY",
        ProviderId::Grok => "XAI_API_KEY",
    }
}

fn model_var(provider: ProviderId) -> String {
    format!("TAKEOFF_{}_MODEL", provider.to_string().to_ascii_uppercase())
}

/// Parse a `--providers` list, keeping the caller's order and dropping repeats.
pub fn parse_providers(names: &[String]) -> Result<Vec<ProviderId>, ConfigError> {
    let mut providers = Vec::new();
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        let id = ProviderId::parse(name).ok_or_else(|| ConfigError::UnknownProvider(name.into()))?;
        if !providers.contains(&id) {
            providers.push(id);
        }
    }
    if providers.is_empty() {
        return Err(ConfigError::NoProviders);
    }
    Ok(providers)
}
