//! Provider registry.
//!
//! Constructs and holds all configured LLM provider instances. At startup the
//! registry reads the [`LlmConfig`], resolves authentication (env vars, direct
//! keys), and instantiates the appropriate adapter for each configured provider.

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use ao_domain::config::{LlmConfig, LlmStartupPolicy, ProviderKind};
use ao_domain::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds all instantiated LLM providers and role assignments.
///
/// When the startup policy is `allow_none`, the registry also records
/// initialization errors so they can be surfaced by the caller (e.g. a
/// readiness endpoint).
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    roles: HashMap<String, String>,
    /// Provider IDs that failed to initialize, with their error messages.
    init_errors: Vec<ProviderInitError>,
}

/// Records a provider that failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_id: String,
    pub kind: String,
    /// Error message with any potential secrets masked.
    pub error: String,
}

/// Mask substrings that look like API keys or bearer tokens in an error
/// message, so raw secrets never leak into logs or readiness endpoints.
fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = if trimmed.len() > 8 {
                format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..])
            } else {
                "***masked***".to_string()
            };
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

impl ProviderRegistry {
    /// Build the registry from the application's [`LlmConfig`].
    ///
    /// Every entry in `config.providers` is instantiated via
    /// [`OpenAiCompatProvider`], the one concrete wire adapter this crate
    /// ships — it covers `OpenaiCompat` and `AzureOpenai`. Any other kind
    /// is recorded as an init error rather than instantiated, since this
    /// crate carries no vendor-specific wire logic for it; operators wire
    /// their own [`LlmProvider`] impl in and insert it directly.
    ///
    /// Providers that fail to initialize are logged and skipped rather than
    /// aborting the entire startup.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut init_errors: Vec<ProviderInitError> = Vec::new();

        for pc in &config.providers {
            let result: Result<Arc<dyn LlmProvider>> = match pc.kind {
                ProviderKind::OpenaiCompat | ProviderKind::AzureOpenai => {
                    OpenAiCompatProvider::from_config(pc)
                        .map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                }
                ProviderKind::Anthropic | ProviderKind::Google | ProviderKind::AwsBedrock => {
                    Err(Error::Config(format!(
                        "provider kind {:?} has no built-in wire adapter; \
                         register an LlmProvider impl for \"{}\" manually",
                        pc.kind, pc.id
                    )))
                }
            };

            match result {
                Ok(provider) => {
                    tracing::info!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        "registered LLM provider"
                    );
                    providers.insert(pc.id.clone(), provider);
                }
                Err(e) => {
                    let safe_error = mask_secrets(&e.to_string());
                    tracing::warn!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        error = %safe_error,
                        "failed to initialize LLM provider, skipping"
                    );
                    init_errors.push(ProviderInitError {
                        provider_id: pc.id.clone(),
                        kind: format!("{:?}", pc.kind),
                        error: safe_error,
                    });
                }
            }
        }

        if providers.is_empty() && !config.providers.is_empty() {
            match config.startup_policy {
                LlmStartupPolicy::RequireOne => {
                    return Err(Error::Config(
                        "all configured LLM providers failed to initialize \
                         (startup_policy = require_one)"
                            .into(),
                    ));
                }
                LlmStartupPolicy::AllowNone => {
                    tracing::warn!(
                        failed_providers = init_errors.len(),
                        "no LLM providers initialized (startup_policy = allow_none); \
                         phases needing a provider will fail with Upstream until one \
                         is configured"
                    );
                }
            }
        }

        let mut roles = HashMap::new();
        for (role_name, role_cfg) in &config.roles {
            roles.insert(role_name.clone(), role_cfg.model.clone());
        }

        Ok(Self {
            providers,
            roles,
            init_errors,
        })
    }

    /// Build an empty registry with no providers and no roles, for tests
    /// that inject providers directly via [`Self::insert`].
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
            roles: HashMap::new(),
            init_errors: Vec::new(),
        }
    }

    /// Register a provider directly, bypassing config-driven construction.
    pub fn insert(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.provider_id().to_string(), provider);
    }

    /// Assign a role to a "provider_id/model_name" spec.
    pub fn assign_role(&mut self, role: impl Into<String>, model_spec: impl Into<String>) {
        self.roles.insert(role.into(), model_spec.into());
    }

    /// Look up a provider by its config id.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// Get the provider assigned to a given role (e.g. "planner", "executor").
    /// The role config stores "provider_id/model_name"; we split on '/' and
    /// look up the provider by the first segment.
    pub fn for_role(&self, role: &str) -> Option<Arc<dyn LlmProvider>> {
        let model_spec = self.roles.get(role)?;
        let provider_id = model_spec.split('/').next().unwrap_or(model_spec);
        self.providers.get(provider_id).cloned()
    }

    /// Get the model name assigned to a given role.
    pub fn model_for_role(&self, role: &str) -> Option<&str> {
        self.roles.get(role).map(|s| s.as_str())
    }

    /// Iterate over all registered providers.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn LlmProvider>)> {
        self.providers.iter()
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// List all registered provider IDs (sorted).
    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// List roles and their assigned model specs.
    pub fn list_roles(&self) -> HashMap<String, String> {
        self.roles.clone()
    }

    /// Provider initialization errors (empty if all succeeded).
    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    #[test]
    fn empty_registry_has_no_providers() {
        let reg = ProviderRegistry::empty();
        assert!(reg.is_empty());
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn insert_and_role_lookup() {
        let mut reg = ProviderRegistry::empty();
        reg.insert(Arc::new(MockProvider::new("local")));
        reg.assign_role("planner", "local/mock-model");

        assert!(reg.get("local").is_some());
        assert!(reg.for_role("planner").is_some());
        assert_eq!(reg.model_for_role("planner"), Some("local/mock-model"));
        assert!(reg.for_role("missing").is_none());
    }

    #[test]
    fn mask_secrets_redacts_long_tokens() {
        let msg = "unauthorized: key sk-abcdefghijklmnopqrstuvwxyz1234 rejected";
        let masked = mask_secrets(msg);
        assert!(!masked.contains("sk-abcdefghijklmnopqrstuvwxyz1234"));
        assert!(masked.contains("sk-a...1234"));
    }

    #[test]
    fn unknown_provider_kind_records_init_error() {
        let config = LlmConfig {
            providers: vec![ao_domain::config::ProviderConfig {
                id: "claude".into(),
                kind: ProviderKind::Anthropic,
                base_url: "https://api.anthropic.com".into(),
                auth: Default::default(),
                default_model: None,
            }],
            ..Default::default()
        };
        let reg = ProviderRegistry::from_config(&config).unwrap();
        assert!(reg.is_empty());
        assert_eq!(reg.init_errors().len(), 1);
        assert_eq!(reg.init_errors()[0].provider_id, "claude");
    }

    #[test]
    fn require_one_policy_errors_when_all_fail() {
        let config = LlmConfig {
            startup_policy: LlmStartupPolicy::RequireOne,
            providers: vec![ao_domain::config::ProviderConfig {
                id: "claude".into(),
                kind: ProviderKind::Anthropic,
                base_url: "https://api.anthropic.com".into(),
                auth: Default::default(),
                default_model: None,
            }],
            ..Default::default()
        };
        assert!(ProviderRegistry::from_config(&config).is_err());
    }
}
