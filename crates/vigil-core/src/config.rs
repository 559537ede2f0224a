use std::collections::HashMap;
use std::path::Path;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, VigilError};

/// Default horizon for the daily review prompt.
pub const REVIEW_HORIZON_DAYS: i64 = 7;
/// Window used by the fine-grained exact-due check.
pub const EXACT_DUE_WINDOW_MINUTES: i64 = 15;
/// Grace period before a pending timed projection is marked passed.
pub const AUTO_EXPIRE_GRACE_HOURS: i64 = 24;
/// Default per-channel queue depth.
pub const QUEUE_MAX_DEPTH: usize = 10;
/// Default merge window for coalescing rapid messages.
pub const QUEUE_MERGE_WINDOW_SECS: u64 = 5;

/// Top-level config (`config.yml` + `VIGIL_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VigilConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub whatsapp: Option<WhatsappConfig>,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Extra user-defined schedules delivered verbatim as synthetic prompts.
    #[serde(default)]
    pub cron: Vec<CronEntry>,
    #[serde(default)]
    pub active_hours: Option<ActiveHoursConfig>,
    /// `integrations.<name>.<key>` — injected as `<NAME>_<KEY>` env vars at
    /// startup, never overwriting an existing variable.
    #[serde(default)]
    pub integrations: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub fallback_models: Vec<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Cheaper model for the out-of-loop reflection pass. Falls back to
    /// `model` when unset.
    #[serde(default)]
    pub reflection_model: Option<String>,
    /// When set, every elevated tool call is classified by this model
    /// (ALLOW/ASK/BLOCK) before the static trust check.
    #[serde(default)]
    pub guardrail_model: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            system_prompt: String::new(),
            model: default_model(),
            fallback_models: Vec::new(),
            timezone: default_timezone(),
            reflection_model: None,
            guardrail_model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub token: String,
    /// Deny-by-default allowlist: usernames or numeric user ids.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsappConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    /// Cloud API access token.
    #[serde(default)]
    pub access_token: String,
    /// Cloud API phone number id (sender).
    #[serde(default)]
    pub phone_number_id: String,
    /// Webhook verification token.
    #[serde(default)]
    pub verify_token: String,
    /// Local port for the webhook listener.
    #[serde(default = "default_whatsapp_port")]
    pub webhook_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelsConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// Wire protocol dialect a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderApi {
    #[default]
    Anthropic,
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api: ProviderApi,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub cost: ModelCost,
}

/// USD per million tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ModelCost {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub output: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub fetch_url: FetchUrlConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebSearchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub searxng_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchUrlConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_fetch_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for FetchUrlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FilesConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_max_concurrent_workers")]
    pub max_concurrent: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronEntry {
    pub schedule: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveHoursConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub start: String,
    pub end: String,
}

fn default_agent_name() -> String {
    "Vigil".to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_whatsapp_port() -> u16 {
    8443
}
fn default_context_window() -> u32 {
    200_000
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_fetch_timeout_ms() -> u64 {
    20_000
}
fn default_max_concurrent_workers() -> usize {
    3
}

impl VigilConfig {
    /// Load `config.yml` with `VIGIL_*` env overrides.
    ///
    /// `${UPPER_CASE_NAME}` placeholders are substituted from the process
    /// environment before parsing. Template placeholders like `${city}` are
    /// left untouched, as are uppercase names with no matching variable.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| VigilError::Config(format!("cannot read {}: {e}", path.display())))?;
        let substituted = substitute_env(&raw);

        let config: VigilConfig = Figment::new()
            .merge(Yaml::string(&substituted))
            .merge(Env::prefixed("VIGIL_").split("_"))
            .extract()
            .map_err(|e| VigilError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Startup-time validation; any failure aborts boot.
    pub fn validate(&self) -> Result<()> {
        if self.agent.model.trim().is_empty() {
            return Err(VigilError::Config("agent.model must not be empty".into()));
        }
        crate::timefmt::parse_tz(&self.agent.timezone)?;
        for entry in &self.cron {
            croner::Cron::new(&entry.schedule)
                .parse()
                .map_err(|e| VigilError::InvalidCron(format!("{}: {e}", entry.schedule)))?;
        }
        if let Some(hours) = &self.active_hours {
            crate::hours::ActiveWindow::from_config(hours)?;
        }
        if let Some(wa) = &self.whatsapp {
            if wa.enabled && (wa.access_token.is_empty() || wa.phone_number_id.is_empty()) {
                return Err(VigilError::Config(
                    "whatsapp.enabled requires access_token and phone_number_id".into(),
                ));
            }
        }
        Ok(())
    }

    /// Inject `integrations.<name>.<key>` as `<NAME>_<KEY>` environment
    /// variables. Existing variables are never overwritten.
    pub fn apply_integrations(&self) {
        for (name, keys) in &self.integrations {
            for (key, value) in keys {
                let var = format!(
                    "{}_{}",
                    name.to_uppercase().replace('-', "_"),
                    key.to_uppercase().replace('-', "_")
                );
                if std::env::var_os(&var).is_none() {
                    debug!(var = %var, integration = %name, "injecting integration env var");
                    std::env::set_var(&var, value);
                }
            }
        }
    }

    /// Resolve a model id to its provider entry and per-model settings.
    pub fn find_model(&self, model_id: &str) -> Option<(&ProviderConfig, &ModelConfig)> {
        for provider in &self.models.providers {
            if let Some(m) = provider.models.iter().find(|m| m.id == model_id) {
                return Some((provider, m));
            }
        }
        None
    }
}

/// Replace `${UPPER_CASE_NAME}` with the value of that environment
/// variable. Names that are not strictly upper-case (template placeholders
/// like `${city}`) and names with no set variable pass through unchanged.
pub fn substitute_env(raw: &str) -> String {
    let re = regex::Regex::new(r"\$\{([A-Z][A-Z0-9_]*)\}").unwrap();
    re.replace_all(raw, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(val) => val,
            Err(_) => caps[0].to_string(),
        }
    })
    .into_owned()
}
