//! Model resolution and the fallback chain. The primary model is tried
//! first; transport errors and error stop-reasons advance to the next
//! fallback. The response records which model answered and how many
//! fallbacks were consumed.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use vigil_core::config::{ModelCost, ProviderApi, VigilConfig};

use crate::anthropic::AnthropicClient;
use crate::openai::OpenAiCompatClient;
use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

/// A completed call plus routing metadata for the usage ledger.
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub response: ChatResponse,
    /// Model that actually answered (may differ from the request model).
    pub model_used: String,
    /// How many chain entries failed before this one answered.
    pub fallbacks_used: usize,
    pub cost_usd: f64,
}

struct ModelEntry {
    provider: Arc<dyn LlmProvider>,
    max_tokens: u32,
    cost: ModelCost,
}

pub struct ProviderRouter {
    models: HashMap<String, ModelEntry>,
    chain: Vec<String>,
}

impl ProviderRouter {
    /// Build clients for every configured provider and validate that the
    /// primary model is actually served by one of them.
    pub fn from_config(config: &VigilConfig) -> Result<Self, ProviderError> {
        let mut models = HashMap::new();
        for provider_cfg in &config.models.providers {
            let client: Arc<dyn LlmProvider> = match provider_cfg.api {
                ProviderApi::Anthropic => Arc::new(AnthropicClient::new(
                    provider_cfg.api_key.clone(),
                    provider_cfg.base_url.clone(),
                )),
                ProviderApi::Openai => Arc::new(OpenAiCompatClient::new(
                    provider_cfg.name.clone(),
                    provider_cfg.api_key.clone(),
                    provider_cfg.base_url.clone(),
                )),
            };
            for model in &provider_cfg.models {
                models.insert(
                    model.id.clone(),
                    ModelEntry {
                        provider: Arc::clone(&client),
                        max_tokens: model.max_tokens,
                        cost: model.cost,
                    },
                );
            }
        }

        let mut chain = vec![config.agent.model.clone()];
        chain.extend(config.agent.fallback_models.iter().cloned());

        if !models.contains_key(&config.agent.model) {
            return Err(ProviderError::UnknownModel(config.agent.model.clone()));
        }
        Ok(Self { models, chain })
    }

    #[cfg(test)]
    pub fn for_tests(
        models: Vec<(String, Arc<dyn LlmProvider>)>,
        chain: Vec<String>,
    ) -> Self {
        Self {
            models: models
                .into_iter()
                .map(|(id, provider)| {
                    (
                        id,
                        ModelEntry {
                            provider,
                            max_tokens: 4096,
                            cost: ModelCost::default(),
                        },
                    )
                })
                .collect(),
            chain,
        }
    }

    pub fn primary_model(&self) -> &str {
        &self.chain[0]
    }

    /// Try the chain in order. A model missing from the provider table is
    /// skipped; transport errors and `stop_reason == "error"` advance the
    /// chain; success returns immediately.
    pub async fn send_with_fallback(
        &self,
        mut req: ChatRequest,
    ) -> Result<RoutedResponse, ProviderError> {
        let mut attempts = 0;
        for (idx, model) in self.chain.iter().enumerate() {
            let Some(entry) = self.models.get(model) else {
                warn!(model = %model, "fallback chain references unconfigured model; skipping");
                continue;
            };
            attempts += 1;
            req.model = model.clone();
            req.max_tokens = req.max_tokens.min(entry.max_tokens);
            match entry.provider.send(&req).await {
                Ok(response) if response.stop_reason == "error" => {
                    warn!(model = %model, "model returned error stop reason; falling back");
                }
                Ok(response) => {
                    if idx > 0 {
                        info!(model = %model, fallbacks = idx, "answered by fallback model");
                    }
                    let cost_usd = cost(&entry.cost, response.tokens_in, response.tokens_out);
                    return Ok(RoutedResponse {
                        response,
                        model_used: model.clone(),
                        fallbacks_used: idx,
                        cost_usd,
                    });
                }
                Err(e) if e.triggers_fallback() => {
                    warn!(model = %model, error = %e, "provider call failed; falling back");
                }
                Err(e) => return Err(e),
            }
        }
        Err(ProviderError::Exhausted { attempts })
    }

    /// Direct single-model call (reflection pass, guardrail). No fallback.
    pub async fn send_model(
        &self,
        model: &str,
        mut req: ChatRequest,
    ) -> Result<RoutedResponse, ProviderError> {
        let entry = self
            .models
            .get(model)
            .ok_or_else(|| ProviderError::UnknownModel(model.to_string()))?;
        req.model = model.to_string();
        req.max_tokens = req.max_tokens.min(entry.max_tokens);
        let response = entry.provider.send(&req).await?;
        let cost_usd = cost(&entry.cost, response.tokens_in, response.tokens_out);
        Ok(RoutedResponse {
            response,
            model_used: model.to_string(),
            fallbacks_used: 0,
            cost_usd,
        })
    }
}

/// Cost in USD given per-million-token prices.
fn cost(cost: &ModelCost, tokens_in: u32, tokens_out: u32) -> f64 {
    (tokens_in as f64 * cost.input + tokens_out as f64 * cost.output) / 1_000_000.0
}
