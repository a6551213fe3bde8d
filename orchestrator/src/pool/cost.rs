//! Pricing table and cost ledger

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Constants
// ============================================================================

/// Cost per 1M input tokens (USD) for providers missing from the table
pub const DEFAULT_INPUT_COST_PER_MILLION: f64 = 5.0;

/// Cost per 1M output tokens (USD) for providers missing from the table
pub const DEFAULT_OUTPUT_COST_PER_MILLION: f64 = 15.0;

// ============================================================================
// Pricing
// ============================================================================

/// USD per 1M tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Rate {
    pub const FREE: Rate = Rate {
        input_per_million: 0.0,
        output_per_million: 0.0,
    };

    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    pub fn cost(&self, tokens_in: u64, tokens_out: u64) -> f64 {
        (tokens_in as f64 / 1_000_000.0) * self.input_per_million
            + (tokens_out as f64 / 1_000_000.0) * self.output_per_million
    }
}

impl Default for Rate {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_COST_PER_MILLION, DEFAULT_OUTPUT_COST_PER_MILLION)
    }
}

/// A provider's default rate plus per-model overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPricing {
    #[serde(flatten)]
    pub rate: Rate,
    #[serde(default)]
    pub models: HashMap<String, Rate>,
}

impl ProviderPricing {
    pub fn flat(rate: Rate) -> Self {
        Self {
            rate,
            models: HashMap::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>, rate: Rate) -> Self {
        self.models.insert(model.into(), rate);
        self
    }

    /// Exact model match first, then the longest matching model prefix
    fn rate_for(&self, model: &str) -> Rate {
        if let Some(rate) = self.models.get(model) {
            return *rate;
        }
        self.models
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, rate)| *rate)
            .unwrap_or(self.rate)
    }
}

/// Per-provider pricing used to bill agent invocations
#[derive(Debug, Clone, PartialEq)]
pub struct PricingTable {
    providers: HashMap<String, ProviderPricing>,
    fallback: Rate,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert("ollama".to_string(), ProviderPricing::flat(Rate::FREE));
        providers.insert(
            "anthropic".to_string(),
            ProviderPricing::flat(Rate::new(3.0, 15.0))
                .with_model("claude-haiku", Rate::new(1.0, 5.0))
                .with_model("claude-opus", Rate::new(5.0, 25.0)),
        );
        providers.insert(
            "openai".to_string(),
            ProviderPricing::flat(Rate::new(2.5, 10.0))
                .with_model("gpt-4o-mini", Rate::new(0.15, 0.6)),
        );
        Self {
            providers,
            fallback: Rate::default(),
        }
    }
}

impl PricingTable {
    /// Table with no providers; everything bills at the fallback rate
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
            fallback: Rate::default(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>, pricing: ProviderPricing) -> Self {
        self.providers.insert(provider.into(), pricing);
        self
    }

    /// Replace or add providers from configuration
    pub fn merge(&mut self, overrides: HashMap<String, ProviderPricing>) {
        self.providers.extend(overrides);
    }

    pub fn rate(&self, provider: &str, model: &str) -> Rate {
        self.providers
            .get(provider)
            .map(|p| p.rate_for(model))
            .unwrap_or(self.fallback)
    }

    pub fn cost(&self, provider: &str, model: &str, tokens_in: u64, tokens_out: u64) -> f64 {
        self.rate(provider, model).cost(tokens_in, tokens_out)
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// Running cost totals; only ever grows until reset
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostLedger {
    pub total: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub invocations: u64,
    pub by_agent: HashMap<String, f64>,
    pub by_workflow: HashMap<String, f64>,
    pub by_project: HashMap<String, f64>,
}

impl CostLedger {
    pub fn record(
        &mut self,
        agent_id: &str,
        workflow_id: Option<&str>,
        project_id: Option<&str>,
        cost: f64,
        tokens_in: u64,
        tokens_out: u64,
    ) {
        let cost = cost.max(0.0);
        self.total += cost;
        self.tokens_in += tokens_in;
        self.tokens_out += tokens_out;
        self.invocations += 1;
        *self.by_agent.entry(agent_id.to_string()).or_default() += cost;
        if let Some(workflow_id) = workflow_id {
            *self.by_workflow.entry(workflow_id.to_string()).or_default() += cost;
        }
        if let Some(project_id) = project_id {
            *self.by_project.entry(project_id.to_string()).or_default() += cost;
        }
    }
}

/// Read-only snapshot returned by `AgentPool::cost_metrics`
pub type CostMetrics = CostLedger;
