//! Model capability lookup and tier routing policy
//!
//! Resolution is exact-table first, then an ordered keyword rule list, then
//! `Unknown` (fail-open): refusing an unrecognized identifier is judged
//! worse than occasionally missing an enforcement case.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Capability class of a model identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Low,
    Mid,
    High,
    Unknown,
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelTier::Low => "low",
            ModelTier::Mid => "mid",
            ModelTier::High => "high",
            ModelTier::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Provider and tier resolved for a model identifier
#[derive(Debug, Clone)]
pub struct ModelCapability {
    pub provider: String,
    pub tier: ModelTier,
}

/// Exact capability table for known model identifiers
const MODEL_CAPABILITIES: &[(&str, &str, ModelTier)] = &[
    ("claude-3-5-haiku", "anthropic", ModelTier::Low),
    ("claude-sonnet-4", "anthropic", ModelTier::Mid),
    ("claude-opus-4", "anthropic", ModelTier::High),
    ("gpt-4o-mini", "openai", ModelTier::Low),
    ("gpt-4o", "openai", ModelTier::Mid),
    ("gpt-4.1", "openai", ModelTier::Mid),
    ("o3", "openai", ModelTier::High),
    ("gemini-2.0-flash", "google", ModelTier::Low),
    ("gemini-2.5-pro", "google", ModelTier::High),
];

/// Ordered keyword fallback for tier inference; first match wins
const TIER_KEYWORD_RULES: &[(&str, ModelTier)] = &[
    ("haiku", ModelTier::Low),
    // Hyphenated so "gemini" does not match
    ("-mini", ModelTier::Low),
    ("nano", ModelTier::Low),
    ("flash", ModelTier::Low),
    ("lite", ModelTier::Low),
    ("opus", ModelTier::High),
    ("ultra", ModelTier::High),
    ("-pro", ModelTier::High),
    ("sonnet", ModelTier::Mid),
];

/// Ordered keyword fallback for provider inference; first match wins
const PROVIDER_KEYWORD_RULES: &[(&str, &str)] = &[
    ("claude", "anthropic"),
    ("gpt", "openai"),
    ("o3", "openai"),
    ("o4", "openai"),
    ("gemini", "google"),
    ("llama", "meta"),
    ("mistral", "mistral"),
];

const DEFAULT_PROVIDER: &str = "default";

/// Resolve provider and tier for a model identifier
pub fn resolve_capability(model_id: &str) -> ModelCapability {
    let normalized = model_id.trim().to_lowercase();

    for (id, provider, tier) in MODEL_CAPABILITIES {
        if normalized == *id {
            return ModelCapability {
                provider: provider.to_string(),
                tier: *tier,
            };
        }
    }

    let tier = TIER_KEYWORD_RULES
        .iter()
        .find(|(keyword, _)| normalized.contains(keyword))
        .map(|(_, tier)| *tier)
        .unwrap_or(ModelTier::Unknown);

    let provider = PROVIDER_KEYWORD_RULES
        .iter()
        .find(|(keyword, _)| normalized.contains(keyword))
        .map(|(_, provider)| provider.to_string())
        .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());

    ModelCapability { provider, tier }
}

/// Resolve just the tier of a model identifier
pub fn resolve_tier(model_id: &str) -> ModelTier {
    resolve_capability(model_id).tier
}

/// Resolve just the provider of a model identifier (concurrency key)
pub fn resolve_provider(model_id: &str) -> String {
    resolve_capability(model_id).provider
}

/// Denials tolerated before the override valve allows a forbidden pair
pub const MAX_ROUTE_DENIALS: u32 = 3;

/// Mode policy: the tier an execution mode forbids and the tier it prefers.
/// Unknown modes forbid nothing.
fn mode_policy(mode: &str) -> Option<(ModelTier, ModelTier)> {
    match mode {
        "fast" => Some((ModelTier::High, ModelTier::Low)),
        "quality" => Some((ModelTier::Low, ModelTier::High)),
        "balanced" => None,
        _ => None,
    }
}

/// Outcome of a router check
#[derive(Debug, Clone, Serialize)]
pub struct RouteDecision {
    pub allowed: bool,
    pub tier: ModelTier,
    pub reason: String,
}

/// Enforces which capability tier a sub-task may use under the active mode,
/// with the same bounded override valve as the completion guard.
#[derive(Debug, Default)]
pub struct TierRouter {
    denials: HashMap<(String, String, ModelTier), u32>,
}

impl TierRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, session_id: &str, mode: &str, model_id: &str) -> RouteDecision {
        let tier = resolve_tier(model_id);

        // Unknown tiers are always allowed (fail-open)
        if tier == ModelTier::Unknown {
            return RouteDecision {
                allowed: true,
                tier,
                reason: format!("Tier of '{}' unknown; allowing", model_id),
            };
        }

        let (forbidden, preferred) = match mode_policy(mode) {
            Some(policy) => policy,
            None => {
                return RouteDecision {
                    allowed: true,
                    tier,
                    reason: format!("Mode '{}' allows tier {}", mode, tier),
                }
            }
        };

        if tier != forbidden {
            return RouteDecision {
                allowed: true,
                tier,
                reason: format!("Mode '{}' allows tier {}", mode, tier),
            };
        }

        let key = (session_id.to_string(), mode.to_string(), tier);
        let count = self.denials.entry(key.clone()).or_insert(0);
        *count += 1;

        if *count > MAX_ROUTE_DENIALS {
            self.denials.remove(&key);
            return RouteDecision {
                allowed: true,
                tier,
                reason: format!(
                    "Tier {} forbidden in mode '{}' but denied {} times already; override",
                    tier, mode, MAX_ROUTE_DENIALS
                ),
            };
        }

        RouteDecision {
            allowed: false,
            tier,
            reason: format!(
                "Mode '{}' forbids tier {} models; use a {} tier model instead",
                mode, tier, preferred
            ),
        }
    }
}
