use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::rules::Condition;

/// Remote configuration. This is the response format of the configuration endpoint.
///
/// A configuration is always replaced wholesale on refresh and never patched in place.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Triggers keyed implicitly by their event name.
    ///
    /// Each trigger is wrapped in `TryParse` so that one trigger in a new server format does not
    /// prevent the rest of the configuration from being served.
    #[serde(default)]
    pub triggers: Vec<TryParse<Trigger>>,
    /// Experiment definitions referenced by trigger rules.
    #[serde(default)]
    pub experiments: HashMap<String, Experiment>,
    /// Paywall definitions known to this configuration.
    #[serde(default)]
    pub paywalls: Vec<PaywallDefinition>,
    /// Triggers whose paywalls must not be preloaded.
    #[serde(default, rename = "disablePreload")]
    pub preloading_disabled: PreloadingDisabled,
}

/// Opt-out from paywall preloading, either entirely or for individual triggers.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct PreloadingDisabled {
    /// Disable preloading for every trigger.
    #[serde(default)]
    pub all: bool,
    /// Event names of triggers whose paywalls are not preloaded.
    #[serde(default)]
    pub triggers: HashSet<String>,
}

impl Configuration {
    /// Parse configuration from a JSON response body.
    pub fn from_json(body: &[u8]) -> crate::Result<Configuration> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(serde_json::Value),
}

impl<T> From<T> for TryParse<T> {
    fn from(value: T) -> TryParse<T> {
        TryParse::Parsed(value)
    }
}

impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// Binds an event name to an ordered list of rules. The first matching rule wins.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub event_name: String,
    #[serde(default)]
    pub rules: Vec<TriggerRule>,
}

/// A predicate over a placement plus the experiment it leads to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRule {
    pub experiment_id: String,
    /// Free-form expression in a grammar understood by a pluggable evaluator.
    #[serde(default)]
    pub expression: Option<String>,
    /// Structured conditions understood by [`ConditionEvaluator`](crate::ConditionEvaluator).
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl TriggerRule {
    /// A rule without any predicate. It matches every placement.
    pub fn unconditional(experiment_id: impl Into<String>) -> TriggerRule {
        TriggerRule {
            experiment_id: experiment_id.into(),
            expression: None,
            conditions: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub variants: Vec<VariantOption>,
}

/// One arm of an experiment.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VariantOption {
    pub id: String,
    #[serde(rename = "type")]
    pub variant_type: VariantType,
    /// Paywall shown for this variant. Always `None` for holdouts.
    #[serde(default)]
    pub paywall_id: Option<String>,
    /// Relative weight used when bucketing.
    #[serde(default)]
    pub percentage: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariantType {
    Treatment,
    /// The group deliberately shown no paywall for measurement purposes.
    Holdout,
}

/// Paywall as described by configuration. `cache_key` changes whenever the content changes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaywallDefinition {
    pub identifier: String,
    pub cache_key: String,
}
