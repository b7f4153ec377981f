use serde::{Deserialize, Serialize};

use crate::{Assignment, Error, Experiment, Placement, VariantOption};

/// What asked for a paywall.
#[derive(Debug, Clone, PartialEq)]
pub enum PresentationTrigger {
    /// A placement fired by the SDK itself (e.g., app lifecycle events).
    Implicit(Placement),
    /// A placement registered by product code.
    Explicit(Placement),
    /// A paywall requested directly, bypassing rules and experiments.
    ByIdentifier(String),
}

/// One attempt to resolve a paywall. Read-only once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentationRequest {
    pub trigger: PresentationTrigger,
    /// Whether an already cached paywall may be reused.
    pub use_cache: bool,
    /// Presentation overrides forwarded untouched to the rendering layer.
    pub overrides: Option<serde_json::Value>,
}

impl PresentationRequest {
    pub fn implicit(placement: Placement) -> PresentationRequest {
        PresentationRequest::new(PresentationTrigger::Implicit(placement))
    }

    pub fn explicit(placement: Placement) -> PresentationRequest {
        PresentationRequest::new(PresentationTrigger::Explicit(placement))
    }

    pub fn by_identifier(paywall_id: impl Into<String>) -> PresentationRequest {
        PresentationRequest::new(PresentationTrigger::ByIdentifier(paywall_id.into()))
    }

    fn new(trigger: PresentationTrigger) -> PresentationRequest {
        PresentationRequest {
            trigger,
            use_cache: true,
            overrides: None,
        }
    }

    pub fn with_use_cache(mut self, use_cache: bool) -> PresentationRequest {
        self.use_cache = use_cache;
        self
    }

    pub fn with_overrides(mut self, overrides: serde_json::Value) -> PresentationRequest {
        self.overrides = Some(overrides);
        self
    }

    /// The placement behind this request. `None` for requests by identifier.
    pub fn placement(&self) -> Option<&Placement> {
        match &self.trigger {
            PresentationTrigger::Implicit(placement) | PresentationTrigger::Explicit(placement) => {
                Some(placement)
            }
            PresentationTrigger::ByIdentifier(_) => None,
        }
    }

    /// Options for loading the paywall this request resolves to.
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            is_preloading: false,
            is_for_presentation: true,
            use_cache: self.use_cache,
        }
    }
}

/// How a paywall is being loaded. Drives cache reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub is_preloading: bool,
    pub is_for_presentation: bool,
    pub use_cache: bool,
}

impl LoadOptions {
    /// Background preload of a paywall likely to be presented soon.
    pub fn preload() -> LoadOptions {
        LoadOptions {
            is_preloading: true,
            is_for_presentation: true,
            use_cache: true,
        }
    }
}

/// The experiment and variant that governed a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentContext {
    pub experiment_id: String,
    pub group_id: String,
    pub variant: VariantOption,
}

impl ExperimentContext {
    pub(crate) fn new(experiment: &Experiment, assignment: &Assignment) -> ExperimentContext {
        ExperimentContext {
            experiment_id: experiment.id.clone(),
            group_id: experiment.group_id.clone(),
            variant: assignment.variant.clone(),
        }
    }
}

/// Result of resolving a presentation request.
#[derive(Debug, Clone)]
pub enum PresentationOutcome {
    /// Show the paywall. `experiment` is `None` for requests by identifier.
    Present {
        paywall_id: String,
        experiment: Option<ExperimentContext>,
    },
    /// Do not show anything.
    Skip(SkipReason),
}

impl PresentationOutcome {
    pub fn paywall_id(&self) -> Option<&str> {
        match self {
            PresentationOutcome::Present { paywall_id, .. } => Some(paywall_id),
            PresentationOutcome::Skip(_) => None,
        }
    }

    pub fn experiment(&self) -> Option<&ExperimentContext> {
        match self {
            PresentationOutcome::Present { experiment, .. } => experiment.as_ref(),
            PresentationOutcome::Skip(SkipReason::Holdout(experiment)) => Some(experiment),
            PresentationOutcome::Skip(_) => None,
        }
    }

    /// Short name used in analytics records.
    pub fn kind(&self) -> &'static str {
        match self {
            PresentationOutcome::Present { .. } => "present",
            PresentationOutcome::Skip(SkipReason::Holdout(_)) => "holdout",
            PresentationOutcome::Skip(SkipReason::NoRuleMatch) => "no_rule_match",
            PresentationOutcome::Skip(SkipReason::EventNotFound) => "event_not_found",
            PresentationOutcome::Skip(SkipReason::Error(_)) => "error",
        }
    }
}

/// Why a paywall is not shown. Only `Error` represents a failure; the rest are expected outcomes.
#[derive(Debug, Clone)]
pub enum SkipReason {
    /// The user is in the experiment's holdout group.
    Holdout(ExperimentContext),
    /// The placement's trigger has no rule matching the placement.
    NoRuleMatch,
    /// No trigger is registered for the placement's name.
    EventNotFound,
    Error(Error),
}
