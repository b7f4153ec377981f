use serde::{Deserialize, Serialize};

use crate::{PresentationOutcome, PresentationRequest, PresentationTrigger};

/// Analytics record of one resolved presentation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionEvent {
    /// `implicit`, `explicit` or `by_identifier`.
    pub trigger: String,
    pub placement_id: Option<String>,
    pub placement_name: Option<String>,
    /// See [`PresentationOutcome::kind`].
    pub outcome: String,
    pub paywall_id: Option<String>,
    pub experiment_id: Option<String>,
    pub variant_id: Option<String>,
    /// Error message for `error` outcomes.
    pub error: Option<String>,
    pub timestamp: String,
}

impl DecisionEvent {
    pub(crate) fn new(request: &PresentationRequest, outcome: &PresentationOutcome) -> Self {
        let trigger = match request.trigger {
            PresentationTrigger::Implicit(_) => "implicit",
            PresentationTrigger::Explicit(_) => "explicit",
            PresentationTrigger::ByIdentifier(_) => "by_identifier",
        };
        let placement = request.placement();
        let experiment = outcome.experiment();

        DecisionEvent {
            trigger: trigger.to_owned(),
            placement_id: placement.map(|p| p.id().to_owned()),
            placement_name: placement.map(|p| p.name().to_owned()),
            outcome: outcome.kind().to_owned(),
            paywall_id: outcome.paywall_id().map(str::to_owned),
            experiment_id: experiment.map(|e| e.experiment_id.clone()),
            variant_id: experiment.map(|e| e.variant.id.clone()),
            error: match outcome {
                PresentationOutcome::Skip(crate::SkipReason::Error(err)) => Some(err.to_string()),
                _ => None,
            },
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Receives decision events, e.g. to forward them to an analytics queue.
pub trait DecisionLogger {
    fn log_decision(&self, event: DecisionEvent);
}

pub(crate) struct NoopDecisionLogger;
impl DecisionLogger for NoopDecisionLogger {
    fn log_decision(&self, _event: DecisionEvent) {}
}

impl<T: Fn(DecisionEvent)> DecisionLogger for T {
    fn log_decision(&self, event: DecisionEvent) {
        self(event);
    }
}
