use std::sync::Arc;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that propagate to the orchestration layer.
///
/// Pure-logic outcomes (no matching rule, unknown placement, holdout) are not errors. They are
/// reported through [`PresentationOutcome::Skip`](crate::PresentationOutcome::Skip).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A placement was resolved before any configuration has been fetched.
    #[error("configuration has not been fetched yet")]
    ConfigurationNotFetched,

    /// The configuration payload could not be parsed.
    #[error("error parsing configuration")]
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    ConfigurationParse(#[source] Arc<serde_json::Error>),

    /// A fetch or confirmation request failed.
    #[error("transmission failed: {0}")]
    Transmission(String),

    /// The operation kept failing until the retry budget ran out.
    #[error("giving up after {attempts} attempts")]
    RetryExhausted {
        /// Number of attempts made, including the final one.
        attempts: u32,
        /// Error returned by the final attempt.
        #[source]
        source: Arc<Error>,
    },

    /// The shared task of a coalesced request finished without producing a value.
    #[error("coalesced task aborted before producing a result")]
    CoalescedTaskAborted,

    /// A rule references an experiment missing from the configuration.
    #[error("experiment {0:?} not found in configuration")]
    ExperimentNotFound(String),

    /// An experiment has no variant to assign.
    #[error("experiment {0:?} has no variants")]
    NoVariantsFound(String),

    /// A treatment variant does not name the paywall to show.
    #[error("variant {variant_id:?} of experiment {experiment_id:?} has no paywall")]
    PaywallNotConfigured {
        experiment_id: String,
        variant_id: String,
    },
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::ConfigurationParse(Arc::new(value))
    }
}

/// Failure to evaluate a rule expression.
///
/// The rule matcher never propagates these: a rule that fails to evaluate is a non-match.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EvaluationError {
    /// The evaluator does not understand the rule's expression.
    #[error("unsupported expression: {0}")]
    UnsupportedExpression(String),

    /// Any other evaluator-specific failure.
    #[error("{0}")]
    Other(String),
}
