use std::time::Duration;

use crate::{
    decision_logger::NoopDecisionLogger, Client, DecisionLogger, ExpressionEvaluator, Network,
    VariantChooser, WeightedRandomChooser,
};

/// Configuration for [`Client`].
pub struct ClientConfig {
    pub(crate) max_retries: u32,
    pub(crate) retry_interval: Option<Duration>,
    pub(crate) decision_logger: Box<dyn DecisionLogger + Send + Sync>,
    pub(crate) variant_chooser: Box<dyn VariantChooser>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig::new()
    }
}

impl ClientConfig {
    /// Default number of retries for network-bound work, not counting the final attempt.
    pub const DEFAULT_MAX_RETRIES: u32 = 6;

    /// Create a default configuration.
    ///
    /// ```
    /// # use paywall_core::ClientConfig;
    /// ClientConfig::new();
    /// ```
    pub fn new() -> Self {
        ClientConfig {
            max_retries: ClientConfig::DEFAULT_MAX_RETRIES,
            retry_interval: None,
            decision_logger: Box::new(NoopDecisionLogger),
            variant_chooser: Box::new(WeightedRandomChooser),
        }
    }

    /// Set how many times a failed fetch or confirmation is retried before giving up.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Wait a fixed interval between retries instead of the exponential backoff.
    pub fn retry_interval(mut self, retry_interval: Option<Duration>) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Set decision logger to pass presentation decisions to your analytics pipeline.
    ///
    /// ```
    /// # use paywall_core::{ClientConfig, DecisionEvent};
    /// let config = ClientConfig::new().decision_logger(|event: DecisionEvent| {
    ///   println!("{:?}", event);
    /// });
    /// ```
    pub fn decision_logger(
        mut self,
        decision_logger: impl DecisionLogger + Send + Sync + 'static,
    ) -> Self {
        self.decision_logger = Box::new(decision_logger);
        self
    }

    /// Override how new assignments are bucketed. Defaults to [`WeightedRandomChooser`].
    pub fn variant_chooser(mut self, variant_chooser: impl VariantChooser + 'static) -> Self {
        self.variant_chooser = Box::new(variant_chooser);
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// `evaluator` decides whether trigger rules match. The built-in
    /// [`ConditionEvaluator`](crate::ConditionEvaluator) only understands structured conditions:
    /// a rule that carries a free-form `expression` fails to evaluate and never matches. Pass your
    /// own [`ExpressionEvaluator`] if your configuration uses expressions.
    pub fn to_client<N: Network, E: ExpressionEvaluator>(
        self,
        network: N,
        evaluator: E,
    ) -> Client<N, E> {
        Client::new(self, network, evaluator)
    }
}
