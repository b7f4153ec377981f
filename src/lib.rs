//! Decision core of a paywall SDK: which paywall, if any, to present for an in-app placement.
//!
//! # Overview
//!
//! Product code fires [`Placement`]s (named events with parameters). A [`Client`] looks up the
//! [`Trigger`] registered for the placement name, finds the first [`TriggerRule`] that matches the
//! placement, buckets the user into one of the rule's experiment variants and returns a
//! [`PresentationOutcome`]: either a paywall to present or the reason nothing is shown (holdout,
//! no matching rule, unknown placement).
//!
//! Assignments are sticky, carry over to refreshed configurations while their variant still
//! exists, and are queued for confirmation with the server ([`Client::flush_confirmations`]).
//! Fetched paywalls are reconciled against the caller's cache into a list of [`CacheAction`]s.
//!
//! The crate does no I/O on its own. Transport is provided through the [`Network`] trait, and
//! rule predicates are evaluated by an [`ExpressionEvaluator`] ([`ConditionEvaluator`] by
//! default). Network-bound work is retried with bounded exponential backoff and concurrent
//! identical requests are coalesced into one.
//!
//! A [`DecisionLogger`] should be provided to forward every decision to your analytics pipeline.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. Expected outcomes (holdout, no rule match, unknown
//! placement) are not errors and are reported through [`SkipReason`].
//!
//! In production, it is recommended not to treat errors as fatal: failing to show a paywall should
//! never crash the app. However, the returned errors are valuable for debugging and usually
//! indicate that developer's attention is needed.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages, under the `paywall` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into decisions.
//!
//! # Async runtime
//!
//! [`Client`] must be driven from within a [`tokio`](https://docs.rs/tokio) runtime: coalesced
//! requests are spawned onto it and retry delays use its timer.

#![warn(rustdoc::missing_crate_level_docs)]

mod assignment;
mod cache_reconciler;
mod chooser;
mod client;
mod coalescer;
mod config;
mod configuration_store;
mod decision_logger;
mod error;
mod models;
mod placement;
mod presentation;
pub mod retry;
mod rule_matcher;
mod rules;
mod trigger_registry;

pub use assignment::{
    Assignment, AssignmentLedger, ConfirmableAssignment, ConfirmableAssignments, ServerAssignment,
};
pub use cache_reconciler::{
    reconcile, reconcile_with_cached, removed_or_changed_paywall_ids, CacheAction, CachedPaywall,
};
pub use chooser::{ShardedChooser, VariantChooser, WeightedRandomChooser};
pub use client::{CacheStore, Client, Network, PaywallLoad};
pub use coalescer::RequestCoalescer;
pub use config::ClientConfig;
pub use configuration_store::{ConfigurationSnapshot, ConfigurationStore};
pub use decision_logger::{DecisionEvent, DecisionLogger};
pub use error::{Error, EvaluationError, Result};
pub use models::{
    Configuration, Experiment, PaywallDefinition, PreloadingDisabled, Trigger, TriggerRule,
    TryParse, VariantOption, VariantType,
};
pub use placement::{Parameters, Placement};
pub use presentation::{
    ExperimentContext, LoadOptions, PresentationOutcome, PresentationRequest,
    PresentationTrigger, SkipReason,
};
pub use rule_matcher::find_matching_rule;
pub use rules::{
    Condition, ConditionEvaluator, ConditionValue, ExpressionEvaluator, Literal, Operator,
    EVENT_NAME_ATTRIBUTE,
};
pub use trigger_registry::TriggerRegistry;
