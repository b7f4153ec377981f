use std::{
    collections::{BTreeSet, HashSet},
    future::Future,
    sync::Arc,
};

use crate::{
    cache_reconciler::{reconcile_with_cached, removed_or_changed_paywall_ids},
    coalescer::RequestCoalescer,
    configuration_store::{ConfigurationSnapshot, ConfigurationStore},
    decision_logger::DecisionEvent,
    retry, CacheAction, CachedPaywall, ClientConfig, ConditionEvaluator, Configuration,
    ConfirmableAssignments, Error, ExperimentContext, ExpressionEvaluator, LoadOptions,
    PresentationOutcome, PresentationRequest, PresentationTrigger, Result, ServerAssignment,
    SkipReason,
};

/// Transport used by [`Client`]. The crate never does I/O on its own.
///
/// Every method is retried by the client according to [`ClientConfig`], so implementations should
/// make a single attempt and report failures as [`Error::Transmission`].
pub trait Network: Send + Sync + 'static {
    fn fetch_configuration(&self) -> impl Future<Output = Result<Configuration>> + Send;

    /// Assignments the server already knows about for the current user.
    fn fetch_assignments(&self) -> impl Future<Output = Result<Vec<ServerAssignment>>> + Send;

    fn confirm_assignments(
        &self,
        batch: &ConfirmableAssignments,
    ) -> impl Future<Output = Result<()>> + Send;

    fn fetch_paywall(&self, identifier: &str)
        -> impl Future<Output = Result<CachedPaywall>> + Send;
}

/// Read access to the paywall cache owned by the rendering layer.
pub trait CacheStore {
    fn cached_paywall(&self, identifier: &str) -> Option<CachedPaywall>;
}

/// A fetched paywall and the cache actions the caller must apply for it.
#[derive(Debug, Clone, PartialEq)]
pub struct PaywallLoad {
    pub paywall: CachedPaywall,
    pub actions: Vec<CacheAction>,
}

/// Paywall decision client.
///
/// The client owns the active configuration snapshot and drives the pure decision logic with it:
/// trigger lookup, rule matching, assignment and cache reconciliation. Network-bound work is
/// retried and coalesced, so concurrent callers asking for the same thing share one request.
///
/// In order to create a client instance, first create [`ClientConfig`].
pub struct Client<N, E = ConditionEvaluator> {
    network: Arc<N>,
    evaluator: E,
    store: Arc<ConfigurationStore>,
    config: ClientConfig,
    configuration_requests: RequestCoalescer<(), Result<HashSet<String>>>,
    assignment_requests: RequestCoalescer<(), Result<Vec<ServerAssignment>>>,
    paywall_requests: RequestCoalescer<String, Result<CachedPaywall>>,
}

impl<N: Network, E: ExpressionEvaluator> Client<N, E> {
    pub fn new(config: ClientConfig, network: N, evaluator: E) -> Self {
        Client {
            network: Arc::new(network),
            evaluator,
            store: Arc::new(ConfigurationStore::new()),
            config,
            configuration_requests: RequestCoalescer::new(),
            assignment_requests: RequestCoalescer::new(),
            paywall_requests: RequestCoalescer::new(),
        }
    }

    /// The active configuration snapshot, if any configuration has been installed.
    pub fn configuration(&self) -> Option<Arc<ConfigurationSnapshot>> {
        self.store.get_configuration()
    }

    /// Install `configuration` directly (e.g., one restored from disk), replacing the active
    /// snapshot. Assignments whose experiment and variant still exist carry over.
    ///
    /// Returns the identifiers of paywalls whose cached entries are now stale.
    pub fn set_configuration(&self, configuration: Configuration) -> HashSet<String> {
        install_configuration(&self.store, configuration)
    }

    /// Fetch a new configuration and make it active. Assignments carry over as with
    /// [`set_configuration`](Self::set_configuration).
    ///
    /// Concurrent calls share a single fetch. Returns the identifiers of paywalls that were
    /// removed or changed compared to the previous configuration; their cached entries should be
    /// evicted.
    pub async fn refresh_configuration(&self) -> Result<HashSet<String>> {
        let network = Arc::clone(&self.network);
        let store = Arc::clone(&self.store);
        let (max_retries, retry_interval) = (self.config.max_retries, self.config.retry_interval);

        self.configuration_requests
            .get((), move || async move {
                retry::retrying(max_retries, retry_interval, || network.fetch_configuration())
                    .await
                    .inspect_err(|err| {
                        log::warn!(target: "paywall", "failed to fetch configuration: {}", err);
                    })
                    .map(|configuration| install_configuration(&store, configuration))
            })
            .await?
    }

    /// Seed the active snapshot's ledger with assignments the server already confirmed.
    ///
    /// Returns the number of assignments received.
    pub async fn fetch_server_assignments(&self) -> Result<usize> {
        let snapshot = self
            .store
            .get_configuration()
            .ok_or(Error::ConfigurationNotFetched)?;

        let network = Arc::clone(&self.network);
        let (max_retries, retry_interval) = (self.config.max_retries, self.config.retry_interval);
        let assignments = self
            .assignment_requests
            .get((), move || async move {
                retry::retrying(max_retries, retry_interval, || network.fetch_assignments()).await
            })
            .await??;

        let count = assignments.len();
        log::debug!(target: "paywall", count; "applying server assignments");
        snapshot
            .ledger()
            .apply_server_assignments(assignments, &snapshot.configuration().experiments);
        Ok(count)
    }

    /// Decide what to present for `request`.
    ///
    /// Never fails: errors surface as [`SkipReason::Error`]. Every decision is passed to the
    /// configured [`DecisionLogger`](crate::DecisionLogger).
    pub async fn resolve(&self, request: &PresentationRequest) -> PresentationOutcome {
        let outcome = self.decide(request).await;

        log::trace!(target: "paywall",
                    placement_name:serde = request.placement().map(|p| p.name()),
                    outcome = outcome.kind(),
                    paywall_id:serde = outcome.paywall_id();
                    "resolved presentation request");

        let event = DecisionEvent::new(request, &outcome);
        self.config.decision_logger.log_decision(event);

        outcome
    }

    async fn decide(&self, request: &PresentationRequest) -> PresentationOutcome {
        let placement = match &request.trigger {
            PresentationTrigger::ByIdentifier(paywall_id) => {
                return PresentationOutcome::Present {
                    paywall_id: paywall_id.clone(),
                    experiment: None,
                };
            }
            PresentationTrigger::Implicit(placement) | PresentationTrigger::Explicit(placement) => {
                placement
            }
        };

        let Some(snapshot) = self.store.get_configuration() else {
            log::warn!(target: "paywall",
                       placement_name = placement.name();
                       "resolving a placement before configuration has been fetched");
            return PresentationOutcome::Skip(SkipReason::Error(Error::ConfigurationNotFetched));
        };

        let Some(trigger) = snapshot.registry().get(placement.name()) else {
            return PresentationOutcome::Skip(SkipReason::EventNotFound);
        };

        let Some(rule) =
            crate::rule_matcher::find_matching_rule(placement, trigger, &self.evaluator).await
        else {
            return PresentationOutcome::Skip(SkipReason::NoRuleMatch);
        };

        let Some(experiment) = snapshot.experiment(&rule.experiment_id) else {
            log::warn!(target: "paywall",
                       placement_name = placement.name(),
                       experiment_id = rule.experiment_id.as_str();
                       "matched rule references an unknown experiment");
            return PresentationOutcome::Skip(SkipReason::Error(Error::ExperimentNotFound(
                rule.experiment_id.clone(),
            )));
        };

        let Some(assignment) = snapshot
            .ledger()
            .resolve(experiment, self.config.variant_chooser.as_ref())
        else {
            return PresentationOutcome::Skip(SkipReason::Error(Error::NoVariantsFound(
                experiment.id.clone(),
            )));
        };

        let context = ExperimentContext::new(experiment, &assignment);
        if assignment.is_holdout() {
            return PresentationOutcome::Skip(SkipReason::Holdout(context));
        }

        match &assignment.variant.paywall_id {
            Some(paywall_id) => PresentationOutcome::Present {
                paywall_id: paywall_id.clone(),
                experiment: Some(context),
            },
            None => PresentationOutcome::Skip(SkipReason::Error(Error::PaywallNotConfigured {
                experiment_id: experiment.id.clone(),
                variant_id: assignment.variant.id.clone(),
            })),
        }
    }

    /// Send pending assignments of the active snapshot to the server.
    ///
    /// On success the assignments are marked confirmed and their count is returned. On failure
    /// the batch is put back in the queue for the next flush and the error is returned.
    pub async fn flush_confirmations(&self) -> Result<usize> {
        let Some(snapshot) = self.store.get_configuration() else {
            return Ok(0);
        };

        let batch = snapshot.ledger().drain_pending_confirmations();
        if batch.is_empty() {
            return Ok(0);
        }

        let sent = retry::retrying(self.config.max_retries, self.config.retry_interval, || {
            self.network.confirm_assignments(&batch)
        })
        .await;

        // A refresh may have replaced the snapshot while the batch was in flight. Its
        // assignments now live in the current ledger.
        let current = self
            .store
            .get_configuration()
            .unwrap_or_else(|| Arc::clone(&snapshot));

        match sent {
            Ok(()) => {
                log::debug!(target: "paywall", count = batch.len(); "confirmed assignments");
                current.ledger().mark_confirmed(batch.experiment_ids());
                if !Arc::ptr_eq(&current, &snapshot) {
                    snapshot.ledger().mark_confirmed(batch.experiment_ids());
                }
                Ok(batch.len())
            }
            Err(err) => {
                log::warn!(target: "paywall",
                           count = batch.len();
                           "failed to confirm assignments, requeueing: {}", err);
                current.ledger().requeue(batch);
                Err(err)
            }
        }
    }

    /// Fetch paywall `identifier` and reconcile it against the cached entry.
    ///
    /// Concurrent loads of the same paywall share a single fetch.
    pub async fn load_paywall(
        &self,
        identifier: &str,
        cache: &impl CacheStore,
        options: LoadOptions,
    ) -> Result<PaywallLoad> {
        let network = Arc::clone(&self.network);
        let (max_retries, retry_interval) = (self.config.max_retries, self.config.retry_interval);
        let key = identifier.to_owned();
        let paywall = self
            .paywall_requests
            .get(identifier.to_owned(), move || async move {
                retry::retrying(max_retries, retry_interval, || network.fetch_paywall(&key)).await
            })
            .await??;

        let cached = if options.use_cache {
            cache.cached_paywall(identifier)
        } else {
            None
        };
        let actions = reconcile_with_cached(
            &paywall,
            cached.as_ref(),
            options.is_preloading,
            options.is_for_presentation,
        );

        log::trace!(target: "paywall",
                    paywall_id = identifier,
                    cache_key = paywall.cache_key.as_str(),
                    actions:? = actions;
                    "loaded paywall");

        Ok(PaywallLoad { paywall, actions })
    }

    /// Preload the treatment paywalls of every trigger whose preloading is not disabled.
    ///
    /// Experiments that have no assignment yet are bucketed ahead of time with
    /// [`AssignmentLedger::preassign`](crate::AssignmentLedger::preassign), so the preloaded
    /// paywall is the one a later decision presents. Paywalls that fail to load are logged and
    /// skipped.
    pub async fn preload_paywalls(&self, cache: &impl CacheStore) -> Vec<PaywallLoad> {
        let Some(snapshot) = self.store.get_configuration() else {
            return Vec::new();
        };

        let disabled = &snapshot.configuration().preloading_disabled;
        if disabled.all {
            log::debug!(target: "paywall", "preloading is disabled");
            return Vec::new();
        }

        let chooser = self.config.variant_chooser.as_ref();
        let paywall_ids: BTreeSet<String> = snapshot
            .registry()
            .triggers()
            .filter(|trigger| !disabled.triggers.contains(&trigger.event_name))
            .flat_map(|trigger| &trigger.rules)
            .filter_map(|rule| snapshot.experiment(&rule.experiment_id))
            .filter_map(|experiment| snapshot.ledger().preassign(experiment, chooser))
            .filter(|assignment| !assignment.is_holdout())
            .filter_map(|assignment| assignment.variant.paywall_id)
            .collect();

        let mut loaded = Vec::with_capacity(paywall_ids.len());
        for paywall_id in paywall_ids {
            match self
                .load_paywall(&paywall_id, cache, LoadOptions::preload())
                .await
            {
                Ok(load) => loaded.push(load),
                Err(err) => {
                    log::warn!(target: "paywall",
                               paywall_id = paywall_id.as_str();
                               "failed to preload paywall: {}", err);
                }
            }
        }
        loaded
    }
}

fn install_configuration(
    store: &ConfigurationStore,
    configuration: Configuration,
) -> HashSet<String> {
    let snapshot = Arc::new(ConfigurationSnapshot::new(configuration));
    let previous = store.set_configuration(Arc::clone(&snapshot));

    let stale = match previous {
        Some(previous) => {
            snapshot
                .ledger()
                .carry_over(previous.ledger(), &snapshot.configuration().experiments);
            removed_or_changed_paywall_ids(
                &previous.configuration().paywalls,
                &snapshot.configuration().paywalls,
            )
        }
        None => HashSet::new(),
    };

    log::debug!(target: "paywall",
                triggers = snapshot.registry().len(),
                experiments = snapshot.configuration().experiments.len(),
                stale_paywalls = stale.len();
                "installed new configuration");

    stale
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use serde_json::json;

    use super::{CacheStore, Network};
    use crate::{
        CacheAction, CachedPaywall, ClientConfig, ConditionEvaluator, Configuration,
        ConfirmableAssignment, ConfirmableAssignments, DecisionEvent, Error, Experiment,
        LoadOptions, Parameters, Placement, PresentationOutcome, PresentationRequest, Result,
        ServerAssignment, SkipReason, Trigger, TriggerRule, VariantChooser, VariantOption,
    };

    fn configuration(paywall_cache_key: &str) -> Configuration {
        serde_json::from_value(json!({
            "triggers": [
                {
                    "eventName": "campaign_trigger",
                    "rules": [{
                        "experimentId": "campaign",
                        "conditions": [{ "attribute": "plan", "operator": "ONE_OF", "value": ["free"] }]
                    }]
                },
                { "eventName": "holdout_trigger", "rules": [{ "experimentId": "held" }] },
                { "eventName": "dangling_trigger", "rules": [{ "experimentId": "missing" }] }
            ],
            "experiments": {
                "campaign": {
                    "id": "campaign",
                    "groupId": "group",
                    "variants": [
                        { "id": "treatment", "type": "TREATMENT", "paywallId": "pw", "percentage": 100 }
                    ]
                },
                "held": {
                    "id": "held",
                    "groupId": "group",
                    "variants": [{ "id": "holdout", "type": "HOLDOUT", "percentage": 100 }]
                }
            },
            "paywalls": [
                { "identifier": "pw", "cacheKey": paywall_cache_key },
                { "identifier": "retired", "cacheKey": "1" }
            ]
        }))
        .unwrap()
    }

    fn placement(name: &str, plan: &str) -> Placement {
        let mut parameters = Parameters::new();
        parameters.insert("plan".to_owned(), json!(plan));
        Placement::new(name, parameters)
    }

    fn paywall(identifier: &str, cache_key: &str) -> CachedPaywall {
        CachedPaywall {
            identifier: identifier.to_owned(),
            cache_key: cache_key.to_owned(),
            content: json!({ "title": identifier }),
        }
    }

    #[derive(Default)]
    struct FakeNetwork {
        configuration: Mutex<Configuration>,
        configuration_fetches: AtomicUsize,
        server_assignments: Vec<ServerAssignment>,
        fail_confirmations: AtomicBool,
        confirmed: Mutex<Vec<ConfirmableAssignment>>,
        paywall_cache_key: Mutex<String>,
        paywall_fetches: AtomicUsize,
    }

    impl Network for FakeNetwork {
        async fn fetch_configuration(&self) -> Result<Configuration> {
            self.configuration_fetches.fetch_add(1, Ordering::SeqCst);
            let configuration = self.configuration.lock().unwrap().clone();
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(configuration)
        }

        async fn fetch_assignments(&self) -> Result<Vec<ServerAssignment>> {
            Ok(self.server_assignments.clone())
        }

        async fn confirm_assignments(&self, batch: &ConfirmableAssignments) -> Result<()> {
            if self.fail_confirmations.load(Ordering::SeqCst) {
                return Err(Error::Transmission("offline".to_owned()));
            }
            self.confirmed
                .lock()
                .unwrap()
                .extend(batch.assignments.iter().cloned());
            Ok(())
        }

        async fn fetch_paywall(&self, identifier: &str) -> Result<CachedPaywall> {
            self.paywall_fetches.fetch_add(1, Ordering::SeqCst);
            let cache_key = self.paywall_cache_key.lock().unwrap().clone();
            tokio::time::sleep(Duration::from_millis(10)).await;
            if identifier == "missing" {
                return Err(Error::Transmission("not found".to_owned()));
            }
            Ok(paywall(identifier, &cache_key))
        }
    }

    #[derive(Default)]
    struct FakeCache {
        paywalls: HashMap<String, CachedPaywall>,
    }

    impl CacheStore for FakeCache {
        fn cached_paywall(&self, identifier: &str) -> Option<CachedPaywall> {
            self.paywalls.get(identifier).cloned()
        }
    }

    fn network() -> FakeNetwork {
        FakeNetwork {
            configuration: Mutex::new(configuration("1")),
            paywall_cache_key: Mutex::new("1".to_owned()),
            ..FakeNetwork::default()
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::new()
            .max_retries(1)
            .retry_interval(Some(Duration::from_millis(1)))
    }

    /// Hands out the experiment's variants in turn, so a second bucketing is observable.
    #[derive(Clone, Default)]
    struct RotatingChooser {
        calls: Arc<AtomicUsize>,
    }

    impl VariantChooser for RotatingChooser {
        fn choose(&self, experiment: &Experiment) -> Option<VariantOption> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let len = experiment.variants.len();
            (len > 0).then(|| experiment.variants[call % len].clone())
        }
    }

    /// `campaign` split between two treatments and reachable from two triggers.
    fn two_variant_network() -> FakeNetwork {
        let mut configuration = configuration("1");
        let campaign = configuration.experiments.get_mut("campaign").unwrap();
        campaign.variants[0].percentage = 50;
        campaign.variants.push(serde_json::from_value(json!({
            "id": "treatment-b", "type": "TREATMENT", "paywallId": "pw", "percentage": 50
        })).unwrap());
        configuration.triggers.push(
            Trigger {
                event_name: "second_campaign_trigger".to_owned(),
                rules: vec![TriggerRule::unconditional("campaign")],
            }
            .into(),
        );

        FakeNetwork {
            configuration: Mutex::new(configuration),
            ..network()
        }
    }

    #[tokio::test]
    async fn resolve_before_configuration_is_an_error() {
        let client = config().to_client(network(), ConditionEvaluator);

        let outcome = client
            .resolve(&PresentationRequest::implicit(placement("campaign_trigger", "free")))
            .await;

        assert!(matches!(
            outcome,
            PresentationOutcome::Skip(SkipReason::Error(Error::ConfigurationNotFetched))
        ));
    }

    #[tokio::test]
    async fn resolve_presents_treatment_and_logs_decision() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let client = {
            let events = events.clone();
            config()
                .decision_logger(move |event: DecisionEvent| events.lock().unwrap().push(event))
                .to_client(network(), ConditionEvaluator)
        };
        client.refresh_configuration().await.unwrap();

        let outcome = client
            .resolve(&PresentationRequest::explicit(placement("campaign_trigger", "free")))
            .await;

        assert_eq!(outcome.paywall_id(), Some("pw"));
        let experiment = outcome.experiment().unwrap();
        assert_eq!(experiment.experiment_id, "campaign");
        assert_eq!(experiment.variant.id, "treatment");

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].trigger, "explicit");
        assert_eq!(events[0].outcome, "present");
        assert_eq!(events[0].paywall_id.as_deref(), Some("pw"));
    }

    #[tokio::test]
    async fn resolve_skip_reasons() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = config().to_client(network(), ConditionEvaluator);
        client.refresh_configuration().await.unwrap();

        let resolve = |name: &'static str, plan: &'static str| {
            let request = PresentationRequest::implicit(placement(name, plan));
            let client = &client;
            async move { client.resolve(&request).await }
        };

        assert!(matches!(
            resolve("unknown_event", "free").await,
            PresentationOutcome::Skip(SkipReason::EventNotFound)
        ));
        assert!(matches!(
            resolve("campaign_trigger", "pro").await,
            PresentationOutcome::Skip(SkipReason::NoRuleMatch)
        ));
        assert!(matches!(
            resolve("holdout_trigger", "free").await,
            PresentationOutcome::Skip(SkipReason::Holdout(ref context)) if context.experiment_id == "held"
        ));
        assert!(matches!(
            resolve("dangling_trigger", "free").await,
            PresentationOutcome::Skip(SkipReason::Error(Error::ExperimentNotFound(ref id))) if id == "missing"
        ));
    }

    #[tokio::test]
    async fn resolve_by_identifier_skips_rules() {
        let client = config().to_client(network(), ConditionEvaluator);

        let outcome = client
            .resolve(&PresentationRequest::by_identifier("direct"))
            .await;

        assert_eq!(outcome.paywall_id(), Some("direct"));
        assert!(outcome.experiment().is_none());
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_fetch() {
        let client = config().to_client(network(), ConditionEvaluator);

        let (a, b) = tokio::join!(client.refresh_configuration(), client.refresh_configuration());

        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(client.network.configuration_fetches.load(Ordering::SeqCst), 1);
        assert!(client.configuration().is_some());
    }

    #[tokio::test]
    async fn refresh_reports_stale_paywalls() {
        let client = config().to_client(network(), ConditionEvaluator);
        assert!(client.refresh_configuration().await.unwrap().is_empty());

        let mut updated = configuration("2");
        updated.paywalls.retain(|p| p.identifier == "pw");
        *client.network.configuration.lock().unwrap() = updated;

        let mut stale: Vec<_> = client
            .refresh_configuration()
            .await
            .unwrap()
            .into_iter()
            .collect();
        stale.sort();

        assert_eq!(stale, vec!["pw", "retired"]);
    }

    #[tokio::test]
    async fn flush_confirms_pending_assignments() {
        let client = config().to_client(network(), ConditionEvaluator);
        client.refresh_configuration().await.unwrap();
        client
            .resolve(&PresentationRequest::implicit(placement("campaign_trigger", "free")))
            .await;

        assert_eq!(client.flush_confirmations().await.unwrap(), 1);
        assert_eq!(client.flush_confirmations().await.unwrap(), 0);

        let confirmed = client.network.confirmed.lock().unwrap().clone();
        assert_eq!(
            confirmed,
            vec![ConfirmableAssignment {
                experiment_id: "campaign".to_owned(),
                variant_id: "treatment".to_owned(),
            }]
        );
        let snapshot = client.configuration().unwrap();
        assert!(snapshot.ledger().get("campaign").unwrap().confirmed);
    }

    #[tokio::test]
    async fn failed_flush_requeues_batch() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = config().to_client(network(), ConditionEvaluator);
        client.refresh_configuration().await.unwrap();
        client
            .resolve(&PresentationRequest::implicit(placement("campaign_trigger", "free")))
            .await;
        client.network.fail_confirmations.store(true, Ordering::SeqCst);

        let err = client.flush_confirmations().await.unwrap_err();
        assert!(matches!(err, Error::RetryExhausted { attempts: 2, .. }));

        let snapshot = client.configuration().unwrap();
        assert!(!snapshot.ledger().get("campaign").unwrap().confirmed);

        client.network.fail_confirmations.store(false, Ordering::SeqCst);
        assert_eq!(client.flush_confirmations().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn server_assignments_are_applied() {
        let network = FakeNetwork {
            server_assignments: vec![ServerAssignment {
                experiment_id: "campaign".to_owned(),
                variant_id: "treatment".to_owned(),
            }],
            ..network()
        };
        let client = config().to_client(network, ConditionEvaluator);
        assert!(matches!(
            client.fetch_server_assignments().await,
            Err(Error::ConfigurationNotFetched)
        ));

        client.refresh_configuration().await.unwrap();
        assert_eq!(client.fetch_server_assignments().await.unwrap(), 1);

        let snapshot = client.configuration().unwrap();
        assert!(snapshot.ledger().get("campaign").unwrap().confirmed);
        assert_eq!(client.flush_confirmations().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn load_paywall_reconciles_with_cache() {
        let client = config().to_client(network(), ConditionEvaluator);
        let cache = FakeCache {
            paywalls: HashMap::from([("pw".to_owned(), paywall("pw", "1"))]),
        };
        let presenting = PresentationRequest::by_identifier("pw").load_options();

        let unchanged = client.load_paywall("pw", &cache, presenting).await.unwrap();
        assert_eq!(
            unchanged.actions,
            vec![
                CacheAction::AttachPresentationDelegate,
                CacheAction::UpdateExistingEntry
            ]
        );

        *client.network.paywall_cache_key.lock().unwrap() = "2".to_owned();
        let changed = client.load_paywall("pw", &cache, presenting).await.unwrap();
        assert_eq!(changed.paywall.cache_key, "2");
        assert_eq!(
            changed.actions,
            vec![
                CacheAction::ReplaceCachedEntry,
                CacheAction::LoadContent,
                CacheAction::AttachPresentationDelegate
            ]
        );
    }

    #[tokio::test]
    async fn load_paywall_without_cache_fills_slot() {
        let client = config().to_client(network(), ConditionEvaluator);
        let cache = FakeCache {
            paywalls: HashMap::from([("pw".to_owned(), paywall("pw", "1"))]),
        };
        let options = LoadOptions {
            use_cache: false,
            ..LoadOptions::preload()
        };

        let load = client.load_paywall("pw", &cache, options).await.unwrap();

        assert_eq!(
            load.actions,
            vec![CacheAction::ReplaceCachedEntry, CacheAction::LoadContent]
        );
    }

    #[tokio::test]
    async fn concurrent_paywall_loads_share_one_fetch() {
        let client = config().to_client(network(), ConditionEvaluator);
        let cache = FakeCache::default();

        let (a, b) = tokio::join!(
            client.load_paywall("pw", &cache, LoadOptions::preload()),
            client.load_paywall("pw", &cache, LoadOptions::preload()),
        );

        assert_eq!(a.unwrap().paywall, b.unwrap().paywall);
        assert_eq!(client.network.paywall_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn load_paywall_failure_is_retried_then_reported() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = config().to_client(network(), ConditionEvaluator);

        let err = client
            .load_paywall("missing", &FakeCache::default(), LoadOptions::preload())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RetryExhausted { attempts: 2, .. }));
        assert_eq!(client.network.paywall_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pending_confirmations_survive_refresh() {
        let client = config().to_client(network(), ConditionEvaluator);
        client.refresh_configuration().await.unwrap();
        client
            .resolve(&PresentationRequest::implicit(placement("campaign_trigger", "free")))
            .await;

        client.refresh_configuration().await.unwrap();

        assert_eq!(client.flush_confirmations().await.unwrap(), 1);
        assert_eq!(
            client.network.confirmed.lock().unwrap().clone(),
            vec![ConfirmableAssignment {
                experiment_id: "campaign".to_owned(),
                variant_id: "treatment".to_owned(),
            }]
        );
        let snapshot = client.configuration().unwrap();
        assert!(snapshot.ledger().get("campaign").unwrap().confirmed);
    }

    #[tokio::test]
    async fn confirmed_assignment_is_kept_across_refresh() {
        let client = config()
            .variant_chooser(RotatingChooser::default())
            .to_client(two_variant_network(), ConditionEvaluator);
        client.refresh_configuration().await.unwrap();
        let first = client
            .resolve(&PresentationRequest::implicit(placement("campaign_trigger", "free")))
            .await;
        assert_eq!(client.flush_confirmations().await.unwrap(), 1);

        client.refresh_configuration().await.unwrap();
        let second = client
            .resolve(&PresentationRequest::implicit(placement("campaign_trigger", "free")))
            .await;

        assert_eq!(
            first.experiment().unwrap().variant.id,
            second.experiment().unwrap().variant.id
        );
        assert_eq!(client.flush_confirmations().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn triggers_sharing_an_experiment_get_the_same_variant() {
        let chooser = RotatingChooser::default();
        let client = config()
            .variant_chooser(chooser.clone())
            .to_client(two_variant_network(), ConditionEvaluator);
        client.refresh_configuration().await.unwrap();

        let first = client
            .resolve(&PresentationRequest::implicit(placement("campaign_trigger", "free")))
            .await;
        let second = client
            .resolve(&PresentationRequest::implicit(placement("second_campaign_trigger", "pro")))
            .await;

        let first = first.experiment().unwrap();
        let second = second.experiment().unwrap();
        assert_eq!(first.experiment_id, "campaign");
        assert_eq!(second.experiment_id, "campaign");
        assert_eq!(first.variant.id, second.variant.id);
        assert_eq!(chooser.calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.flush_confirmations().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn preload_loads_treatment_paywalls() {
        let client = config().to_client(network(), ConditionEvaluator);
        client.refresh_configuration().await.unwrap();

        let loaded = client.preload_paywalls(&FakeCache::default()).await;

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].paywall.identifier, "pw");
        assert_eq!(
            loaded[0].actions,
            vec![CacheAction::ReplaceCachedEntry, CacheAction::LoadContent]
        );

        // Preloading buckets without exposing; the first decision queues the confirmation.
        assert_eq!(client.flush_confirmations().await.unwrap(), 0);
        let outcome = client
            .resolve(&PresentationRequest::implicit(placement("campaign_trigger", "free")))
            .await;
        assert_eq!(outcome.paywall_id(), Some("pw"));
        assert_eq!(client.flush_confirmations().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn preload_skips_disabled_triggers() {
        let client = config().to_client(network(), ConditionEvaluator);
        let mut updated = configuration("1");
        updated
            .preloading_disabled
            .triggers
            .insert("campaign_trigger".to_owned());
        client.set_configuration(updated);

        assert!(client.preload_paywalls(&FakeCache::default()).await.is_empty());
        assert!(client.configuration().unwrap().ledger().get("campaign").is_none());

        let mut updated = configuration("1");
        updated.preloading_disabled.all = true;
        client.set_configuration(updated);

        assert!(client.preload_paywalls(&FakeCache::default()).await.is_empty());
        assert_eq!(client.network.paywall_fetches.load(Ordering::SeqCst), 0);
    }
}
