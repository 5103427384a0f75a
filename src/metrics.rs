//! Prometheus metrics for the dual relay
//!
//! Exposed on the `/metrics` endpoint of the API server when enabled.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

pub struct Metrics {
    pub heads_received: IntCounter,
    /// Heads dropped because the block slot was occupied
    pub heads_dropped: IntCounter,
    pub latest_head: IntGauge,
    pub blocks_handled: IntCounter,
    pub matched_txs: IntCounter,
    pub events_added: IntCounter,
    pub pool_size: IntGauge,
    /// Errors by kind (decode, state_unavailable, duplicate_event, ...)
    pub errors: IntCounterVec,
    /// Counterpart submissions by chain and outcome
    pub submissions: IntCounterVec,
    pub registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let heads_received = IntCounter::new(
            "dual_relay_heads_received_total",
            "Total number of upstream head notifications received",
        )
        .expect("constant metric name is valid");

        let heads_dropped = IntCounter::new(
            "dual_relay_heads_dropped_total",
            "Head notifications dropped because the block slot was full",
        )
        .expect("constant metric name is valid");

        let latest_head = IntGauge::new(
            "dual_relay_latest_head",
            "Number of the latest external head observed",
        )
        .expect("constant metric name is valid");

        let blocks_handled = IntCounter::new(
            "dual_relay_blocks_handled_total",
            "Total number of blocks scanned for monitored transactions",
        )
        .expect("constant metric name is valid");

        let matched_txs = IntCounter::new(
            "dual_relay_matched_transactions_total",
            "Transactions addressed to the monitored contract",
        )
        .expect("constant metric name is valid");

        let events_added = IntCounter::new(
            "dual_relay_events_added_total",
            "Dual events added to the event pool",
        )
        .expect("constant metric name is valid");

        let pool_size = IntGauge::new("dual_relay_event_pool_size", "Entries in the event pool")
            .expect("constant metric name is valid");

        let errors = IntCounterVec::new(
            Opts::new("dual_relay_errors_total", "Relay errors by kind"),
            &["kind"],
        )
        .expect("constant metric name is valid");

        let submissions = IntCounterVec::new(
            Opts::new(
                "dual_relay_submissions_total",
                "Counterpart transaction submissions by chain and status",
            ),
            &["chain", "status"],
        )
        .expect("constant metric name is valid");

        // Names are unique constants and registration runs once per Metrics
        registry
            .register(Box::new(heads_received.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(heads_dropped.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(latest_head.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(blocks_handled.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(matched_txs.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(events_added.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(pool_size.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(errors.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(submissions.clone()))
            .expect("metric registration must not be called twice");

        Self {
            heads_received,
            heads_dropped,
            latest_head,
            blocks_handled,
            matched_txs,
            events_added,
            pool_size,
            errors,
            submissions,
            registry,
        }
    }

    pub fn record_error(&self, kind: &str) {
        self.errors.with_label_values(&[kind]).inc();
    }

    pub fn record_submission(&self, chain: &str, accepted: bool) {
        let status = if accepted { "accepted" } else { "rejected" };
        self.submissions.with_label_values(&[chain, status]).inc();
    }
}
