//! End-to-end tests of the relay pipeline over in-memory chains

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use tokio::sync::oneshot;
use tokio_test::{assert_err, assert_ok};

use dual_relay::composer::{GasParams, TxComposer};
use dual_relay::contracts::{encode_deposit, EthExchange, KardiaExchange};
use dual_relay::dev::{deposit_block_factory, TriggerSchedule};
use dual_relay::memory::{MemoryChain, MemoryHeadSource};
use dual_relay::metrics::Metrics;
use dual_relay::relay::DevTrigger;
use dual_relay::types::{Block, ChainHeadEvent, MonitoredContract, Transaction, EXTERNAL_CHAIN, LOCAL_CHAIN};
use dual_relay::{ChainEndpoint, DualRelay, RelayConfig, RelayError, RelayState};

const LOCAL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const EXTERNAL_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

fn monitored() -> Address {
    "0xCAFE000000000000000000000000000000000001".parse().unwrap()
}

fn local_exchange() -> Address {
    Address::repeat_byte(0x4b)
}

fn dual_state() -> Address {
    Address::repeat_byte(0xd5)
}

fn release_receiver() -> Address {
    Address::repeat_byte(0x1a)
}

struct Harness {
    relay: Arc<DualRelay>,
    local: Arc<MemoryChain>,
    external: Arc<MemoryChain>,
}

fn harness(light_node: bool, dev_trigger: Option<DevTrigger>) -> Harness {
    let local = Arc::new(MemoryChain::new(LOCAL_CHAIN));
    let external = Arc::new(MemoryChain::new(EXTERNAL_CHAIN));

    let config = RelayConfig {
        monitored: MonitoredContract::new(monitored()),
        dual_state_address: dual_state(),
        match_ratio: 1,
        release_receiver: release_receiver(),
        light_node,
        dev_trigger,
    };
    let local_endpoint = ChainEndpoint {
        state: local.clone(),
        submitter: local.clone(),
        composer: Arc::new(TxComposer::new(
            LOCAL_KEY.parse().unwrap(),
            LOCAL_CHAIN,
            24,
            local_exchange(),
            GasParams::default(),
        )),
    };
    let external_endpoint = ChainEndpoint {
        state: external.clone(),
        submitter: external.clone(),
        composer: Arc::new(TxComposer::new(
            EXTERNAL_KEY.parse().unwrap(),
            EXTERNAL_CHAIN,
            1,
            monitored(),
            GasParams::default(),
        )),
    };

    let relay = Arc::new(DualRelay::new(
        config,
        local_endpoint,
        external_endpoint,
        Arc::new(Metrics::new()),
    ));
    Harness {
        relay,
        local,
        external,
    }
}

fn deposit(id: u8, value: u64) -> Transaction {
    Transaction {
        hash: B256::repeat_byte(id),
        to: Some(monitored()),
        value: U256::from(value),
        input: encode_deposit("kardia-receiver"),
    }
}

fn block(number: u64, transactions: Vec<Transaction>) -> Option<Arc<Block>> {
    Some(Arc::new(Block {
        number,
        hash: B256::with_last_byte(number as u8),
        transactions,
    }))
}

/// Publish until the relay's listener has subscribed
async fn publish_when_subscribed(source: &MemoryHeadSource, event: ChainHeadEvent) {
    while !source.publish(event.clone()).await {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test]
async fn test_full_relay_happy_path() {
    let h = harness(false, None);

    let added = h.relay.handle_block(block(1, vec![deposit(0x01, 500)])).await;

    assert_eq!(added.len(), 1);
    let events = h.relay.pool().events().await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.summary().method, "deposit");
    assert_eq!(event.summary().value, U256::from(500));
    assert!(event.from_external_chain());
    assert_ne!(event.pending_tx().tx_hash, B256::ZERO);

    // The pending tx is the one submitted to the local mempool
    let mempool = h.local.mempool().await;
    assert_eq!(mempool.len(), 1);
    assert_eq!(*mempool[0].hash(), event.pending_tx().tx_hash);
    let call = KardiaExchange::matchAmountCall::abi_decode(&mempool[0].tx().input, true).unwrap();
    assert_eq!(call.matchedValue, U256::from(500));
}

#[tokio::test]
async fn test_nonce_comes_from_dual_state_account() {
    let h = harness(false, None);
    h.local.set_nonce(dual_state(), 41).await;

    let added = h.relay.handle_block(block(1, vec![deposit(0x01, 500)])).await;
    assert_eq!(added[0].nonce(), 41);
}

#[tokio::test]
async fn test_same_block_twice_relays_once() {
    let h = harness(false, None);
    let b = block(1, vec![deposit(0x01, 500)]);

    assert_eq!(h.relay.handle_block(b.clone()).await.len(), 1);
    assert!(h.relay.handle_block(b).await.is_empty());

    assert_eq!(h.relay.pool().len().await, 1);
    assert_eq!(h.local.mempool().await.len(), 1);
}

#[tokio::test]
async fn test_only_monitored_transactions_in_block_order() {
    let h = harness(false, None);
    let other = Transaction {
        to: Some(Address::repeat_byte(0x0b)),
        ..deposit(0x0b, 700)
    };

    let added = h
        .relay
        .handle_block(block(1, vec![deposit(0x0a, 100), other, deposit(0x0c, 300)]))
        .await;

    let sources: Vec<B256> = added.iter().map(|e| e.source_tx_hash()).collect();
    assert_eq!(sources, vec![B256::repeat_byte(0x0a), B256::repeat_byte(0x0c)]);
}

#[tokio::test]
async fn test_decode_failure_skips_only_that_transaction() {
    let h = harness(false, None);
    let garbage = Transaction {
        input: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef, 0x00]),
        ..deposit(0x02, 500)
    };

    let added = h
        .relay
        .handle_block(block(1, vec![garbage, deposit(0x03, 500)]))
        .await;

    assert_eq!(added.len(), 1);
    assert_eq!(added[0].source_tx_hash(), B256::repeat_byte(0x03));
    assert_eq!(
        h.relay.metrics().errors.with_label_values(&["decode"]).get(),
        1
    );
}

#[tokio::test]
async fn test_state_unavailable_aborts_block() {
    let h = harness(false, None);
    h.local.set_unavailable(Some("node syncing")).await;

    let b = block(1, vec![deposit(0x01, 500), deposit(0x02, 500)]);
    assert!(h.relay.handle_block(b.clone()).await.is_empty());
    assert!(h.relay.pool().is_empty().await);

    // Not retried by the relay, but the same block succeeds once state returns
    h.local.set_unavailable(None).await;
    assert_eq!(h.relay.handle_block(b).await.len(), 2);
}

#[tokio::test]
async fn test_rejected_submission_keeps_event() {
    let h = harness(false, None);
    h.local.set_rejecting(Some("mempool full")).await;

    let added = h.relay.handle_block(block(1, vec![deposit(0x01, 500)])).await;

    assert_eq!(added.len(), 1);
    assert!(h.relay.pool().contains(&added[0].hash()).await);
    assert!(h.local.mempool().await.is_empty());
    assert_eq!(
        h.relay
            .metrics()
            .submissions
            .with_label_values(&[LOCAL_CHAIN, "rejected"])
            .get(),
        1
    );
}

#[tokio::test]
async fn test_nil_block_is_ignored() {
    let h = harness(false, None);
    assert!(h.relay.handle_block(None).await.is_empty());
}

#[tokio::test]
async fn test_run_relays_published_heads_until_shutdown() {
    let h = harness(false, None);
    let source = MemoryHeadSource::new();
    let mut added = h.relay.pool().subscribe();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let relay = Arc::clone(&h.relay);
    let run_source = Arc::clone(&source);
    let task = tokio::spawn(async move {
        relay
            .run(run_source.as_ref(), async {
                let _ = stop_rx.await;
            })
            .await
    });

    publish_when_subscribed(
        &source,
        ChainHeadEvent::new(Block {
            number: 7,
            hash: B256::with_last_byte(7),
            transactions: vec![deposit(0x07, 500)],
        }),
    )
    .await;

    let event = tokio::time::timeout(Duration::from_secs(5), added.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.source_tx_hash(), B256::repeat_byte(0x07));
    assert_eq!(h.relay.state(), RelayState::Started);

    stop_tx.send(()).unwrap();
    assert_ok!(task.await.unwrap());
    assert_eq!(h.relay.state(), RelayState::Stopped);
}

#[tokio::test]
async fn test_upstream_loss_terminates_relay() {
    let h = harness(false, None);
    let source = MemoryHeadSource::new();

    let relay = Arc::clone(&h.relay);
    let run_source = Arc::clone(&source);
    let task = tokio::spawn(async move {
        relay
            .run(run_source.as_ref(), std::future::pending::<()>())
            .await
    });

    publish_when_subscribed(&source, ChainHeadEvent::empty()).await;
    source.fail("connection reset").await;

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    let err = assert_err!(result);
    assert!(matches!(err, RelayError::UpstreamSubscriptionLost(_)));
    assert_eq!(h.relay.state(), RelayState::Terminated);

    // No restart transition
    let again = h
        .relay
        .run(source.as_ref(), std::future::ready(()))
        .await;
    assert!(matches!(again, Err(RelayError::AlreadyStarted)));
}

#[tokio::test]
async fn test_light_node_observes_without_handling() {
    let h = harness(true, None);
    let source = MemoryHeadSource::new();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let relay = Arc::clone(&h.relay);
    let run_source = Arc::clone(&source);
    let task = tokio::spawn(async move {
        relay
            .run(run_source.as_ref(), async {
                let _ = stop_rx.await;
            })
            .await
    });

    publish_when_subscribed(
        &source,
        ChainHeadEvent::new(Block {
            number: 3,
            hash: B256::with_last_byte(3),
            transactions: vec![deposit(0x03, 500)],
        }),
    )
    .await;

    let metrics = Arc::clone(h.relay.metrics());
    tokio::time::timeout(Duration::from_secs(5), async {
        while metrics.heads_received.get() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    stop_tx.send(()).unwrap();
    assert_ok!(task.await.unwrap());
    assert!(h.relay.pool().is_empty().await);
    assert_eq!(metrics.blocks_handled.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dev_trigger_drives_pipeline() {
    let trigger = DevTrigger {
        schedule: TriggerSchedule::from_millis(&[10, 20], true),
        factory: deposit_block_factory(U256::from(500), "kardia-receiver".to_string()),
    };
    let h = harness(false, Some(trigger));
    let source = MemoryHeadSource::new();

    // Blocks are generated at 10, 30, 40, 60, 70, 90 and 100 ms. A block is
    // emitted after its interval elapses, so running past 40 ms is what
    // guarantees three of them.
    assert_ok!(
        h.relay
            .run(source.as_ref(), tokio::time::sleep(Duration::from_millis(100)))
            .await
    );
    // Let in-flight block handlers finish
    tokio::time::sleep(Duration::from_millis(10)).await;

    let events = h.relay.pool().events().await;
    assert!(events.len() >= 3, "expected at least 3 events, got {}", events.len());
    assert!(events
        .iter()
        .all(|e| e.summary().method == "deposit" && e.summary().value == U256::from(500)));
}

#[tokio::test]
async fn test_submit_release_on_external_chain() {
    let h = harness(false, None);
    let added = h.relay.handle_block(block(1, vec![deposit(0x01, 500)])).await;

    let tx_hash = h.relay.submit_release(&added[0]).await.unwrap();

    let mempool = h.external.mempool().await;
    assert_eq!(mempool.len(), 1);
    assert_eq!(*mempool[0].hash(), tx_hash);
    assert_eq!(mempool[0].tx().nonce, 0);
    let call = EthExchange::releaseCall::abi_decode(&mempool[0].tx().input, true).unwrap();
    assert_eq!(call.receiver, release_receiver());
    assert_eq!(call.amount, U256::from(500));
}

#[tokio::test]
async fn test_submit_release_propagates_rejection() {
    let h = harness(false, None);
    let added = h.relay.handle_block(block(1, vec![deposit(0x01, 500)])).await;
    h.external.set_rejecting(Some("insufficient funds")).await;

    let err = h.relay.submit_release(&added[0]).await.unwrap_err();
    assert!(matches!(err, RelayError::SubmissionRejected { .. }));
}
