//! JSON-RPC collaborators backed by alloy HTTP providers
//!
//! `RpcHeadSource` polls the external chain for new heads and fetches each
//! block with full transactions. `RpcChainState` reads nonces from the
//! pending state, so transactions already in the node's mempool are counted. `RpcSubmitter` pushes raw signed
//! transactions into a node's mempool.

use std::time::Duration;

use alloy::consensus::{Signed, Transaction as _, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::eips::BlockId;
use alloy::network::TransactionResponse;
use alloy::primitives::{Address, TxKind};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockNumberOrTag, BlockTransactionsKind};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::RelayError;
use crate::ports::{
    ChainState, HeadPublisher, HeadSource, HeadSubscription, StateSnapshot, TxSubmitter,
};
use crate::types::{Block, ChainHeadEvent, Transaction};

pub type HttpProvider = RootProvider<Http<Client>>;

/// Consecutive polling failures after which the subscription is failed
const MAX_POLL_FAILURES: u32 = 5;

/// Create an alloy HTTP provider for `url`
pub fn http_provider(url: &str) -> Result<HttpProvider> {
    let parsed = url
        .parse()
        .wrap_err_with(|| format!("Invalid RPC URL: {}", url))?;
    Ok(ProviderBuilder::new().on_http(parsed))
}

fn convert_tx(tx: &alloy::rpc::types::Transaction) -> Transaction {
    let to = match tx.kind() {
        TxKind::Call(address) => Some(address),
        TxKind::Create => None,
    };
    Transaction {
        hash: tx.tx_hash(),
        to,
        value: tx.value(),
        input: tx.input().clone(),
    }
}

fn convert_block(block: &alloy::rpc::types::Block) -> Block {
    Block {
        number: block.header.number,
        hash: block.header.hash,
        transactions: block.transactions.txns().map(convert_tx).collect(),
    }
}

/// Head source polling `eth_blockNumber` on the external chain
pub struct RpcHeadSource {
    provider: HttpProvider,
    poll_interval: Duration,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RpcHeadSource {
    pub fn new(provider: HttpProvider, poll_interval: Duration) -> Self {
        Self {
            provider,
            poll_interval,
            task: Mutex::new(None),
        }
    }

    /// `None` when the node does not serve the block yet
    async fn fetch_block(provider: &HttpProvider, number: u64) -> Result<Option<Block>> {
        let block = provider
            .get_block_by_number(BlockNumberOrTag::Number(number), BlockTransactionsKind::Full)
            .await
            .wrap_err_with(|| format!("Failed to get block {}", number))?;
        Ok(block.map(|block| convert_block(&block)))
    }

    async fn poll(provider: HttpProvider, poll_interval: Duration, mut publisher: HeadPublisher) {
        let mut ticker = tokio::time::interval(poll_interval);
        // Highest height already published
        let mut last_head: Option<u64> = None;
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = publisher.unsubscribed() => {
                    debug!("Head subscriber gone, polling stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let result = match provider.get_block_number().await {
                Ok(head) => {
                    // Catch up on every height since the last published one
                    let from = last_head.map_or(head, |last| last + 1);
                    Self::publish_range(&provider, &publisher, from, head, &mut last_head).await
                }
                Err(e) => Err(eyre::eyre!("block number polling failed: {}", e)),
            };

            match result {
                Ok(true) => failures = 0,
                Ok(false) => {
                    debug!("Head subscriber gone, polling stopped");
                    return;
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, failures, "Head polling failed");
                    if failures >= MAX_POLL_FAILURES {
                        error!(failures, "External RPC unreachable, failing head subscription");
                        publisher.fail(e.to_string());
                        return;
                    }
                }
            }
        }
    }

    /// Publish heights `from..=to` in order, advancing `last_head` only past
    /// blocks that were fetched and delivered. Returns false once the
    /// subscriber is gone.
    async fn publish_range(
        provider: &HttpProvider,
        publisher: &HeadPublisher,
        from: u64,
        to: u64,
        last_head: &mut Option<u64>,
    ) -> Result<bool> {
        for number in from..=to {
            let Some(block) = Self::fetch_block(provider, number).await? else {
                debug!(block_number = number, "Block not served yet, retrying next poll");
                break;
            };
            if !publisher.publish(ChainHeadEvent::new(block)).await {
                return Ok(false);
            }
            *last_head = Some(number);
        }
        Ok(true)
    }
}

#[async_trait]
impl HeadSource for RpcHeadSource {
    async fn subscribe(&self) -> Result<HeadSubscription, RelayError> {
        let (subscription, publisher) = HeadSubscription::channel();
        let task = tokio::spawn(Self::poll(
            self.provider.clone(),
            self.poll_interval,
            publisher,
        ));
        if let Some(previous) = self.task.lock().await.replace(task) {
            previous.abort();
        }
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "Polling external chain heads");
        Ok(subscription)
    }
}

/// Chain state read through JSON-RPC
pub struct RpcChainState {
    chain: String,
    provider: HttpProvider,
}

impl RpcChainState {
    pub fn new(chain: &str, provider: HttpProvider) -> Self {
        Self {
            chain: chain.to_string(),
            provider,
        }
    }
}

/// Nonce reads against the node's pending state
///
/// A counterpart submitted moments earlier sits in the mempool, not in a
/// mined block, so a block-pinned read would hand out its nonce again.
pub struct RpcSnapshot {
    chain: String,
    provider: HttpProvider,
    /// Chain head when the snapshot was taken
    head: u64,
}

#[async_trait]
impl StateSnapshot for RpcSnapshot {
    async fn nonce(&self, address: Address) -> Result<u64, RelayError> {
        let nonce = self
            .provider
            .get_transaction_count(address)
            .block_id(BlockId::pending())
            .await
            .map_err(|e| RelayError::state_unavailable(&self.chain, e))?;
        debug!(chain = %self.chain, head = self.head, address = %address, nonce, "Read pending nonce");
        Ok(nonce)
    }
}

#[async_trait]
impl ChainState for RpcChainState {
    async fn state(&self) -> Result<Box<dyn StateSnapshot>, RelayError> {
        let head = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| RelayError::state_unavailable(&self.chain, e))?;
        Ok(Box::new(RpcSnapshot {
            chain: self.chain.clone(),
            provider: self.provider.clone(),
            head,
        }))
    }
}

/// Raw transaction submission through `eth_sendRawTransaction`
pub struct RpcSubmitter {
    chain: String,
    provider: HttpProvider,
}

impl RpcSubmitter {
    pub fn new(chain: &str, provider: HttpProvider) -> Self {
        Self {
            chain: chain.to_string(),
            provider,
        }
    }
}

#[async_trait]
impl TxSubmitter for RpcSubmitter {
    async fn submit(&self, tx: &Signed<TxLegacy>) -> Result<(), RelayError> {
        let raw = TxEnvelope::Legacy(tx.clone()).encoded_2718();
        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| RelayError::SubmissionRejected {
                chain: self.chain.clone(),
                tx_hash: *tx.hash(),
                reason: e.to_string(),
            })?;
        debug!(chain = %self.chain, tx_hash = %pending.tx_hash(), "Raw transaction accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex as StdMutex};

    use alloy::primitives::U256;
    use axum::{extract::State, routing::post, Json, Router};
    use serde_json::{json, Value};

    use crate::composer::{GasParams, TxComposer};

    // Anvil default account #0
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    /// Minimal JSON-RPC node: a head height, a mempool counter and fault switches
    #[derive(Default)]
    struct StubNode {
        head: u64,
        /// Mined nonce of every account; pending adds the mempool size
        mined_nonce: u64,
        mempool: u64,
        fail_block_number: bool,
        /// Height answered with `null` from eth_getBlockByNumber
        unserved_block: Option<u64>,
        reject_raw: bool,
        nonce_tags: Vec<Value>,
    }

    type SharedNode = Arc<StdMutex<StubNode>>;

    fn quantity(value: u64) -> Value {
        json!(format!("0x{:x}", value))
    }

    fn parse_quantity(value: &Value) -> u64 {
        let hex = value.as_str().unwrap_or_default().trim_start_matches("0x");
        u64::from_str_radix(hex, 16).unwrap()
    }

    fn block_json(number: u64) -> Value {
        let zero = format!("0x{}", "00".repeat(32));
        json!({
            "hash": format!("0x{:064x}", number + 0x1000),
            "parentHash": format!("0x{:064x}", number + 0x0fff),
            "sha3Uncles": zero,
            "miner": format!("0x{}", "00".repeat(20)),
            "stateRoot": zero,
            "transactionsRoot": zero,
            "receiptsRoot": zero,
            "logsBloom": format!("0x{}", "00".repeat(256)),
            "difficulty": "0x0",
            "number": quantity(number),
            "gasLimit": "0x1c9c380",
            "gasUsed": "0x0",
            "timestamp": quantity(1_700_000_000 + number),
            "extraData": "0x",
            "mixHash": zero,
            "nonce": "0x0000000000000000",
            "uncles": [],
            "transactions": [],
        })
    }

    async fn handle_rpc(State(node): State<SharedNode>, Json(request): Json<Value>) -> Json<Value> {
        let id = request["id"].clone();
        let params = request["params"].clone();
        let mut node = node.lock().unwrap();

        let outcome: Result<Value, String> = match request["method"].as_str().unwrap_or_default() {
            "eth_blockNumber" if node.fail_block_number => Err("node unavailable".to_string()),
            "eth_blockNumber" => Ok(quantity(node.head)),
            "eth_getBlockByNumber" => {
                let number = parse_quantity(&params[0]);
                if node.unserved_block == Some(number) || number > node.head {
                    Ok(Value::Null)
                } else {
                    Ok(block_json(number))
                }
            }
            "eth_getTransactionCount" => {
                node.nonce_tags.push(params[1].clone());
                let nonce = if params[1] == "pending" {
                    node.mined_nonce + node.mempool
                } else {
                    node.mined_nonce
                };
                Ok(quantity(nonce))
            }
            "eth_sendRawTransaction" if node.reject_raw => Err("nonce too low".to_string()),
            "eth_sendRawTransaction" => {
                node.mempool += 1;
                Ok(json!(format!("0x{:064x}", node.mempool)))
            }
            other => Err(format!("method {} not found", other)),
        };

        Json(match outcome {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err(message) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32000, "message": message},
            }),
        })
    }

    async fn start_stub(node: StubNode) -> (HttpProvider, SharedNode) {
        let node = Arc::new(StdMutex::new(node));
        let app = Router::new()
            .route("/", post(handle_rpc))
            .with_state(node.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let provider = http_provider(&format!("http://{}", addr)).unwrap();
        (provider, node)
    }

    async fn next_number(subscription: &mut HeadSubscription) -> u64 {
        let head = tokio::time::timeout(Duration::from_secs(5), subscription.next())
            .await
            .expect("head notification timed out")
            .unwrap();
        head.block.expect("head carries a block").number
    }

    #[test]
    fn test_http_provider_rejects_bad_url() {
        assert!(http_provider("not a url").is_err());
    }

    #[test]
    fn test_http_provider_accepts_url() {
        assert!(http_provider("http://localhost:8545").is_ok());
    }

    #[tokio::test]
    async fn test_head_source_publishes_every_height() {
        let (provider, node) = start_stub(StubNode {
            head: 16,
            ..Default::default()
        })
        .await;
        let source = RpcHeadSource::new(provider, Duration::from_millis(10));
        let mut subscription = source.subscribe().await.unwrap();

        assert_eq!(next_number(&mut subscription).await, 16);

        node.lock().unwrap().head = 18;
        assert_eq!(next_number(&mut subscription).await, 17);
        assert_eq!(next_number(&mut subscription).await, 18);
    }

    #[tokio::test]
    async fn test_head_source_retries_unserved_block() {
        let (provider, node) = start_stub(StubNode {
            head: 16,
            ..Default::default()
        })
        .await;
        let source = RpcHeadSource::new(provider, Duration::from_millis(10));
        let mut subscription = source.subscribe().await.unwrap();
        assert_eq!(next_number(&mut subscription).await, 16);

        {
            let mut node = node.lock().unwrap();
            node.head = 18;
            node.unserved_block = Some(17);
        }
        // Height 18 must not overtake the missing 17
        let pending = tokio::time::timeout(Duration::from_millis(100), subscription.next()).await;
        assert!(pending.is_err());

        node.lock().unwrap().unserved_block = None;
        assert_eq!(next_number(&mut subscription).await, 17);
        assert_eq!(next_number(&mut subscription).await, 18);
    }

    #[tokio::test]
    async fn test_head_source_fails_after_repeated_errors() {
        let (provider, _node) = start_stub(StubNode {
            fail_block_number: true,
            ..Default::default()
        })
        .await;
        let source = RpcHeadSource::new(provider, Duration::from_millis(10));
        let mut subscription = source.subscribe().await.unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(5), subscription.next())
            .await
            .expect("subscription failure timed out")
            .unwrap_err();
        assert!(reason.contains("block number polling failed"), "{}", reason);
    }

    #[tokio::test]
    async fn test_snapshot_reads_pending_nonce() {
        let (provider, node) = start_stub(StubNode {
            head: 16,
            mined_nonce: 0,
            mempool: 1,
            ..Default::default()
        })
        .await;
        let state = RpcChainState::new("KARDIA", provider);

        let snapshot = state.state().await.unwrap();
        assert_eq!(snapshot.nonce(Address::repeat_byte(0xd5)).await.unwrap(), 1);
        assert_eq!(node.lock().unwrap().nonce_tags, vec![json!("pending")]);
    }

    #[tokio::test]
    async fn test_state_unavailable_when_node_fails() {
        let (provider, _node) = start_stub(StubNode {
            fail_block_number: true,
            ..Default::default()
        })
        .await;
        let state = RpcChainState::new("KARDIA", provider);

        let err = state.state().await.err().unwrap();
        assert!(matches!(err, RelayError::StateUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_consecutive_compositions_use_fresh_nonces() {
        let (provider, node) = start_stub(StubNode {
            head: 16,
            mined_nonce: 3,
            ..Default::default()
        })
        .await;
        let state = RpcChainState::new("KARDIA", provider.clone());
        let submitter = RpcSubmitter::new("KARDIA", provider);
        let composer = TxComposer::new(
            TEST_KEY.parse().unwrap(),
            "KARDIA",
            24,
            Address::repeat_byte(0x4b),
            GasParams::default(),
        );

        let first = composer
            .compose_match(state.state().await.unwrap().as_ref(), U256::from(500), 1)
            .await
            .unwrap();
        submitter.submit(&first).await.unwrap();

        // The first transaction is only in the mempool, no block was mined
        let second = composer
            .compose_match(state.state().await.unwrap().as_ref(), U256::from(700), 1)
            .await
            .unwrap();
        submitter.submit(&second).await.unwrap();

        assert_eq!(first.tx().nonce, 3);
        assert_eq!(second.tx().nonce, 4);
        assert_eq!(node.lock().unwrap().mempool, 2);
    }

    #[tokio::test]
    async fn test_rejected_raw_transaction() {
        let (provider, _node) = start_stub(StubNode {
            head: 16,
            reject_raw: true,
            ..Default::default()
        })
        .await;
        let state = RpcChainState::new("ETH", provider.clone());
        let submitter = RpcSubmitter::new("ETH", provider);
        let composer = TxComposer::new(
            TEST_KEY.parse().unwrap(),
            "ETH",
            1,
            Address::repeat_byte(0x4b),
            GasParams::default(),
        );
        let tx = composer
            .compose_release(
                state.state().await.unwrap().as_ref(),
                U256::from(42),
                Address::repeat_byte(0x1a),
            )
            .await
            .unwrap();

        match submitter.submit(&tx).await.unwrap_err() {
            RelayError::SubmissionRejected {
                chain,
                tx_hash,
                reason,
            } => {
                assert_eq!(chain, "ETH");
                assert_eq!(tx_hash, *tx.hash());
                assert!(reason.contains("nonce too low"), "{}", reason);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
