//! Orchestrator for the relay watch flow:
//! 1) register and look up watch requests,
//! 2) scan live transactions (mempool and confirmed blocks) against the
//!    pending set and publish Match Events,
//! 3) replay historical blocks on demand, reproducing the event stream
//!    deterministically.
use crate::{
    chain::ChainSource,
    emitter::{Emitter, Subscription},
    error::Error,
    matcher,
    request::{MatchEvent, Request, RequestId, RequestParams},
    store::{MarkOutcome, RequestStore},
};
use anyhow::Context;
use bitcoin::{Block, Transaction, Txid};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Core engine. `S` = request store, `C` = chain data source.
///
/// Live scanning and rescanning share one evaluation stream: both take
/// `eval_lock` for their whole run, so the two never interleave evaluation of
/// the same request and event order stays reproducible.
pub struct Vigia<S, C> {
    store: S,
    chain: C,
    emitter: Emitter,
    eval_lock: Mutex<()>,
}

impl<S, C> Vigia<S, C>
where
    S: RequestStore + 'static,
    C: ChainSource + 'static,
{
    /// Create a new engine over a request store and a chain source.
    pub fn new(store: S, chain: C) -> Self {
        Self {
            store,
            chain,
            emitter: Emitter::new(),
            eval_lock: Mutex::new(()),
        }
    }

    /// Bind a subscriber to the Match Event stream.
    pub fn subscribe(&self) -> Subscription {
        self.emitter.subscribe()
    }

    /// Validate and register a new watch request.
    ///
    /// # Errors
    /// `InvalidRequest` on a malformed body, `DuplicateId` if the id is taken
    /// (the existing record is unchanged).
    pub async fn register_request(&self, params: RequestParams) -> Result<RequestId, Error> {
        let request = Request::from_params(params)?;
        let id = request.id;
        self.store.put(request).await?;
        info!(request_id = %id, "registered watch request");
        Ok(id)
    }

    /// Fetch a registered request, or `NotFound`.
    pub async fn get_request(&self, id: &RequestId) -> Result<Request, Error> {
        self.store.get(id).await
    }

    /// Evaluate one mempool transaction against the pending set.
    ///
    /// Matches transition requests to `Satisfied` with no height and publish
    /// an event; the eventual confirming block re-delivers the transaction
    /// and is deduplicated through the store's compare-and-set.
    pub async fn scan_mempool_tx(&self, tx: &Transaction) -> Result<(), Error> {
        let _stream = self.eval_lock.lock().await;
        let pending = self.store.list_pending().await?;
        self.scan_tx(tx, None, &pending, false).await
    }

    /// Evaluate every transaction of a confirmed block, in canonical order.
    ///
    /// Process-and-continue: a transaction that fails (store error) is
    /// recorded and scanning moves on to its siblings; the collected failures
    /// come back as [`Error::BlockScan`] after the whole block was walked.
    pub async fn scan_block(&self, height: u32, block: &Block) -> Result<(), Error> {
        let _stream = self.eval_lock.lock().await;
        debug!(height, txs = block.txdata.len(), "scanning block");

        let mut failures: Vec<(Txid, String)> = Vec::new();
        for tx in &block.txdata {
            // Fresh pending snapshot per transaction, so a request satisfied
            // earlier in the block is not re-evaluated.
            let pending = match self.store.list_pending().await {
                Ok(p) => p,
                Err(e) => {
                    failures.push((tx.compute_txid(), e.to_string()));
                    continue;
                }
            };
            if let Err(e) = self.scan_tx(tx, Some(height), &pending, false).await {
                failures.push((tx.compute_txid(), e.to_string()));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            warn!(height, count = failures.len(), "block scan had failures");
            Err(Error::BlockScan { height, failures })
        }
    }

    /// Replay blocks from `height` to the tip captured at call time,
    /// re-emitting Match Events for every request that was `Pending` or was
    /// satisfied at `height` or later. Requests satisfied strictly below
    /// `height` stay silent. Blocks appended after the captured tip are left
    /// to the live scanner.
    ///
    /// Replaying twice over an unchanged chain yields identical event
    /// sequences; store transitions are idempotent re-confirmations.
    /// Cancelling (dropping the future) keeps already-published events and
    /// already-applied transitions.
    ///
    /// # Errors
    /// `InvalidHeight` if `height` is above the tip (checked before any event
    /// is emitted). A failure while replaying a block halts the rescan at
    /// that block; earlier blocks' events stand.
    pub async fn rescan(&self, height: u32) -> Result<(), Error> {
        let _stream = self.eval_lock.lock().await;

        let tip = self.chain.tip_height().await?;
        if height > tip {
            return Err(Error::InvalidHeight { height, tip });
        }

        let eligible = self.store.list_rescan(height).await?;
        info!(height, tip, eligible = eligible.len(), "rescan start");

        for h in height..=tip {
            let block = self
                .chain
                .block_at_height(h)
                .await
                .with_context(|| format!("rescan: fetch block @{h}"))?;
            for tx in &block.txdata {
                self.scan_tx(tx, Some(h), &eligible, true)
                    .await
                    .with_context(|| format!("rescan: replay block @{h}"))?;
            }
        }

        info!(height, tip, "rescan complete");
        Ok(())
    }

    /// Evaluate one transaction against a request snapshot.
    ///
    /// A fresh `Pending -> Satisfied` transition always publishes. A match on
    /// an already-satisfied request publishes only during a replay, and only
    /// for the transaction recorded in the snapshot's `satisfied_by` — the
    /// one the live run emitted for. Any other match stays silent, so a
    /// request yields at most one event per scan or replay and the replayed
    /// stream is identical to the live one.
    async fn scan_tx(
        &self,
        tx: &Transaction,
        height: Option<u32>,
        requests: &[Request],
        replay: bool,
    ) -> Result<(), Error> {
        let txid = tx.compute_txid();
        for request in requests {
            let Some(via) = matcher::evaluate(tx, request) else {
                continue;
            };
            let outcome = self.store.mark_satisfied(&request.id, txid, height).await?;
            let emit = match outcome {
                MarkOutcome::Satisfied => true,
                MarkOutcome::AlreadySatisfied => {
                    replay
                        && request
                            .satisfied_by
                            .as_ref()
                            .is_some_and(|s| s.txid == txid)
                }
            };
            if emit {
                self.emitter.publish(MatchEvent {
                    request_id: request.id,
                    address: request.address.clone(),
                    txid,
                    height,
                    matched_via: via,
                });
            } else {
                debug!(request_id = %request.id, %txid, "re-delivery deduplicated");
            }
        }
        Ok(())
    }
}
