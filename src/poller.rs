//! Receipt polling: turns a submitted hash into a bounded wait for inclusion.
//!
//! The protocol has no inclusion notification, so the only way to observe
//! one is to query `eth_getUserOperationReceipt` until it stops returning
//! `null`. [`ReceiptPoller`] makes that loop explicit. Every call to
//! [`ReceiptPoller::poll_once`] is one transition out of
//! [`PollState::Waiting`], and the loop ends in exactly one of `Found`,
//! `TimedOut` or `Failed`.
//!
//! A `null` receipt is data ("not included yet"). A failed query is an error
//! and ends the wait. It is never retried as if the receipt were missing.
//!
//! Timing: the wait ends within `timeout + poll_interval` of
//! [`ReceiptPoller::new`]. Sleeps never extend past the deadline. Each query
//! gets the remaining budget plus one interval, and overrunning that budget
//! counts as a timeout.
//!
//! Cancelling a wait means dropping its future. Nothing runs in the
//! background, so no further queries are issued afterwards.

use crate::error::{BundlerError, TransportError};
use crate::receipt::UserOperationReceipt;
use crate::transport::Transport;
use crate::user_operation::UserOperationHash;
use std::time::Duration;
use tokio::time::Instant;

pub const METHOD_GET_RECEIPT: &str = "eth_getUserOperationReceipt";

#[derive(Debug)]
pub enum PollState {
    Waiting,
    Found(UserOperationReceipt),
    TimedOut { elapsed: Duration },
    Failed(BundlerError),
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Waiting)
    }
}

/// Single `eth_getUserOperationReceipt` query; `None` until included.
pub async fn query_receipt<T: Transport + ?Sized>(
    transport: &T,
    hash: UserOperationHash,
) -> Result<Option<UserOperationReceipt>, TransportError> {
    let res = transport
        .call(METHOD_GET_RECEIPT, serde_json::json!([hash]))
        .await?;
    if res.is_null() {
        return Ok(None);
    }
    serde_json::from_value(res)
        .map(Some)
        .map_err(|e| TransportError::malformed(format!("invalid receipt: {e}")))
}

#[derive(Debug)]
pub struct ReceiptPoller<'a, T: Transport + ?Sized> {
    transport: &'a T,
    hash: UserOperationHash,
    timeout: Duration,
    interval: Duration,
    started: Instant,
    queries: u32,
    state: PollState,
}

impl<'a, T: Transport + ?Sized> ReceiptPoller<'a, T> {
    /// Enters `Waiting` immediately; the timeout runs from here.
    pub fn new(
        transport: &'a T,
        hash: UserOperationHash,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            transport,
            hash,
            timeout,
            interval: interval.max(Duration::from_millis(1)),
            started: Instant::now(),
            queries: 0,
            state: PollState::Waiting,
        }
    }

    pub fn hash(&self) -> UserOperationHash {
        self.hash
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// Number of receipt queries issued so far.
    pub fn queries(&self) -> u32 {
        self.queries
    }

    fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.started.elapsed())
    }

    /// Queries once and moves to the next state. While still `Waiting`, this
    /// also sleeps out the poll interval (never past the deadline) so the
    /// next call can query straight away. Terminal states are left as is.
    pub async fn poll_once(&mut self) -> &PollState {
        if self.state.is_terminal() {
            return &self.state;
        }

        let budget = self.remaining().saturating_add(self.interval);
        self.queries += 1;
        let attempt = self.queries;

        let result =
            tokio::time::timeout(budget, query_receipt(self.transport, self.hash)).await;

        self.state = match result {
            Ok(Ok(Some(receipt))) => {
                tracing::info!(
                    hash = %self.hash,
                    attempt,
                    success = receipt.success,
                    tx = ?receipt.transaction_hash(),
                    "user operation receipt found"
                );
                PollState::Found(receipt)
            }
            Ok(Err(err)) => {
                tracing::warn!(hash = %self.hash, attempt, error = %err, "receipt query failed");
                PollState::Failed(err.into())
            }
            Err(_) => self.timed_out(attempt),
            Ok(Ok(None)) => {
                let remaining = self.remaining();
                if remaining.is_zero() {
                    self.timed_out(attempt)
                } else {
                    tracing::debug!(hash = %self.hash, attempt, ?remaining, "receipt not yet available");
                    tokio::time::sleep(self.interval.min(remaining)).await;
                    PollState::Waiting
                }
            }
        };

        &self.state
    }

    fn timed_out(&self, attempt: u32) -> PollState {
        let elapsed = self.started.elapsed();
        tracing::warn!(hash = %self.hash, attempt, ?elapsed, "timed out waiting for receipt");
        PollState::TimedOut { elapsed }
    }

    /// Polls until a terminal state and converts it into the call outcome.
    pub async fn wait(mut self) -> Result<UserOperationReceipt, BundlerError> {
        loop {
            self.poll_once().await;
            match std::mem::replace(&mut self.state, PollState::Waiting) {
                PollState::Waiting => continue,
                PollState::Found(receipt) => return Ok(receipt),
                PollState::TimedOut { elapsed } => {
                    return Err(BundlerError::Timeout {
                        hash: self.hash,
                        elapsed,
                    })
                }
                PollState::Failed(err) => return Err(err),
            }
        }
    }
}
