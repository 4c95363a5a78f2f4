use alloy::primitives::B256;
use error_stack::Report;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::client::{EthClient, ReceiptSummary};
use crate::errors::{ConfirmationFailure, PlaybookError, PlaybookErrorExt, PlaybookResult};
use crate::Context;

/// How long and how often to poll for a receipt.
#[derive(Debug, Clone, Copy)]
pub struct AwaitPolicy {
    pub interval: Duration,
    /// Used instead of `interval` after a failed query.
    pub error_interval: Duration,
    pub timeout: Duration,
}

impl AwaitPolicy {
    pub fn new(timeout: Duration) -> AwaitPolicy {
        AwaitPolicy { interval: Duration::from_secs(1), error_interval: Duration::from_secs(10), timeout }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationState {
    Submitted,
    Pending,
    /// The last query failed; polling continues at the error interval.
    QueryError(String),
    Mined(ReceiptSummary),
    TimedOut,
    Cancelled,
}

impl ConfirmationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConfirmationState::Mined(_) | ConfirmationState::TimedOut | ConfirmationState::Cancelled
        )
    }
}

/// Polls until `hash` is mined, the deadline passes or `cancel` flips to `true`.
///
/// Query errors are not fatal: they only slow polling down until the deadline.
pub async fn await_confirmation(
    client: &dyn EthClient,
    hash: B256,
    policy: &AwaitPolicy,
    mut cancel: Option<watch::Receiver<bool>>,
    ctx: &Context,
) -> PlaybookResult<ReceiptSummary> {
    let deadline = Instant::now() + policy.timeout;
    let mut state = ConfirmationState::Submitted;
    let tx = format!("{:#x}", hash);

    let receipt = loop {
        if cancel.as_ref().map_or(false, |rx| *rx.borrow()) {
            state = ConfirmationState::Cancelled;
        } else if Instant::now() >= deadline {
            state = ConfirmationState::TimedOut;
        } else {
            state = poll_once(client, hash).await;
        }
        ctx.try_log(|logger| match &state {
            ConfirmationState::Pending => info!(logger, "transaction {} is pending", tx),
            ConfirmationState::QueryError(e) => {
                warn!(logger, "failed to query transaction {}, backing off: {}", tx, e)
            }
            ConfirmationState::Mined(receipt) if receipt.success => {
                info!(logger, "transaction {} mined in block {:?}", tx, receipt.block_number)
            }
            ConfirmationState::Mined(_) => error!(logger, "transaction {} reverted", tx),
            ConfirmationState::TimedOut => error!(logger, "timed out waiting for transaction {}", tx),
            ConfirmationState::Cancelled => warn!(logger, "stopped waiting for transaction {}", tx),
            ConfirmationState::Submitted => {}
        });
        if state.is_terminal() {
            break state;
        }

        let interval = match state {
            ConfirmationState::QueryError(_) => policy.error_interval,
            _ => policy.interval,
        };
        let wake = std::cmp::min(Instant::now() + interval, deadline);
        let mut sender_gone = false;
        match cancel.as_mut() {
            Some(rx) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(wake) => {}
                    changed = rx.changed() => sender_gone = changed.is_err(),
                }
            }
            None => tokio::time::sleep_until(wake).await,
        }
        // nobody can cancel any more
        if sender_gone {
            cancel = None;
        }
    };

    let failure = match receipt {
        ConfirmationState::Mined(receipt) if receipt.success => return Ok(receipt),
        ConfirmationState::Mined(_) => ConfirmationFailure::Reverted,
        ConfirmationState::Cancelled => ConfirmationFailure::Cancelled,
        _ => ConfirmationFailure::TimedOut,
    };
    Err(Report::new(PlaybookError::Confirmation(failure))).with_transaction(tx)
}

async fn poll_once(client: &dyn EthClient, hash: B256) -> ConfirmationState {
    match client.transaction_by_hash(hash).await {
        Err(e) => ConfirmationState::QueryError(format!("{:?}", e.current_context())),
        Ok(None) => ConfirmationState::Pending,
        Ok(Some(status)) if status.is_pending => ConfirmationState::Pending,
        Ok(Some(_)) => match client.transaction_receipt(hash).await {
            Err(e) => ConfirmationState::QueryError(format!("{:?}", e.current_context())),
            Ok(None) => ConfirmationState::Pending,
            Ok(Some(receipt)) => ConfirmationState::Mined(receipt),
        },
    }
}
