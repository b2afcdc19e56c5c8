//! Robust transaction submission.
//!
//! Broadcast once, then poll for a receipt. Some mobile wallet bridges report an
//! error even though the transaction was broadcast (and later mined); when the
//! error still carries a transaction hash we follow that hash instead of failing.
//! Submissions are never retried.

use std::sync::LazyLock;
use std::time::Duration;

use alloy::primitives::TxHash;
use regex::Regex;

use crate::error::{GateError, WalletError};
use crate::session::{Session, SharedSession, TxKind};
use crate::wallet::{Receipt, TxRequest, WalletProvider};

/// Consecutive non-transient receipt-poll failures tolerated before giving up.
const MAX_POLL_ERRORS: u32 = 3;

/// How a successful submission was confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The wallet returned a hash and the receipt reports success.
    Confirmed(Receipt),
    /// The wallet reported an error, but a hash was salvaged from it and mined successfully.
    Recovered(Receipt),
}

impl SubmitOutcome {
    pub fn receipt(&self) -> &Receipt {
        match self {
            SubmitOutcome::Confirmed(r) | SubmitOutcome::Recovered(r) => r,
        }
    }

    pub fn was_recovered(&self) -> bool {
        matches!(self, SubmitOutcome::Recovered(_))
    }
}

/// Receipt polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptPolling {
    pub interval: Duration,
    /// `None` waits until mined.
    pub timeout: Option<Duration>,
}

static TX_HASH_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"0x[0-9a-fA-F]{64}").ok());

/// Salvage a transaction hash from a wallet error.
///
/// Fallback for wallets that fail after broadcasting: prefer the structured field,
/// otherwise take the first `0x` + 64 hex digit run in the message text.
pub fn recover_tx_hash(err: &WalletError) -> Option<TxHash> {
    if let Some(hash) = err.tx_hash {
        return Some(hash);
    }
    TX_HASH_RE
        .as_ref()?
        .find_iter(&err.message)
        // A longer hex run (e.g. calldata) is not a hash.
        .find(|m| {
            !err.message[m.end()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_hexdigit())
        })
        .and_then(|m| m.as_str().parse().ok())
}

/// Poll until `hash` has a receipt.
pub async fn wait_for_receipt<W: WalletProvider>(
    wallet: &W,
    hash: TxHash,
    polling: ReceiptPolling,
) -> Result<Receipt, GateError> {
    let poll = async {
        let mut errors = 0;
        loop {
            match wallet.transaction_receipt(hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => errors = 0,
                Err(e) if e.is_transient() => {
                    tracing::debug!(tx = %hash, error = %e, "transient receipt poll error");
                }
                Err(e) => {
                    errors += 1;
                    tracing::warn!(tx = %hash, attempt = errors, error = %e, "receipt poll failed");
                    if errors >= MAX_POLL_ERRORS {
                        return Err(GateError::TransactionInterfaceError(format!(
                            "receipt for {hash} unavailable: {}",
                            e.message
                        )));
                    }
                }
            }
            tokio::time::sleep(polling.interval).await;
        }
    };

    match polling.timeout {
        Some(limit) => tokio::time::timeout(limit, poll).await.map_err(|_| {
            GateError::TransactionInterfaceError(format!(
                "receipt for {hash} not observed within {}s",
                limit.as_secs()
            ))
        })?,
        None => poll.await,
    }
}

/// Clears the session's pending transaction when the submission ends, including
/// when the submitting future is dropped mid-wait.
struct PendingGuard<'a>(&'a SharedSession);

impl<'a> PendingGuard<'a> {
    fn begin(session: &'a SharedSession, kind: TxKind) -> Self {
        session.update(|s| s.begin_pending(kind));
        Self(session)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.update(Session::clear_pending);
    }
}

/// Submit `request` and wait for a definitive outcome.
///
/// The session carries the pending transaction from submission until a receipt is
/// observed or the attempt fails.
pub async fn submit<W: WalletProvider>(
    wallet: &W,
    session: &SharedSession,
    kind: TxKind,
    request: TxRequest,
    polling: ReceiptPolling,
) -> Result<SubmitOutcome, GateError> {
    let _pending = PendingGuard::begin(session, kind);
    submit_inner(wallet, session, kind, request, polling).await
}

async fn submit_inner<W: WalletProvider>(
    wallet: &W,
    session: &SharedSession,
    kind: TxKind,
    request: TxRequest,
    polling: ReceiptPolling,
) -> Result<SubmitOutcome, GateError> {
    let to = request.to;
    let (hash, recovered) = match wallet.send_transaction(request).await {
        Ok(hash) => (hash, false),
        Err(e) => {
            if e.is_user_rejection() || e.is_insufficient_funds() {
                return Err(GateError::from_submission(&e));
            }
            match recover_tx_hash(&e) {
                Some(hash) => {
                    tracing::warn!(
                        %kind,
                        tx = %hash,
                        error = %e,
                        "wallet reported an error after broadcast, following recovered hash"
                    );
                    (hash, true)
                }
                None => {
                    tracing::error!(%kind, to = %to, error = %e, "transaction submission failed");
                    return Err(GateError::from_submission(&e));
                }
            }
        }
    };

    session.update(|s| s.set_pending_hash(hash));
    tracing::info!(%kind, tx = %hash, to = %to, "transaction submitted, awaiting receipt");

    let receipt = wait_for_receipt(wallet, hash, polling).await?;
    if !receipt.success {
        tracing::error!(%kind, tx = %hash, "transaction mined but reverted");
        return Err(GateError::TransactionReverted(hash));
    }

    tracing::info!(
        %kind,
        tx = %hash,
        block = receipt.block_number.unwrap_or_default(),
        recovered,
        "transaction confirmed"
    );

    Ok(if recovered {
        SubmitOutcome::Recovered(receipt)
    } else {
        SubmitOutcome::Confirmed(receipt)
    })
}
