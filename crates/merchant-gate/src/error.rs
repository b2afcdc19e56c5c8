use alloy::primitives::TxHash;
use thiserror::Error;

use crate::constants::USER_REJECTED_CODE;

/// A raw error surfaced by the wallet provider, shaped like an EIP-1193 error object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("wallet error (code {code:?}): {message}")]
pub struct WalletError {
    /// Provider or JSON-RPC error code, when one was supplied.
    pub code: Option<i64>,
    pub message: String,
    /// Transaction hash attached to the error by the wallet, if any.
    pub tx_hash: Option<TxHash>,
}

impl WalletError {
    pub fn new(code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            tx_hash: None,
        }
    }

    /// An error without a code, e.g. a transport failure.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    pub fn with_tx_hash(mut self, hash: TxHash) -> Self {
        self.tx_hash = Some(hash);
        self
    }

    /// The user closed or declined the wallet prompt.
    pub fn is_user_rejection(&self) -> bool {
        self.code == Some(USER_REJECTED_CODE)
            || self.message.contains("ACTION_REJECTED")
            || self.message.to_ascii_lowercase().contains("user rejected")
            || self.message.to_ascii_lowercase().contains("user denied")
    }

    /// The account cannot pay for gas.
    pub fn is_insufficient_funds(&self) -> bool {
        self.message.to_ascii_lowercase().contains("insufficient funds")
    }

    /// Transient RPC conditions worth retrying for read-only calls.
    pub fn is_transient(&self) -> bool {
        if matches!(self.code, Some(-32005) | Some(-32603) | Some(429)) {
            return true;
        }
        let msg = self.message.to_ascii_lowercase();
        [
            "timeout",
            "timed out",
            "rate limit",
            "too many requests",
            "connection reset",
            "connection refused",
            "header not found",
            "temporarily unavailable",
            "503",
        ]
        .iter()
        .any(|needle| msg.contains(needle))
    }
}

/// Errors returned by merchant-gate operations.
///
/// Every failure is caught at the flow boundary and classified into one of these;
/// [`GateError::user_message`] renders the text shown to the customer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("no wallet provider available")]
    ProviderMissing,

    #[error("network mismatch: expected chain {expected}, wallet is on {actual} (rejected: {rejected})")]
    NetworkMismatch {
        expected: u64,
        actual: u64,
        /// The user declined the chain-switch prompt.
        rejected: bool,
    },

    #[error("no account selected")]
    NoAccountSelected,

    #[error("contract communication failure: {0}")]
    ContractCommunicationFailure(String),

    #[error("insufficient funds for gas")]
    InsufficientGasFunds,

    #[error("request rejected by user")]
    UserRejected,

    #[error("transaction interface error: {0}")]
    TransactionInterfaceError(String),

    #[error("transaction {0} reverted")]
    TransactionReverted(TxHash),

    #[error("no token satisfies the required allowance")]
    NoEligibleToken,

    #[error("an authorization flow is already in progress")]
    FlowInProgress,

    /// The wallet switched account or network while a flow was running.
    #[error("wallet account or network changed during the flow")]
    WalletChanged,

    #[error("post-flow verification failed: {0}")]
    VerificationFailed(String),

    #[error("config error: {0}")]
    Config(String),
}

impl GateError {
    /// Classify a wallet error raised while submitting a transaction.
    pub fn from_submission(err: &WalletError) -> Self {
        if err.is_user_rejection() {
            GateError::UserRejected
        } else if err.is_insufficient_funds() {
            GateError::InsufficientGasFunds
        } else {
            GateError::TransactionInterfaceError(err.message.clone())
        }
    }

    /// Classify a wallet error raised by a read-only contract call.
    pub fn from_read(label: &str, err: &WalletError) -> Self {
        GateError::ContractCommunicationFailure(format!("{label}: {}", err.message))
    }

    /// Whether the failure ends the attempt but leaves the app usable as-is.
    pub fn is_user_action(&self) -> bool {
        matches!(
            self,
            GateError::UserRejected | GateError::NetworkMismatch { rejected: true, .. }
        )
    }

    /// Text shown to the customer in the overlay.
    pub fn user_message(&self) -> String {
        match self {
            GateError::ProviderMissing => {
                "Please install MetaMask, Trust Wallet or a compatible wallet to continue.".to_string()
            }
            GateError::NetworkMismatch { rejected: true, .. } => {
                "You must switch to Ethereum Mainnet to use this service. Switch manually and reload."
                    .to_string()
            }
            GateError::NetworkMismatch { .. } => {
                "Switching network failed. Please switch to Ethereum Mainnet manually.".to_string()
            }
            GateError::NoAccountSelected => "No account selected.".to_string(),
            GateError::ContractCommunicationFailure(_) => {
                "Contract communication failed. Make sure you are on Ethereum Mainnet and reload."
                    .to_string()
            }
            GateError::InsufficientGasFunds => {
                "Transaction failed: not enough ETH to pay for gas.".to_string()
            }
            GateError::UserRejected => {
                "You rejected the transaction or connection. Please try again.".to_string()
            }
            GateError::TransactionInterfaceError(msg) => format!("Wallet error: {msg}"),
            GateError::TransactionReverted(hash) => {
                format!("Transaction {hash} was mined but reverted.")
            }
            GateError::NoEligibleToken => {
                "No supported token could be authorized. Fund your wallet with USDT, USDC or WETH."
                    .to_string()
            }
            GateError::FlowInProgress => "Authorization already in progress…".to_string(),
            GateError::WalletChanged => {
                "Your wallet account or network changed. Please start again.".to_string()
            }
            GateError::VerificationFailed(_) => {
                "Authorization could not be confirmed on-chain. Please retry.".to_string()
            }
            GateError::Config(msg) => format!("Misconfigured: {msg}"),
        }
    }
}
