//! Wallet provider interface.
//!
//! [`WalletProvider`] is the seam between the authorization controller and whatever
//! actually talks to the chain: an injected EIP-1193 provider bridged into Rust, or
//! [`RpcWallet`](crate::rpc::RpcWallet) over plain JSON-RPC with a local signer.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use serde::Serialize;

use crate::error::WalletError;

/// A prepared transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    /// Always explicit. Some mobile wallets reject requests where it is omitted.
    pub value: U256,
}

impl TxRequest {
    /// A non-payable contract call: `value` is pinned to zero.
    pub fn call(from: Address, to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            from,
            to,
            data: data.into(),
            value: U256::ZERO,
        }
    }
}

/// On-chain confirmation record of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub transaction_hash: TxHash,
    pub block_number: Option<u64>,
    /// `false` when the transaction was mined but reverted.
    pub success: bool,
}

/// Provider notifications that invalidate the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
    Disconnected,
}

/// Wallet-side operations used by the controller.
///
/// All methods are request/response; none of them mutate controller state.
pub trait WalletProvider: Send + Sync {
    /// Current chain ID (`eth_chainId`).
    fn chain_id(&self) -> impl std::future::Future<Output = Result<u64, WalletError>> + Send;

    /// Ask the wallet to switch chains (`wallet_switchEthereumChain`).
    fn switch_chain(
        &self,
        chain_id: u64,
    ) -> impl std::future::Future<Output = Result<(), WalletError>> + Send;

    /// Accounts already authorized for this origin, without prompting (`eth_accounts`).
    fn accounts(&self) -> impl std::future::Future<Output = Result<Vec<Address>, WalletError>> + Send;

    /// Prompt the user to pick accounts (`eth_requestAccounts`).
    fn request_accounts(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Address>, WalletError>> + Send;

    /// Native-currency balance of `owner`.
    fn native_balance(
        &self,
        owner: Address,
    ) -> impl std::future::Future<Output = Result<U256, WalletError>> + Send;

    /// Read-only contract call (`eth_call`).
    fn call(
        &self,
        to: Address,
        data: Bytes,
    ) -> impl std::future::Future<Output = Result<Bytes, WalletError>> + Send;

    /// Broadcast a transaction and return its hash (`eth_sendTransaction`).
    fn send_transaction(
        &self,
        tx: TxRequest,
    ) -> impl std::future::Future<Output = Result<TxHash, WalletError>> + Send;

    /// Receipt for `hash`, or `None` while the transaction is not yet mined.
    fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> impl std::future::Future<Output = Result<Option<Receipt>, WalletError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_requests_pin_value_to_zero() {
        let tx = TxRequest::call(Address::ZERO, Address::repeat_byte(0x11), vec![0xde, 0xad]);
        assert_eq!(tx.value, U256::ZERO);
        assert_eq!(tx.data.as_ref(), &[0xde, 0xad]);
    }
}
