//! [`WalletProvider`] over an alloy JSON-RPC provider.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use alloy::transports::{RpcError, TransportErrorKind};

use crate::error::WalletError;
use crate::wallet::{Receipt, TxRequest, WalletProvider};

/// Alloy-backed wallet.
///
/// With a pinned local account (a provider built with `.wallet(EthereumWallet)`),
/// account queries answer with that account instead of asking the node, which
/// would return an empty list for `eth_accounts`.
pub struct RpcWallet<P> {
    provider: P,
    local_account: Option<Address>,
}

impl<P> RpcWallet<P> {
    /// Wrap a provider whose node manages accounts itself (`eth_accounts`).
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            local_account: None,
        }
    }

    /// Wrap a provider that signs locally for `account`.
    pub fn with_local_account(provider: P, account: Address) -> Self {
        Self {
            provider,
            local_account: Some(account),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

/// Map an alloy RPC error into the provider-neutral shape, preserving the
/// JSON-RPC code when the node returned an error payload.
fn wallet_error(err: RpcError<TransportErrorKind>) -> WalletError {
    match err.as_error_resp() {
        Some(payload) => {
            let mut message = payload.message.to_string();
            if let Some(data) = payload.data.as_ref() {
                message.push_str(" (data: ");
                message.push_str(data.get());
                message.push(')');
            }
            WalletError::new(Some(payload.code), message)
        }
        None => WalletError::message(err.to_string()),
    }
}

impl<P> WalletProvider for RpcWallet<P>
where
    P: Provider + Send + Sync,
{
    async fn chain_id(&self) -> Result<u64, WalletError> {
        self.provider.get_chain_id().await.map_err(wallet_error)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError> {
        let params = switch_chain_params(chain_id);
        self.provider
            .raw_request::<_, serde::de::IgnoredAny>("wallet_switchEthereumChain".into(), params)
            .await
            .map(|_| ())
            .map_err(wallet_error)
    }

    async fn accounts(&self) -> Result<Vec<Address>, WalletError> {
        if let Some(account) = self.local_account {
            return Ok(vec![account]);
        }
        self.provider.get_accounts().await.map_err(wallet_error)
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError> {
        if let Some(account) = self.local_account {
            return Ok(vec![account]);
        }
        self.provider
            .raw_request::<_, Vec<Address>>("eth_requestAccounts".into(), ())
            .await
            .map_err(wallet_error)
    }

    async fn native_balance(&self, owner: Address) -> Result<U256, WalletError> {
        self.provider.get_balance(owner).await.map_err(wallet_error)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, WalletError> {
        let tx = TransactionRequest::default().with_to(to).with_input(data);
        self.provider.call(tx).await.map_err(wallet_error)
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, WalletError> {
        let request = TransactionRequest::default()
            .with_from(tx.from)
            .with_to(tx.to)
            .with_input(tx.data)
            .with_value(tx.value);
        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(wallet_error)?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, WalletError> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(wallet_error)?;
        Ok(receipt.map(|r| Receipt {
            transaction_hash: r.transaction_hash,
            block_number: r.block_number,
            success: r.status(),
        }))
    }
}

/// `[{ "chainId": "0x1" }]`
fn switch_chain_params(chain_id: u64) -> [SwitchChainParams; 1] {
    [SwitchChainParams {
        chain_id: format!("0x{chain_id:x}"),
    }]
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SwitchChainParams {
    chain_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_params_use_hex_chain_id() {
        let params = switch_chain_params(1);
        assert_eq!(params[0].chain_id, "0x1");
        let params = switch_chain_params(42431);
        assert_eq!(params[0].chain_id, "0xa5bf");
    }

    #[test]
    fn error_payload_keeps_code() {
        let payload = alloy::rpc::json_rpc::ErrorPayload {
            code: 4001,
            message: "User rejected the request.".into(),
            data: None,
        };
        let err = wallet_error(RpcError::ErrorResp(payload));
        assert_eq!(err.code, Some(4001));
        assert!(err.is_user_rejection());
    }
}
