//! Session/network guard: provider must be on the expected chain before any
//! contract call, and the customer's account is restored or requested here.

use alloy::primitives::Address;

use crate::error::{GateError, WalletError};
use crate::wallet::WalletProvider;

/// Result of [`ensure_network`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkCheck {
    /// Already on the expected chain.
    Ready,
    /// The wallet accepted a chain switch. The provider is rebuilt by the wallet,
    /// so the caller must stop and wait for the resulting `ChainChanged` event.
    SwitchRequested,
}

fn chain_read_failure(e: WalletError) -> GateError {
    GateError::ContractCommunicationFailure(format!("eth_chainId: {}", e.message))
}

/// Check the chain id and, if it differs, ask the wallet to switch.
///
/// A declined prompt yields `NetworkMismatch { rejected: true }`; it ends the current
/// attempt but leaves the application usable.
pub async fn ensure_network<W: WalletProvider>(
    wallet: &W,
    expected: u64,
) -> Result<NetworkCheck, GateError> {
    let actual = wallet.chain_id().await.map_err(chain_read_failure)?;
    if actual == expected {
        return Ok(NetworkCheck::Ready);
    }

    tracing::info!(expected, actual, "wrong network, requesting chain switch");
    match wallet.switch_chain(expected).await {
        Ok(()) => Ok(NetworkCheck::SwitchRequested),
        Err(e) => {
            let rejected = e.is_user_rejection();
            tracing::warn!(expected, actual, rejected, error = %e, "chain switch failed");
            Err(GateError::NetworkMismatch {
                expected,
                actual,
                rejected,
            })
        }
    }
}

/// Confirm the chain id without prompting for a switch.
pub async fn verify_network<W: WalletProvider>(wallet: &W, expected: u64) -> Result<(), GateError> {
    let actual = wallet.chain_id().await.map_err(chain_read_failure)?;
    if actual != expected {
        return Err(GateError::NetworkMismatch {
            expected,
            actual,
            rejected: false,
        });
    }
    Ok(())
}

/// Restore an already-authorized account, or prompt for one.
///
/// With `force_prompt == false` this never surfaces wallet UI and returns `Ok(None)`
/// when nothing is authorized yet. With `force_prompt == true` the wallet's picker is
/// shown and whatever the user selects is returned, even if it differs from the
/// account the session held before.
pub async fn restore_or_request_account<W: WalletProvider>(
    wallet: &W,
    force_prompt: bool,
) -> Result<Option<Address>, GateError> {
    if !force_prompt {
        let accounts = wallet.accounts().await.map_err(|e| {
            GateError::ContractCommunicationFailure(format!("eth_accounts: {}", e.message))
        })?;
        return Ok(accounts.first().copied());
    }

    let accounts = wallet.request_accounts().await.map_err(|e| {
        if e.is_user_rejection() {
            GateError::UserRejected
        } else {
            GateError::TransactionInterfaceError(e.message)
        }
    })?;
    match accounts.first() {
        Some(address) => Ok(Some(*address)),
        None => Err(GateError::NoAccountSelected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockWallet;

    #[tokio::test]
    async fn ready_when_chain_matches() {
        let wallet = MockWallet::mainnet();
        assert_eq!(ensure_network(&wallet, 1).await, Ok(NetworkCheck::Ready));
        assert_eq!(wallet.switch_requests(), 0);
    }

    #[tokio::test]
    async fn mismatch_requests_switch() {
        let wallet = MockWallet::mainnet();
        wallet.set_chain_id(5);
        assert_eq!(ensure_network(&wallet, 1).await, Ok(NetworkCheck::SwitchRequested));
        assert_eq!(wallet.switch_requests(), 1);
    }

    #[tokio::test]
    async fn rejected_switch_is_reported() {
        let wallet = MockWallet::mainnet();
        wallet.set_chain_id(137);
        wallet.reject_switch();
        assert_eq!(
            ensure_network(&wallet, 1).await,
            Err(GateError::NetworkMismatch {
                expected: 1,
                actual: 137,
                rejected: true
            })
        );
    }

    #[tokio::test]
    async fn verify_network_never_prompts() {
        let wallet = MockWallet::mainnet();
        wallet.set_chain_id(5);
        assert!(verify_network(&wallet, 1).await.is_err());
        assert_eq!(wallet.switch_requests(), 0);
    }

    #[tokio::test]
    async fn silent_restore_returns_none_without_authorized_accounts() {
        let wallet = MockWallet::mainnet();
        assert_eq!(restore_or_request_account(&wallet, false).await, Ok(None));
        assert_eq!(wallet.account_prompts(), 0);
    }

    #[tokio::test]
    async fn prompt_returns_selected_account() {
        let wallet = MockWallet::mainnet();
        let picked = Address::repeat_byte(0x77);
        wallet.set_selectable_account(picked);
        assert_eq!(restore_or_request_account(&wallet, true).await, Ok(Some(picked)));
        assert_eq!(wallet.account_prompts(), 1);
    }

    #[tokio::test]
    async fn empty_prompt_result_is_no_account_selected() {
        let wallet = MockWallet::mainnet();
        assert_eq!(
            restore_or_request_account(&wallet, true).await,
            Err(GateError::NoAccountSelected)
        );
    }

    #[tokio::test]
    async fn declined_prompt_is_user_rejected() {
        let wallet = MockWallet::mainnet();
        wallet.reject_account_request();
        assert_eq!(
            restore_or_request_account(&wallet, true).await,
            Err(GateError::UserRejected)
        );
    }
}
