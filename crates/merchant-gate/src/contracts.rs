//! Typed read helpers and calldata builders for the token and merchant contracts.
//!
//! Reads go through [`WalletProvider::call`] under the configured [`RetryPolicy`];
//! writes are only encoded here and broadcast by [`crate::submit`].

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;

use crate::config::MerchantAbi;
use crate::error::GateError;
use crate::retry::{retry_read, RetryPolicy};
use crate::wallet::{TxRequest, WalletProvider};
use crate::{IAuthorizer, IDeductService, ITokenAuthorizer, IERC20};

/// Perform an `eth_call` for `C` and decode its return value.
async fn read<W, C>(
    wallet: &W,
    retry: RetryPolicy,
    label: &str,
    to: Address,
    call: C,
) -> Result<C::Return, GateError>
where
    W: WalletProvider,
    C: SolCall,
{
    let data = Bytes::from(call.abi_encode());
    let raw = retry_read(retry, label, || wallet.call(to, data.clone())).await?;
    C::abi_decode_returns(&raw)
        .map_err(|e| GateError::ContractCommunicationFailure(format!("{label}: decode failed: {e}")))
}

/// `balanceOf(owner)` on an ERC-20 token.
pub async fn balance_of<W: WalletProvider>(
    wallet: &W,
    retry: RetryPolicy,
    token: Address,
    owner: Address,
) -> Result<U256, GateError> {
    read(wallet, retry, "balanceOf", token, IERC20::balanceOfCall { account: owner }).await
}

/// `allowance(owner, spender)` on an ERC-20 token.
pub async fn allowance<W: WalletProvider>(
    wallet: &W,
    retry: RetryPolicy,
    token: Address,
    owner: Address,
    spender: Address,
) -> Result<U256, GateError> {
    read(
        wallet,
        retry,
        "allowance",
        token,
        IERC20::allowanceCall { owner, spender },
    )
    .await
}

/// Whether the merchant considers `customer` activated.
pub async fn service_active<W: WalletProvider>(
    wallet: &W,
    retry: RetryPolicy,
    merchant: Address,
    abi: MerchantAbi,
    customer: Address,
) -> Result<bool, GateError> {
    match abi {
        MerchantAbi::ServiceActivation => {
            read(
                wallet,
                retry,
                "isServiceActiveFor",
                merchant,
                IDeductService::isServiceActiveForCall { customer },
            )
            .await
        }
        MerchantAbi::Authorizer => {
            read(wallet, retry, "authorized", merchant, IAuthorizer::authorizedCall { customer }).await
        }
        MerchantAbi::TokenAuthorizer => {
            read(
                wallet,
                retry,
                "authorized",
                merchant,
                ITokenAuthorizer::authorizedCall { customer },
            )
            .await
        }
    }
}

/// `REQUIRED_ALLOWANCE_THRESHOLD()` on a service-activation merchant.
pub async fn required_allowance_threshold<W: WalletProvider>(
    wallet: &W,
    retry: RetryPolicy,
    merchant: Address,
) -> Result<U256, GateError> {
    read(
        wallet,
        retry,
        "REQUIRED_ALLOWANCE_THRESHOLD",
        merchant,
        IDeductService::REQUIRED_ALLOWANCE_THRESHOLDCall {},
    )
    .await
}

/// `approve(spender, amount)` from `owner`.
pub fn approve_request(owner: Address, token: Address, spender: Address, amount: U256) -> TxRequest {
    let data = IERC20::approveCall { spender, amount }.abi_encode();
    TxRequest::call(owner, token, data)
}

/// The merchant's activation call for `customer`, paying with `token`.
pub fn activation_request(
    customer: Address,
    merchant: Address,
    abi: MerchantAbi,
    token: Address,
) -> TxRequest {
    let data = match abi {
        MerchantAbi::ServiceActivation => {
            IDeductService::activateServiceCall { tokenContract: token }.abi_encode()
        }
        MerchantAbi::Authorizer => IAuthorizer::connectAndAuthorizeCall {}.abi_encode(),
        MerchantAbi::TokenAuthorizer => {
            ITokenAuthorizer::connectAndAuthorizeCall { token }.abi_encode()
        }
    };
    TxRequest::call(customer, merchant, data)
}
