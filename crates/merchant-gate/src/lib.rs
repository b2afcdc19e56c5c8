//! Wallet authorization controller for merchant-gated content.
//!
//! Connects a customer's wallet, pins it to mainnet, checks ERC-20 allowances granted
//! to the merchant contract, and walks the customer through approval and service
//! activation until the merchant reports them fully authorized.
//!
//! # Flow
//!
//! - **Network guard** ([`network`]): chain id must match before any contract call
//! - **Evaluator** ([`evaluator`]): `serviceActive AND any(allowance >= required)`
//! - **Controller** ([`AuthorizationController`]): approve, activate, re-verify
//! - **Submission** ([`submit`]): broadcast and confirm, salvaging hashes from wallet errors
//!
//! # Quick example
//!
//! ```no_run
//! use alloy::network::EthereumWallet;
//! use alloy::providers::ProviderBuilder;
//! use alloy::signers::local::PrivateKeySigner;
//! use merchant_gate::{AuthorizationController, GateConfig, RpcWallet};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let signer: PrivateKeySigner = "0xYOUR_KEY".parse().unwrap();
//! let account = signer.address();
//! let config = GateConfig::default();
//! let provider = ProviderBuilder::new()
//!     .wallet(EthereumWallet::from(signer))
//!     .connect_http(config.rpc_url.parse().unwrap());
//!
//! let controller = AuthorizationController::new(
//!     config,
//!     Some(RpcWallet::with_local_account(provider, account)),
//! );
//! let status = controller.authorize().await.unwrap();
//! println!("{status:?}");
//! # }
//! ```

// Core types
pub mod config;
pub mod constants;
pub mod error;
pub mod session;
pub mod wallet;

// Chain access
pub mod contracts;
pub mod retry;
pub mod rpc;

// Authorization
pub mod evaluator;
pub mod flow;
pub mod network;
pub mod submit;

use alloy::sol;

// ERC-20 subset used for allowance checks and approvals.
sol! {
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
    }
}

// Merchant contract, service-activation family.
sol! {
    interface IDeductService {
        function isServiceActiveFor(address customer) external view returns (bool);
        function activateService(address tokenContract) external;
        function REQUIRED_ALLOWANCE_THRESHOLD() external view returns (uint256);
    }
}

// Merchant contract, authorizer family.
sol! {
    interface IAuthorizer {
        event Authorized(address indexed customer);

        function authorized(address customer) external view returns (bool);
        function connectAndAuthorize() external;
    }
}

// Authorizer family deployments that take the payment token as a parameter.
sol! {
    interface ITokenAuthorizer {
        event Authorized(address indexed customer);

        function authorized(address customer) external view returns (bool);
        function connectAndAuthorize(address token) external;
    }
}

// Re-exports
pub use config::{AllowancePolicy, GateConfig, MerchantAbi, PreferencePolicy, TokenKind, TokenSpec};
pub use constants::*;
pub use error::{GateError, WalletError};
pub use evaluator::{AuthorizationReport, TokenAllowance};
pub use flow::{AuthorizationController, FlowState, GateStatus, PayerProfile};
pub use retry::RetryPolicy;
pub use rpc::RpcWallet;
pub use session::{PendingTransaction, Session, SharedSession, TxKind};
pub use submit::SubmitOutcome;
pub use wallet::{Receipt, TxRequest, WalletEvent, WalletProvider};

#[cfg(test)]
mod testing;
