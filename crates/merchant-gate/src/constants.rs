use alloy::primitives::{address, Address, U256};

/// Ethereum mainnet chain ID.
pub const MAINNET_CHAIN_ID: u64 = 1;

/// Default JSON-RPC endpoint for Ethereum mainnet.
pub const RPC_URL: &str = "https://ethereum-rpc.publicnode.com";

/// Deployed deduct (merchant) contract.
pub const DEDUCT_CONTRACT_ADDRESS: Address = address!("aFfC493Ab24fD7029E03CED0d7B87eAFC36E78E0");

/// Tether USD on mainnet.
pub const USDT_ADDRESS: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");

/// USD Coin on mainnet.
pub const USDC_ADDRESS: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

/// Wrapped Ether on mainnet.
pub const WETH_ADDRESS: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");

/// One whole unit of ether, in wei.
pub const ONE_ETHER: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// EIP-1193 "user rejected request" error code.
pub const USER_REJECTED_CODE: i64 = 4001;

/// Approval amount granted to the merchant. Unlimited, so the customer signs once.
pub const APPROVAL_AMOUNT: U256 = U256::MAX;

/// Threshold used by the half-of-max allowance policy.
pub const HALF_MAX_ALLOWANCE: U256 = U256::from_limbs([u64::MAX, u64::MAX, u64::MAX, u64::MAX >> 1]);
