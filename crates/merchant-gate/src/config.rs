//! Controller configuration.
//!
//! One [`GateConfig`] replaces the per-deployment copies of the browser script:
//! token set, merchant ABI family and allowance policy are all chosen here.

use std::time::Duration;

use alloy::primitives::{Address, U256};
use serde::Serialize;

use crate::constants::{
    DEDUCT_CONTRACT_ADDRESS, HALF_MAX_ALLOWANCE, MAINNET_CHAIN_ID, ONE_ETHER, RPC_URL,
    USDC_ADDRESS, USDT_ADDRESS, WETH_ADDRESS,
};
use crate::error::GateError;
use crate::retry::RetryPolicy;

/// Which merchant contract ABI is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MerchantAbi {
    /// `isServiceActiveFor` / `activateService(token)` / `REQUIRED_ALLOWANCE_THRESHOLD`.
    ServiceActivation,
    /// `authorized` / `connectAndAuthorize()`.
    Authorizer,
    /// `authorized` / `connectAndAuthorize(token)`.
    TokenAuthorizer,
}

impl std::str::FromStr for MerchantAbi {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "service" | "service-activation" => Ok(MerchantAbi::ServiceActivation),
            "authorizer" => Ok(MerchantAbi::Authorizer),
            "token-authorizer" => Ok(MerchantAbi::TokenAuthorizer),
            other => Err(GateError::Config(format!("unknown merchant ABI '{other}'"))),
        }
    }
}

/// How the required allowance threshold is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AllowancePolicy {
    /// Read `REQUIRED_ALLOWANCE_THRESHOLD()` from the merchant contract.
    ContractThreshold,
    /// A fixed amount in token base units.
    Fixed(U256),
    /// At least half of `uint256` max.
    HalfOfMax,
}

impl std::str::FromStr for AllowancePolicy {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contract" => Ok(AllowancePolicy::ContractThreshold),
            "half-max" => Ok(AllowancePolicy::HalfOfMax),
            other => other
                .parse::<U256>()
                .map(AllowancePolicy::Fixed)
                .map_err(|e| GateError::Config(format!("invalid allowance policy '{other}': {e}"))),
        }
    }
}

impl AllowancePolicy {
    /// The threshold when it does not depend on the contract.
    pub fn static_threshold(&self) -> Option<U256> {
        match self {
            AllowancePolicy::ContractThreshold => None,
            AllowancePolicy::Fixed(amount) => Some(*amount),
            AllowancePolicy::HalfOfMax => Some(HALF_MAX_ALLOWANCE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenKind {
    Stablecoin,
    /// Wrapped native asset (WETH); paired with the native balance when profiling the payer.
    Wrapped,
}

/// A payment token the merchant accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenSpec {
    pub symbol: String,
    pub address: Address,
    pub kind: TokenKind,
}

impl TokenSpec {
    pub fn new(symbol: impl Into<String>, address: Address, kind: TokenKind) -> Self {
        Self {
            symbol: symbol.into(),
            address,
            kind,
        }
    }
}

/// Payer classification heuristic. A UX preference, not a correctness rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PreferencePolicy {
    /// When native + wrapped balance reaches this amount, wrapped tokens are tried
    /// first. `None` disables profiling: tokens are tried in configured order.
    pub wrapped_threshold: Option<U256>,
}

impl Default for PreferencePolicy {
    fn default() -> Self {
        Self {
            wrapped_threshold: Some(ONE_ETHER),
        }
    }
}

/// Runtime configuration for the authorization controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub merchant: Address,
    pub merchant_abi: MerchantAbi,
    pub tokens: Vec<TokenSpec>,
    pub allowance_policy: AllowancePolicy,
    pub preference: PreferencePolicy,
    pub read_retry: RetryPolicy,
    pub receipt_poll_interval: Duration,
    /// `None` polls until the transaction is mined.
    pub receipt_timeout: Option<Duration>,
}

impl Default for GateConfig {
    /// The mainnet deduct-contract deployment accepting USDT, USDC and WETH.
    fn default() -> Self {
        Self {
            chain_id: MAINNET_CHAIN_ID,
            rpc_url: RPC_URL.to_string(),
            merchant: DEDUCT_CONTRACT_ADDRESS,
            merchant_abi: MerchantAbi::ServiceActivation,
            tokens: default_tokens(),
            allowance_policy: AllowancePolicy::ContractThreshold,
            preference: PreferencePolicy::default(),
            read_retry: RetryPolicy::default(),
            receipt_poll_interval: Duration::from_secs(1),
            receipt_timeout: None,
        }
    }
}

fn default_tokens() -> Vec<TokenSpec> {
    vec![
        TokenSpec::new("USDT", USDT_ADDRESS, TokenKind::Stablecoin),
        TokenSpec::new("USDC", USDC_ADDRESS, TokenKind::Stablecoin),
        TokenSpec::new("WETH", WETH_ADDRESS, TokenKind::Wrapped),
    ]
}

impl GateConfig {
    pub fn with_merchant(mut self, merchant: Address, abi: MerchantAbi) -> Self {
        self.merchant = merchant;
        self.merchant_abi = abi;
        self
    }

    pub fn with_tokens(mut self, tokens: Vec<TokenSpec>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_allowance_policy(mut self, policy: AllowancePolicy) -> Self {
        self.allowance_policy = policy;
        self
    }

    pub fn with_preference(mut self, preference: PreferencePolicy) -> Self {
        self.preference = preference;
        self
    }

    pub fn with_read_retry(mut self, retry: RetryPolicy) -> Self {
        self.read_retry = retry;
        self
    }

    pub fn with_receipt_polling(mut self, interval: Duration, timeout: Option<Duration>) -> Self {
        self.receipt_poll_interval = interval;
        self.receipt_timeout = timeout;
        self
    }

    /// Load configuration from environment variables, falling back to mainnet defaults.
    pub fn from_env() -> Result<Self, GateError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("CHAIN_ID") {
            config.chain_id = parse_num(&v, "CHAIN_ID")?;
        }
        if let Some(v) = get("RPC_URL") {
            config.rpc_url = v;
        }
        if let Some(v) = get("MERCHANT_ADDRESS") {
            config.merchant = parse_address(&v, "MERCHANT_ADDRESS")?;
        }
        if let Some(v) = get("MERCHANT_ABI") {
            config.merchant_abi = v.parse()?;
        }
        if let Some(v) = get("GATE_TOKENS") {
            config.tokens = parse_tokens(&v)?;
        }
        if let Some(v) = get("ALLOWANCE_POLICY") {
            config.allowance_policy = v.parse()?;
        }
        if let Some(v) = get("WRAPPED_PREFERENCE_WEI") {
            config.preference.wrapped_threshold = if v.eq_ignore_ascii_case("off") {
                None
            } else {
                Some(v.parse::<U256>().map_err(|e| {
                    GateError::Config(format!("invalid WRAPPED_PREFERENCE_WEI '{v}': {e}"))
                })?)
            };
        }
        if let Some(v) = get("READ_RETRY_ATTEMPTS") {
            config.read_retry.attempts = parse_num(&v, "READ_RETRY_ATTEMPTS")?;
        }
        if let Some(v) = get("READ_RETRY_DELAY_MS") {
            config.read_retry.delay = Duration::from_millis(parse_num(&v, "READ_RETRY_DELAY_MS")?);
        }
        if let Some(v) = get("RECEIPT_POLL_MS") {
            config.receipt_poll_interval = Duration::from_millis(parse_num(&v, "RECEIPT_POLL_MS")?);
        }
        if let Some(v) = get("RECEIPT_TIMEOUT_SECS") {
            config.receipt_timeout = Some(Duration::from_secs(parse_num(&v, "RECEIPT_TIMEOUT_SECS")?));
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the controller cannot run with.
    pub fn validate(&self) -> Result<(), GateError> {
        if self.merchant == Address::ZERO {
            return Err(GateError::Config("merchant address is zero".to_string()));
        }
        if self.tokens.is_empty() {
            return Err(GateError::Config("at least one token is required".to_string()));
        }
        for (i, token) in self.tokens.iter().enumerate() {
            if token.address == Address::ZERO {
                return Err(GateError::Config(format!("token {} has a zero address", token.symbol)));
            }
            if self.tokens[..i].iter().any(|t| t.address == token.address) {
                return Err(GateError::Config(format!(
                    "token {} ({}) is listed twice",
                    token.symbol, token.address
                )));
            }
        }
        if self.allowance_policy == AllowancePolicy::ContractThreshold
            && self.merchant_abi != MerchantAbi::ServiceActivation
        {
            return Err(GateError::Config(
                "contract threshold policy requires the service-activation ABI".to_string(),
            ));
        }
        if self.receipt_poll_interval.is_zero() {
            return Err(GateError::Config("receipt poll interval must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn token(&self, address: Address) -> Option<&TokenSpec> {
        self.tokens.iter().find(|t| t.address == address)
    }
}

fn parse_num<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, GateError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| GateError::Config(format!("invalid {key} '{value}': {e}")))
}

fn parse_address(value: &str, key: &str) -> Result<Address, GateError> {
    value
        .trim()
        .parse()
        .map_err(|e| GateError::Config(format!("invalid {key} '{value}': {e}")))
}

/// `SYMBOL:0xADDRESS:kind` entries, comma separated. `kind` is `stable` or `wrapped`.
fn parse_tokens(value: &str) -> Result<Vec<TokenSpec>, GateError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let [symbol, address, kind] = parts.as_slice() else {
                return Err(GateError::Config(format!(
                    "token entry '{entry}' must be SYMBOL:ADDRESS:KIND"
                )));
            };
            let kind = match kind.to_ascii_lowercase().as_str() {
                "stable" | "stablecoin" => TokenKind::Stablecoin,
                "wrapped" => TokenKind::Wrapped,
                other => {
                    return Err(GateError::Config(format!("unknown token kind '{other}'")));
                }
            };
            Ok(TokenSpec::new(*symbol, parse_address(address, "GATE_TOKENS")?, kind))
        })
        .collect()
}
