//! Authorization evaluator: is the customer fully authorized to see gated content?
//!
//! `fully_authorized = service_active AND any(token allowance >= required_allowance)`.
//! Every read is fresh; nothing here is cached across calls.

use std::fmt;

use alloy::primitives::{Address, U256};
use futures::future::try_join_all;
use serde::Serialize;

use crate::config::{AllowancePolicy, GateConfig};
use crate::contracts;
use crate::error::GateError;
use crate::wallet::WalletProvider;

/// Allowance snapshot for one token, taken during a single evaluation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenAllowance {
    pub symbol: String,
    pub token: Address,
    pub owner: Address,
    pub spender: Address,
    pub amount: U256,
    pub sufficient: bool,
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationReport {
    pub owner: Address,
    pub merchant: Address,
    pub service_active: bool,
    pub required_allowance: U256,
    pub tokens: Vec<TokenAllowance>,
}

impl AuthorizationReport {
    pub fn has_sufficient_allowance(&self) -> bool {
        self.tokens.iter().any(|t| t.sufficient)
    }

    pub fn fully_authorized(&self) -> bool {
        self.service_active && self.has_sufficient_allowance()
    }

    /// First token, in configured order, whose allowance meets the threshold.
    pub fn first_sufficient(&self) -> Option<&TokenAllowance> {
        self.tokens.iter().find(|t| t.sufficient)
    }
}

impl fmt::Display for AuthorizationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Customer:  {}", self.owner)?;
        writeln!(f, "Merchant:  {}", self.merchant)?;
        writeln!(
            f,
            "Service:   {}",
            if self.service_active { "active" } else { "not activated" }
        )?;
        writeln!(f, "Required:  {}", self.required_allowance)?;
        for t in &self.tokens {
            writeln!(
                f,
                "  {:<6} {:>78} {}",
                t.symbol,
                t.amount.to_string(),
                if t.sufficient { "ok" } else { "insufficient" }
            )?;
        }
        write!(
            f,
            "Status:    {}",
            if self.fully_authorized() { "authorized" } else { "authorization required" }
        )
    }
}

/// Resolve the required allowance under the configured policy.
pub async fn required_allowance<W: WalletProvider>(
    wallet: &W,
    config: &GateConfig,
) -> Result<U256, GateError> {
    match config.allowance_policy {
        AllowancePolicy::ContractThreshold => {
            contracts::required_allowance_threshold(wallet, config.read_retry, config.merchant).await
        }
        policy => policy
            .static_threshold()
            .ok_or_else(|| GateError::Config("allowance policy has no threshold".to_string())),
    }
}

/// Read every token's allowance toward the merchant concurrently.
pub async fn token_allowances<W: WalletProvider>(
    wallet: &W,
    config: &GateConfig,
    owner: Address,
    required: U256,
) -> Result<Vec<TokenAllowance>, GateError> {
    let reads = config.tokens.iter().map(|spec| async move {
        let amount =
            contracts::allowance(wallet, config.read_retry, spec.address, owner, config.merchant)
                .await?;
        Ok::<_, GateError>(TokenAllowance {
            symbol: spec.symbol.clone(),
            token: spec.address,
            owner,
            spender: config.merchant,
            amount,
            sufficient: amount >= required,
        })
    });
    try_join_all(reads).await
}

/// Run a full evaluation pass for `owner`.
pub async fn evaluate<W: WalletProvider>(
    wallet: &W,
    config: &GateConfig,
    owner: Address,
) -> Result<AuthorizationReport, GateError> {
    let (service_active, required_allowance) = tokio::try_join!(
        contracts::service_active(
            wallet,
            config.read_retry,
            config.merchant,
            config.merchant_abi,
            owner
        ),
        required_allowance(wallet, config),
    )?;
    let tokens = token_allowances(wallet, config, owner, required_allowance).await?;

    let report = AuthorizationReport {
        owner,
        merchant: config.merchant,
        service_active,
        required_allowance,
        tokens,
    };

    tracing::debug!(
        owner = %owner,
        service_active,
        required = %required_allowance,
        sufficient = report.has_sufficient_allowance(),
        "authorization evaluated"
    );

    Ok(report)
}
