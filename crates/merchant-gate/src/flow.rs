//! Authorization controller: the connect → approve → activate → verify state machine.
//!
//! One [`AuthorizationController`] owns the wallet handle, the [`Session`] and the
//! published [`FlowState`]. `authorize` and `initialize` are guarded by a latch; a
//! second call while one is running fails fast with [`GateError::FlowInProgress`]
//! instead of interleaving a second set of transactions.
//!
//! Wallet events bump an epoch. A running flow checks it before every transaction
//! and aborts with [`GateError::WalletChanged`] once it moves; the re-initialization
//! the event asked for then runs as soon as the latch is free.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use alloy::primitives::{Address, U256};
use futures::future::try_join_all;
use serde::Serialize;
use tokio::sync::watch;

use crate::config::{GateConfig, TokenKind, TokenSpec};
use crate::constants::APPROVAL_AMOUNT;
use crate::contracts;
use crate::error::GateError;
use crate::evaluator::{self, AuthorizationReport};
use crate::network::{self, NetworkCheck};
use crate::retry::retry_read;
use crate::session::{Session, SharedSession, TxKind};
use crate::submit::{self, ReceiptPolling};
use crate::wallet::{WalletEvent, WalletProvider};

/// How the payer was classified from their native and wrapped balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PayerProfile {
    /// Native + wrapped balance meets the threshold: wrapped tokens first, then stablecoins.
    WrappedPreferring,
    /// Stablecoins only.
    StablecoinPreferring,
    /// No preference policy configured; tokens are tried in configured order.
    Unranked,
}

/// Published progress of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    NetworkChecked,
    AccountConnected,
    BalanceScanned(PayerProfile),
    TokenSelectionDecided(Vec<Address>),
    Approving { index: usize, token: Address },
    Activating { token: Address },
    Verified,
    /// A chain switch was accepted; nothing continues until the wallet reports the new chain.
    AwaitingRestart,
    Failed(String),
}

/// What the hosting surface should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateStatus {
    Disconnected,
    AwaitingNetworkSwitch,
    Locked(AuthorizationReport),
    Unlocked(AuthorizationReport),
}

impl GateStatus {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, GateStatus::Unlocked(_))
    }

    pub fn report(&self) -> Option<&AuthorizationReport> {
        match self {
            GateStatus::Locked(r) | GateStatus::Unlocked(r) => Some(r),
            _ => None,
        }
    }
}

struct FlowGuard<'a>(&'a AtomicBool);

impl Drop for FlowGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives a customer from "wallet present" to "fully authorized".
pub struct AuthorizationController<W> {
    wallet: Option<W>,
    config: GateConfig,
    session: SharedSession,
    state: watch::Sender<FlowState>,
    in_flight: AtomicBool,
    epoch: AtomicU64,
    reinit_requested: AtomicBool,
}

impl<W: WalletProvider> AuthorizationController<W> {
    /// `wallet` is `None` when no provider was injected; every operation then fails
    /// with [`GateError::ProviderMissing`].
    pub fn new(config: GateConfig, wallet: Option<W>) -> Self {
        let (state, _) = watch::channel(FlowState::Idle);
        Self {
            wallet,
            config,
            session: SharedSession::new(),
            state,
            in_flight: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            reinit_requested: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.session.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> FlowState {
        self.state.borrow().clone()
    }

    /// Whether a guarded operation is currently running.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn wallet(&self) -> Result<&W, GateError> {
        self.wallet.as_ref().ok_or(GateError::ProviderMissing)
    }

    fn acquire(&self) -> Result<FlowGuard<'_>, GateError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| GateError::FlowInProgress)?;
        Ok(FlowGuard(&self.in_flight))
    }

    /// Fails once a wallet event has arrived since `epoch` was read.
    fn ensure_current(&self, epoch: u64) -> Result<(), GateError> {
        if self.epoch.load(Ordering::SeqCst) == epoch {
            Ok(())
        } else {
            Err(GateError::WalletChanged)
        }
    }

    fn transition(&self, next: FlowState) {
        tracing::debug!(state = ?next, "flow transition");
        self.state.send_replace(next);
    }

    fn polling(&self) -> ReceiptPolling {
        ReceiptPolling {
            interval: self.config.receipt_poll_interval,
            timeout: self.config.receipt_timeout,
        }
    }

    /// Publish the terminal state for a failed operation.
    fn fail(&self, err: &GateError) {
        match err {
            // Network failures drop back to idle; the app stays usable.
            GateError::NetworkMismatch { .. } => {
                tracing::warn!(error = %err, "network check failed");
                self.transition(FlowState::Idle);
            }
            GateError::WalletChanged => {
                tracing::info!("wallet changed mid-flow, stopping before the next transaction");
                self.transition(FlowState::Idle);
            }
            // Closing a wallet prompt leaves the customer disconnected.
            GateError::UserRejected => {
                tracing::info!(error = %err, "authorization cancelled by user");
                self.session.update(Session::reset);
                self.transition(FlowState::Failed(err.user_message()));
            }
            _ if err.is_user_action() => {
                tracing::info!(error = %err, "authorization cancelled");
                self.transition(FlowState::Failed(err.user_message()));
            }
            _ => {
                tracing::error!(error = %err, "authorization flow failed");
                self.transition(FlowState::Failed(err.user_message()));
            }
        }
    }

    /// Page-load path: pin the network, restore an authorized account without
    /// prompting and report whether gated content may be shown.
    pub async fn initialize(&self) -> Result<GateStatus, GateError> {
        let result = {
            let _guard = self.acquire()?;
            let result = self.run_initialize().await;
            if let Err(e) = &result {
                self.fail(e);
            }
            result
        };
        match self.run_requested_reinit().await {
            Some(latest) => latest,
            None => result,
        }
    }

    /// Re-run the page-load path for wallet events that arrived while the latch was
    /// held. Returns the outcome of the last run, or `None` if nothing was requested
    /// or another caller holds the latch (it runs them when it finishes).
    async fn run_requested_reinit(&self) -> Option<Result<GateStatus, GateError>> {
        let mut last = None;
        while self.reinit_requested.load(Ordering::SeqCst) {
            let Ok(_guard) = self.acquire() else {
                break;
            };
            while self.reinit_requested.swap(false, Ordering::SeqCst) {
                tracing::info!("re-initializing after wallet change");
                self.session.update(Session::reset);
                let result = self.run_initialize().await;
                if let Err(e) = &result {
                    self.fail(e);
                }
                last = Some(result);
            }
        }
        last
    }

    async fn run_initialize(&self) -> Result<GateStatus, GateError> {
        let wallet = self.wallet()?;
        let chain_id = self.config.chain_id;

        if network::ensure_network(wallet, chain_id).await? == NetworkCheck::SwitchRequested {
            self.transition(FlowState::AwaitingRestart);
            return Ok(GateStatus::AwaitingNetworkSwitch);
        }
        self.session.update(|s| s.pin_network(chain_id));
        self.transition(FlowState::NetworkChecked);

        let Some(owner) = network::restore_or_request_account(wallet, false).await? else {
            tracing::info!("no authorized account, waiting for connect");
            return Ok(GateStatus::Disconnected);
        };
        self.session.update(|s| s.connect(owner));
        self.transition(FlowState::AccountConnected);

        let report = evaluator::evaluate(wallet, &self.config, owner).await?;
        tracing::info!(
            owner = %owner,
            authorized = report.fully_authorized(),
            "session restored"
        );
        if report.fully_authorized() {
            self.transition(FlowState::Verified);
            Ok(GateStatus::Unlocked(report))
        } else {
            Ok(GateStatus::Locked(report))
        }
    }

    /// Evaluate the connected account. Fails with `NetworkMismatch` off-chain and
    /// `NoAccountSelected` before a connect; never prompts.
    pub async fn check_authorization(&self) -> Result<AuthorizationReport, GateError> {
        let wallet = self.wallet()?;
        let chain_id = self.config.chain_id;
        network::verify_network(wallet, chain_id).await?;

        let owner = self
            .session
            .snapshot()
            .ready_account(chain_id)
            .ok_or(GateError::NoAccountSelected)?;
        evaluator::evaluate(wallet, &self.config, owner).await
    }

    /// Run the full connect/approve/activate/verify flow.
    ///
    /// A wallet event during the flow aborts it with [`GateError::WalletChanged`]
    /// before any further transaction is sent.
    pub async fn authorize(&self) -> Result<GateStatus, GateError> {
        let result = {
            let _guard = self.acquire()?;
            let epoch = self.epoch.load(Ordering::SeqCst);
            let result = self.run_authorize(epoch).await;
            if let Err(e) = &result {
                self.fail(e);
            }
            result
        };
        self.run_requested_reinit().await;
        result
    }

    async fn run_authorize(&self, epoch: u64) -> Result<GateStatus, GateError> {
        let wallet = self.wallet()?;
        let config = &self.config;

        if network::ensure_network(wallet, config.chain_id).await? == NetworkCheck::SwitchRequested {
            self.transition(FlowState::AwaitingRestart);
            return Ok(GateStatus::AwaitingNetworkSwitch);
        }
        self.session.update(|s| s.pin_network(config.chain_id));
        self.transition(FlowState::NetworkChecked);

        let owner = network::restore_or_request_account(wallet, true)
            .await?
            .ok_or(GateError::NoAccountSelected)?;
        self.ensure_current(epoch)?;
        self.session.update(|s| s.connect(owner));
        self.transition(FlowState::AccountConnected);

        let initial = evaluator::evaluate(wallet, config, owner).await?;
        if initial.fully_authorized() {
            tracing::info!(owner = %owner, "already authorized, nothing to submit");
            self.transition(FlowState::Verified);
            return Ok(GateStatus::Unlocked(initial));
        }

        let profile = self.classify_payer(wallet, owner).await?;
        self.transition(FlowState::BalanceScanned(profile));

        let order = token_order(&config.tokens, profile);
        tracing::info!(
            owner = %owner,
            ?profile,
            tokens = ?order.iter().map(|t| t.symbol.as_str()).collect::<Vec<_>>(),
            "token order decided"
        );
        self.transition(FlowState::TokenSelectionDecided(
            order.iter().map(|t| t.address).collect(),
        ));

        let required = initial.required_allowance;
        let candidate = match self.approve_tokens(wallet, owner, &order, required, epoch).await? {
            Some(token) => token,
            // An allowance granted earlier outside the preferred set still counts.
            None => initial
                .first_sufficient()
                .map(|t| t.token)
                .ok_or(GateError::NoEligibleToken)?,
        };

        let active = contracts::service_active(
            wallet,
            config.read_retry,
            config.merchant,
            config.merchant_abi,
            owner,
        )
        .await?;
        if active {
            tracing::debug!(owner = %owner, "service already active, skipping activation");
        } else {
            self.ensure_current(epoch)?;
            self.transition(FlowState::Activating { token: candidate });
            let request =
                contracts::activation_request(owner, config.merchant, config.merchant_abi, candidate);
            submit::submit(wallet, &self.session, TxKind::Activate, request, self.polling()).await?;
        }

        self.ensure_current(epoch)?;
        let report = evaluator::evaluate(wallet, config, owner).await?;
        self.ensure_current(epoch)?;
        if !report.fully_authorized() {
            return Err(GateError::VerificationFailed(format!(
                "service active: {}, sufficient allowance: {}",
                report.service_active,
                report.has_sufficient_allowance()
            )));
        }

        tracing::info!(owner = %owner, token = %candidate, "customer authorized");
        self.transition(FlowState::Verified);
        Ok(GateStatus::Unlocked(report))
    }

    async fn classify_payer(&self, wallet: &W, owner: Address) -> Result<PayerProfile, GateError> {
        let Some(threshold) = self.config.preference.wrapped_threshold else {
            return Ok(PayerProfile::Unranked);
        };
        let retry = self.config.read_retry;

        let wrapped = self
            .config
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Wrapped)
            .map(|t| contracts::balance_of(wallet, retry, t.address, owner));
        let (native, wrapped) = tokio::try_join!(
            retry_read(retry, "eth_getBalance", || wallet.native_balance(owner)),
            try_join_all(wrapped),
        )?;

        let combined = wrapped.into_iter().fold(native, U256::saturating_add);
        let profile = if combined >= threshold {
            PayerProfile::WrappedPreferring
        } else {
            PayerProfile::StablecoinPreferring
        };
        tracing::debug!(owner = %owner, native = %native, combined = %combined, ?profile, "payer classified");
        Ok(profile)
    }

    /// Walk all of `order`, approving every funded token whose allowance is below
    /// `required`. Returns the first token that ends up sufficient; that one is used
    /// for activation.
    async fn approve_tokens(
        &self,
        wallet: &W,
        owner: Address,
        order: &[&TokenSpec],
        required: U256,
        epoch: u64,
    ) -> Result<Option<Address>, GateError> {
        let config = &self.config;
        let retry = config.read_retry;
        let mut candidate = None;

        for (index, spec) in order.iter().enumerate() {
            let current = contracts::allowance(wallet, retry, spec.address, owner, config.merchant).await?;
            if current >= required {
                tracing::debug!(token = %spec.symbol, allowance = %current, "existing allowance suffices");
                candidate.get_or_insert(spec.address);
                continue;
            }

            let balance = contracts::balance_of(wallet, retry, spec.address, owner).await?;
            if balance.is_zero() {
                tracing::debug!(token = %spec.symbol, "zero balance, skipping");
                continue;
            }

            self.ensure_current(epoch)?;
            self.transition(FlowState::Approving {
                index,
                token: spec.address,
            });
            tracing::info!(token = %spec.symbol, owner = %owner, "requesting approval");
            let request = contracts::approve_request(owner, spec.address, config.merchant, APPROVAL_AMOUNT);
            submit::submit(wallet, &self.session, TxKind::Approve, request, self.polling()).await?;

            let updated = contracts::allowance(wallet, retry, spec.address, owner, config.merchant).await?;
            if updated >= required {
                candidate.get_or_insert(spec.address);
                continue;
            }
            tracing::warn!(
                token = %spec.symbol,
                allowance = %updated,
                required = %required,
                "approval confirmed but allowance still below threshold"
            );
        }
        Ok(candidate)
    }

    /// Forget the connected account.
    pub async fn disconnect(&self) {
        self.session.update(Session::reset);
        self.transition(FlowState::Idle);
        tracing::info!("wallet disconnected");
    }

    /// React to a provider notification: the session is discarded and the page-load
    /// path runs again against whatever the wallet now reports.
    ///
    /// While another operation holds the latch this returns
    /// [`GateError::FlowInProgress`]; that operation stops before its next
    /// transaction and runs the re-initialization when it ends.
    pub async fn handle_event(&self, event: WalletEvent) -> Result<GateStatus, GateError> {
        match &event {
            WalletEvent::AccountsChanged(accounts) => {
                tracing::info!(accounts = accounts.len(), "accounts changed, reinitializing");
            }
            WalletEvent::ChainChanged(chain_id) => {
                tracing::info!(chain_id, "chain changed, reinitializing");
            }
            WalletEvent::Disconnected => tracing::info!("provider disconnected, reinitializing"),
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.session.update(Session::reset);
        self.transition(FlowState::Idle);
        self.reinit_requested.store(true, Ordering::SeqCst);

        match self.run_requested_reinit().await {
            Some(result) => result,
            None => {
                tracing::info!("operation in progress, re-initialization deferred until it ends");
                Err(GateError::FlowInProgress)
            }
        }
    }
}

/// Order tokens for the approval walk.
fn token_order(tokens: &[TokenSpec], profile: PayerProfile) -> Vec<&TokenSpec> {
    match profile {
        PayerProfile::Unranked => tokens.iter().collect(),
        PayerProfile::WrappedPreferring => tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Wrapped)
            .chain(tokens.iter().filter(|t| t.kind == TokenKind::Stablecoin))
            .collect(),
        PayerProfile::StablecoinPreferring => {
            tokens.iter().filter(|t| t.kind == TokenKind::Stablecoin).collect()
        }
    }
}
