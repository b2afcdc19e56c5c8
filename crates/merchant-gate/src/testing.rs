//! In-memory wallet and chain used by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::{keccak256, Address, Bytes, TxHash, U256};
use alloy::sol_types::SolCall;
use tokio::sync::Notify;

use crate::constants::{DEDUCT_CONTRACT_ADDRESS, MAINNET_CHAIN_ID};
use crate::error::WalletError;
use crate::wallet::{Receipt, TxRequest, WalletProvider};
use crate::{IAuthorizer, IDeductService, ITokenAuthorizer, IERC20};

/// How the mock answers `eth_sendTransaction`.
#[derive(Debug, Clone)]
pub enum SendBehavior {
    /// Broadcast, mine and apply the transaction.
    Mine,
    /// Broadcast and mine, but return an error whose message embeds the hash.
    BroadcastThenError,
    /// Broadcast, but the receipt reports a revert and no state changes.
    Revert,
    /// Nothing is broadcast; the wallet returns this error.
    Fail(WalletError),
}

#[derive(Debug)]
struct Chain {
    chain_id: u64,
    switch_requests: usize,
    reject_switch: bool,

    authorized_accounts: Vec<Address>,
    selectable_account: Option<Address>,
    account_prompts: usize,
    reject_account_request: bool,

    threshold: U256,
    allowances: HashMap<(Address, Address), U256>,
    token_balances: HashMap<(Address, Address), U256>,
    native_balances: HashMap<Address, U256>,
    service_active: HashMap<Address, bool>,

    revert_reads: bool,
    failing_reads: usize,
    reads: usize,

    send_behavior: SendBehavior,
    queued_sends: VecDeque<SendBehavior>,
    sent: Vec<TxRequest>,
    receipts: HashMap<TxHash, Receipt>,
    pending_polls: u32,
    receipt_polls: usize,
    block: u64,
}

/// Scriptable [`WalletProvider`] backed by a tiny simulated chain.
///
/// Understands the ERC-20 and merchant calls the controller issues, so approvals and
/// activations sent through it change what later reads return.
#[derive(Debug, Clone)]
pub struct MockWallet {
    chain: Arc<Mutex<Chain>>,
    account_gate: Arc<Mutex<Option<Arc<Notify>>>>,
}

impl MockWallet {
    /// A wallet on mainnet with nothing authorized and a zero threshold.
    pub fn mainnet() -> Self {
        Self {
            chain: Arc::new(Mutex::new(Chain {
                chain_id: MAINNET_CHAIN_ID,
                switch_requests: 0,
                reject_switch: false,
                authorized_accounts: Vec::new(),
                selectable_account: None,
                account_prompts: 0,
                reject_account_request: false,
                threshold: U256::ZERO,
                allowances: HashMap::new(),
                token_balances: HashMap::new(),
                native_balances: HashMap::new(),
                service_active: HashMap::new(),
                revert_reads: false,
                failing_reads: 0,
                reads: 0,
                send_behavior: SendBehavior::Mine,
                queued_sends: VecDeque::new(),
                sent: Vec::new(),
                receipts: HashMap::new(),
                pending_polls: 0,
                receipt_polls: 0,
                block: 19_000_000,
            })),
            account_gate: Arc::new(Mutex::new(None)),
        }
    }

    fn chain(&self) -> MutexGuard<'_, Chain> {
        self.chain.lock().unwrap()
    }

    pub fn merchant(&self) -> Address {
        DEDUCT_CONTRACT_ADDRESS
    }

    // network

    pub fn set_chain_id(&self, chain_id: u64) {
        self.chain().chain_id = chain_id;
    }

    pub fn switch_requests(&self) -> usize {
        self.chain().switch_requests
    }

    pub fn reject_switch(&self) {
        self.chain().reject_switch = true;
    }

    // accounts

    /// Account already authorized for the origin; returned by `eth_accounts`.
    pub fn authorize_account(&self, account: Address) {
        let mut chain = self.chain();
        chain.authorized_accounts.retain(|a| *a != account);
        chain.authorized_accounts.insert(0, account);
    }

    /// Account the user will pick when prompted.
    pub fn set_selectable_account(&self, account: Address) {
        self.chain().selectable_account = Some(account);
    }

    pub fn reject_account_request(&self) {
        self.chain().reject_account_request = true;
    }

    pub fn account_prompts(&self) -> usize {
        self.chain().account_prompts
    }

    /// Block `eth_requestAccounts` until the returned handle is notified.
    pub fn hold_account_requests(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.account_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    // contract state

    pub fn set_threshold(&self, threshold: U256) {
        self.chain().threshold = threshold;
    }

    pub fn set_allowance(&self, token: Address, owner: Address, amount: U256) {
        self.chain().allowances.insert((token, owner), amount);
    }

    pub fn allowance_of(&self, token: Address, owner: Address) -> U256 {
        self.chain().allowances.get(&(token, owner)).copied().unwrap_or_default()
    }

    pub fn set_token_balance(&self, token: Address, owner: Address, amount: U256) {
        self.chain().token_balances.insert((token, owner), amount);
    }

    pub fn set_native_balance(&self, owner: Address, amount: U256) {
        self.chain().native_balances.insert(owner, amount);
    }

    pub fn set_service_active(&self, owner: Address, active: bool) {
        self.chain().service_active.insert(owner, active);
    }

    pub fn is_service_active(&self, owner: Address) -> bool {
        self.chain().service_active.get(&owner).copied().unwrap_or(false)
    }

    // read failures

    pub fn revert_reads(&self, revert: bool) {
        self.chain().revert_reads = revert;
    }

    /// Fail the next `n` contract reads with a transient RPC error.
    pub fn fail_next_reads(&self, n: usize) {
        self.chain().failing_reads = n;
    }

    pub fn reads(&self) -> usize {
        self.chain().reads
    }

    // transactions

    /// Behavior for every send that has no queued override.
    pub fn set_send_behavior(&self, behavior: SendBehavior) {
        self.chain().send_behavior = behavior;
    }

    /// Behavior for the next send only.
    pub fn queue_send_behavior(&self, behavior: SendBehavior) {
        self.chain().queued_sends.push_back(behavior);
    }

    /// Transactions that were broadcast, in order.
    pub fn sent(&self) -> Vec<TxRequest> {
        self.chain().sent.clone()
    }

    /// Report "not yet mined" for the next `n` receipt polls.
    pub fn set_pending_polls(&self, n: u32) {
        self.chain().pending_polls = n;
    }

    pub fn receipt_polls(&self) -> usize {
        self.chain().receipt_polls
    }
}

fn word(value: U256) -> Bytes {
    Bytes::from(value.to_be_bytes::<32>().to_vec())
}

fn reverted() -> WalletError {
    WalletError::new(Some(3), "execution reverted")
}

impl Chain {
    fn read(&mut self, to: Address, data: &[u8]) -> Result<Bytes, WalletError> {
        self.reads += 1;
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            return Err(WalletError::new(Some(-32005), "limit exceeded"));
        }
        if self.revert_reads || data.len() < 4 {
            return Err(reverted());
        }

        let selector = [data[0], data[1], data[2], data[3]];
        let result = match selector {
            IERC20::allowanceCall::SELECTOR => {
                let call = IERC20::allowanceCall::abi_decode(data).map_err(|_| reverted())?;
                self.allowances.get(&(to, call.owner)).copied().unwrap_or_default()
            }
            IERC20::balanceOfCall::SELECTOR => {
                let call = IERC20::balanceOfCall::abi_decode(data).map_err(|_| reverted())?;
                self.token_balances.get(&(to, call.account)).copied().unwrap_or_default()
            }
            IDeductService::REQUIRED_ALLOWANCE_THRESHOLDCall::SELECTOR => self.threshold,
            IDeductService::isServiceActiveForCall::SELECTOR => {
                let call =
                    IDeductService::isServiceActiveForCall::abi_decode(data).map_err(|_| reverted())?;
                U256::from(self.active(call.customer) as u8)
            }
            // Both authorizer families share `authorized(address)`.
            IAuthorizer::authorizedCall::SELECTOR => {
                let call = IAuthorizer::authorizedCall::abi_decode(data).map_err(|_| reverted())?;
                U256::from(self.active(call.customer) as u8)
            }
            _ => return Err(reverted()),
        };
        Ok(word(result))
    }

    fn active(&self, owner: Address) -> bool {
        self.service_active.get(&owner).copied().unwrap_or(false)
    }

    fn send(&mut self, tx: TxRequest) -> Result<TxHash, WalletError> {
        let behavior = self
            .queued_sends
            .pop_front()
            .unwrap_or_else(|| self.send_behavior.clone());
        if let SendBehavior::Fail(err) = behavior {
            return Err(err);
        }

        let hash = keccak256((self.sent.len() as u64 + 1).to_be_bytes());
        self.sent.push(tx.clone());
        self.block += 1;

        let success = !matches!(behavior, SendBehavior::Revert) && self.apply(&tx);
        self.receipts.insert(
            hash,
            Receipt {
                transaction_hash: hash,
                block_number: Some(self.block),
                success,
            },
        );

        match behavior {
            SendBehavior::BroadcastThenError => Err(WalletError::message(format!(
                "Transaction {hash} failed: Cannot read properties of undefined (reading 'wait')"
            ))),
            _ => Ok(hash),
        }
    }

    /// Execute `tx` against the simulated contracts; `false` means it reverted.
    fn apply(&mut self, tx: &TxRequest) -> bool {
        let data = tx.data.as_ref();
        if data.len() < 4 {
            return false;
        }
        let selector = [data[0], data[1], data[2], data[3]];
        match selector {
            IERC20::approveCall::SELECTOR => match IERC20::approveCall::abi_decode(data) {
                Ok(call) => {
                    self.allowances.insert((tx.to, tx.from), call.amount);
                    true
                }
                Err(_) => false,
            },
            IDeductService::activateServiceCall::SELECTOR => {
                match IDeductService::activateServiceCall::abi_decode(data) {
                    Ok(call) => {
                        let allowance = self
                            .allowances
                            .get(&(call.tokenContract, tx.from))
                            .copied()
                            .unwrap_or_default();
                        if allowance < self.threshold {
                            return false;
                        }
                        self.service_active.insert(tx.from, true);
                        true
                    }
                    Err(_) => false,
                }
            }
            IAuthorizer::connectAndAuthorizeCall::SELECTOR
            | ITokenAuthorizer::connectAndAuthorizeCall::SELECTOR => {
                self.service_active.insert(tx.from, true);
                true
            }
            _ => false,
        }
    }
}

impl WalletProvider for MockWallet {
    async fn chain_id(&self) -> Result<u64, WalletError> {
        Ok(self.chain().chain_id)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError> {
        let mut chain = self.chain();
        chain.switch_requests += 1;
        if chain.reject_switch {
            return Err(WalletError::new(Some(4001), "User rejected the request."));
        }
        chain.chain_id = chain_id;
        Ok(())
    }

    async fn accounts(&self) -> Result<Vec<Address>, WalletError> {
        Ok(self.chain().authorized_accounts.clone())
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError> {
        let gate = self.account_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut chain = self.chain();
        chain.account_prompts += 1;
        if chain.reject_account_request {
            return Err(WalletError::new(Some(4001), "User rejected the request."));
        }
        match chain.selectable_account {
            Some(account) => {
                chain.authorized_accounts.retain(|a| *a != account);
                chain.authorized_accounts.insert(0, account);
                Ok(vec![account])
            }
            None => Ok(Vec::new()),
        }
    }

    async fn native_balance(&self, owner: Address) -> Result<U256, WalletError> {
        Ok(self.chain().native_balances.get(&owner).copied().unwrap_or_default())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, WalletError> {
        self.chain().read(to, &data)
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, WalletError> {
        self.chain().send(tx)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, WalletError> {
        let mut chain = self.chain();
        chain.receipt_polls += 1;
        if chain.pending_polls > 0 {
            chain.pending_polls -= 1;
            return Ok(None);
        }
        Ok(chain.receipts.get(&hash).cloned())
    }
}
