//! Runs validated commands and targets against a node.

mod call;
pub mod confirmation;
mod read;
pub mod target;
mod write;

use alloy::primitives::{Address, TxKind, B256};
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

use crate::client::{EthClient, KeyCache};
use crate::codec::{decode_outputs, encode_function_call, find_function};
use crate::errors::{PlaybookError, PlaybookResult};
use crate::playbook_error;
use crate::spec::{CommandKind, InstanceId, Spec};
use crate::Context;

pub use confirmation::{await_confirmation, AwaitPolicy, ConfirmationState};
pub use target::{Halt, StepOutcome, TargetOutcome};

pub const TX_MARKER: &str = "tx:";

/// Outcome of one command for one wallet.
#[derive(Debug)]
pub struct CommandResult {
    pub command: String,
    /// Set when a call or read fanned out over wallets.
    pub wallet: Option<String>,
    pub address: Option<Address>,
    pub result: PlaybookResult<JsonValue>,
    /// Hash of the submitted transaction, for writes.
    pub tx_hash: Option<B256>,
}

impl CommandResult {
    fn new(command: &str, result: PlaybookResult<JsonValue>) -> CommandResult {
        CommandResult { command: command.to_string(), wallet: None, address: None, result, tx_hash: None }
    }

    fn for_wallet(mut self, wallet: &str, address: Address) -> CommandResult {
        self.wallet = Some(wallet.to_string());
        self.address = Some(address);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub fn tx_marker(hash: &B256) -> String {
    format!("{}{:#x}", TX_MARKER, hash)
}

pub struct Executor {
    pub spec: Spec,
    client: Arc<dyn EthClient>,
    key_cache: Arc<dyn KeyCache>,
    policy: AwaitPolicy,
    cancel: Option<watch::Receiver<bool>>,
    /// Instances whose token symbol was already asked for.
    symbol_probed: HashSet<InstanceId>,
    ctx: Context,
}

impl Executor {
    pub fn new(
        spec: Spec,
        client: Arc<dyn EthClient>,
        key_cache: Arc<dyn KeyCache>,
        ctx: Context,
    ) -> Executor {
        let policy = AwaitPolicy::new(spec.config.await_timeout);
        Executor { spec, client, key_cache, policy, cancel: None, symbol_probed: HashSet::new(), ctx }
    }

    pub fn with_await_policy(mut self, policy: AwaitPolicy) -> Executor {
        self.policy = policy;
        self
    }

    /// Confirmation waits stop once the receiver reads `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Executor {
        self.cancel = Some(cancel);
        self
    }

    /// Runs one command. Call and read commands return one result per matched wallet.
    pub async fn run_command(&mut self, name: &str, args: &[String]) -> PlaybookResult<Vec<CommandResult>> {
        let kind = self.spec.command_kind(name).ok_or_else(|| {
            playbook_error!(PlaybookError::Validation, "no command named '{}'", name)
        })?;
        self.ctx.try_log(|logger| info!(logger, "running {} command {}", kind, name));
        let results = match kind {
            CommandKind::Call => self.run_call(name, args).await,
            CommandKind::Read => self.run_read(name, args).await,
            CommandKind::Write => vec![self.run_write(name, args).await],
        };
        Ok(results)
    }

    async fn call_view(
        &self,
        instance: InstanceId,
        method: &str,
        from: Option<Address>,
        values: &[crate::types::Value],
    ) -> PlaybookResult<JsonValue> {
        let contract = self.spec.contracts.contract_of(instance)?;
        let Some(address) = self.spec.contracts.instance(instance).address else {
            return Err(playbook_error!(PlaybookError::Resolution, "contract instance is not deployed yet"));
        };
        let function = find_function(&contract.abi, method, values.len())?;
        let data = encode_function_call(function, values)?;
        let request = TransactionRequest {
            from,
            to: Some(TxKind::Call(address)),
            input: TransactionInput::new(data.into()),
            ..Default::default()
        };
        let output = self.client.call_contract(request).await?;
        decode_outputs(function, &output)
    }

    /// Asks every deployed instance exposing `symbol()` for its token symbol, once.
    async fn discover_token_symbols(&mut self) {
        for id in self.spec.contracts.instance_ids() {
            if self.symbol_probed.contains(&id) || !self.spec.contracts.instance(id).is_deployed() {
                continue;
            }
            self.symbol_probed.insert(id);
            self.fetch_token_symbol(id).await;
        }
    }

    async fn fetch_token_symbol(&mut self, id: InstanceId) {
        let has_symbol = self
            .spec
            .contracts
            .contract_of(id)
            .map_or(false, |c| {
                c.abi.function("symbol").map_or(false, |f| f.iter().any(|f| f.inputs.is_empty()))
            });
        if !has_symbol {
            return;
        }
        let label = self.spec.contracts.instance(id).label();
        match self.call_view(id, "symbol", None, &[]).await {
            Ok(JsonValue::String(symbol)) if !symbol.is_empty() => {
                let symbol = symbol.to_uppercase();
                self.ctx.try_log(|logger| info!(logger, "contract {} has token symbol {}", label, symbol));
                self.spec.contracts.instance_mut(id).token_symbol = Some(symbol);
            }
            Ok(_) => {}
            Err(e) => self.ctx.try_log(|logger| {
                warn!(logger, "unable to fetch token symbol of {}: {:?}", label, e.current_context())
            }),
        }
    }
}
