use alloy::primitives::Address;
use serde_json::Value as JsonValue;

use super::{CommandResult, Executor};
use crate::errors::PlaybookResult;
use crate::spec::CallCommand;
use crate::types::params::{InvocationScope, ParamSlot};
use crate::types::Value;

impl Executor {
    pub(super) async fn run_call(&mut self, name: &str, args: &[String]) -> Vec<CommandResult> {
        let Some(command) = self.spec.call_cmds.get(name).cloned() else {
            return vec![];
        };
        if command.wallets.is_empty() {
            let result = self.call_as(&command, args, None).await;
            return vec![CommandResult::new(name, result)];
        }
        let mut results = Vec::with_capacity(command.wallets.len());
        for wallet in command.wallets.iter() {
            let Some(address) = self.spec.wallets.get(wallet).map(|w| w.address) else {
                continue;
            };
            let result = self.call_as(&command, args, Some(address)).await;
            results.push(CommandResult::new(name, result).for_wallet(wallet, address));
        }
        results
    }

    async fn call_as(
        &self,
        command: &CallCommand,
        args: &[String],
        sender: Option<Address>,
    ) -> PlaybookResult<JsonValue> {
        let params = finalize_params(&command.name, &command.params, args, sender, self)?;
        let params = params.iter().map(Value::to_json).collect();
        self.client.rpc_call(&command.method, params).await
    }
}

pub(super) fn finalize_params(
    command: &str,
    params: &[ParamSlot],
    args: &[String],
    sender: Option<Address>,
    executor: &Executor,
) -> PlaybookResult<Vec<Value>> {
    let scope = InvocationScope { args, sender, wallets: &executor.spec.wallets };
    params.iter().map(|slot| slot.finalize(command, &scope)).collect()
}
