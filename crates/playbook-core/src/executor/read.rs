use alloy::primitives::Address;
use serde_json::Value as JsonValue;

use super::call::finalize_params;
use super::{CommandResult, Executor};
use crate::errors::{PlaybookError, PlaybookResult};
use crate::playbook_error;
use crate::spec::ReadCommand;

impl Executor {
    pub(super) async fn run_read(&mut self, name: &str, args: &[String]) -> Vec<CommandResult> {
        let Some(command) = self.spec.read_cmds.get(name).cloned() else {
            return vec![];
        };
        let instance = self.spec.contracts.instance(command.instance);
        if !instance.is_deployed() {
            let error = playbook_error!(
                PlaybookError::Resolution,
                "contract instance {} is not deployed yet",
                instance.label()
            );
            return vec![CommandResult::new(name, Err(error))];
        }
        if command.wallets.is_empty() {
            let result = self.read_as(&command, args, None).await;
            return vec![CommandResult::new(name, result)];
        }
        let mut results = Vec::with_capacity(command.wallets.len());
        for wallet in command.wallets.iter() {
            let Some(address) = self.spec.wallets.get(wallet).map(|w| w.address) else {
                continue;
            };
            let result = self.read_as(&command, args, Some(address)).await;
            results.push(CommandResult::new(name, result).for_wallet(wallet, address));
        }
        results
    }

    async fn read_as(
        &self,
        command: &ReadCommand,
        args: &[String],
        sender: Option<Address>,
    ) -> PlaybookResult<JsonValue> {
        let values = finalize_params(&command.name, &command.params, args, sender, self)?;
        self.call_view(command.instance, &command.method, sender, &values).await
    }
}
