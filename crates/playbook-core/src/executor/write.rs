use alloy::eips::eip2718::Encodable2718;
use alloy::json_abi::Function;
use alloy::network::{Ethereum, EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use error_stack::ResultExt;
use serde_json::Value as JsonValue;
use std::str::FromStr;

use super::call::finalize_params;
use super::{tx_marker, CommandResult, Executor};
use crate::codec::{encode_deployment, encode_function_call, find_function};
use crate::errors::{PlaybookError, PlaybookResult};
use crate::playbook_error;
use crate::spec::{InstanceId, Recipient, WriteCommand};
use crate::types::params::{substitute_args, WALLET_SIGIL};
use crate::types::valuer::{balance_references, parse_value, Amount};
use crate::types::{u256_to_bigint, Value};

const LEGACY_TX_TYPE: u8 = 0;
const TRANSFER_SIGNATURE: &str = "function transfer(address to, uint256 amount) returns (bool)";

/// What a write command turns into once its value is known.
enum Intent {
    Transfer { to: Address, value: U256 },
    Deploy { instance: InstanceId, value: U256 },
    TokenTransfer { token: InstanceId, to: Address, amount: U256 },
    MethodCall { instance: InstanceId, method: String, value: U256 },
}

struct Sender {
    name: String,
    address: Address,
}

impl Executor {
    pub(super) async fn run_write(&mut self, name: &str, args: &[String]) -> CommandResult {
        let Some(command) = self.spec.write_cmds.get(name).cloned() else {
            let error = playbook_error!(PlaybookError::Validation, "no write command named '{}'", name);
            return CommandResult::new(name, Err(error));
        };
        match self.write(&command, args).await {
            Ok(hash) => CommandResult {
                tx_hash: Some(hash),
                ..CommandResult::new(name, Ok(JsonValue::String(tx_marker(&hash))))
            },
            Err(e) => CommandResult::new(name, Err(e)),
        }
    }

    async fn write(&mut self, command: &WriteCommand, args: &[String]) -> PlaybookResult<B256> {
        self.discover_token_symbols().await;

        let sender = {
            let record = self.spec.wallets.get(&command.wallet).ok_or_else(|| {
                playbook_error!(PlaybookError::Resolution, "unknown wallet '{}'", command.wallet)
            })?;
            Sender { name: record.name.clone(), address: record.address }
        };
        let mut refreshed = vec![sender.name.clone()];
        for name in command.value.as_deref().map(balance_references).unwrap_or_default() {
            if !refreshed.contains(&name) {
                refreshed.push(name);
            }
        }
        for name in refreshed.iter() {
            self.refresh_balance(name).await?;
        }

        let mut gas_price = self.spec.config.gas_price;
        match self.client.suggest_gas_price().await {
            Ok(suggested) if suggested > gas_price => gas_price = suggested,
            Ok(_) => {}
            Err(e) => self.ctx.try_log(|logger| {
                warn!(logger, "gas price suggestion failed, using {}: {:?}", gas_price, e.current_context())
            }),
        }

        let amount = match &command.value {
            Some(expression) => {
                Some(parse_value(expression, &self.token_symbols(), args, &self.spec.wallets)?)
            }
            None => None,
        };

        let intent = self.intent(command, args, amount.as_ref())?;
        let request = match &intent {
            Intent::Transfer { to, value } => TransactionRequest {
                to: Some(TxKind::Call(*to)),
                value: Some(*value),
                ..Default::default()
            },
            Intent::Deploy { instance, value } => {
                let contract = self.spec.contracts.contract_of(*instance)?;
                let values = finalize_params(&command.name, &command.params, args, Some(sender.address), self)?;
                let data = encode_deployment(&contract.abi, &contract.bytecode, &values)?;
                TransactionRequest {
                    to: Some(TxKind::Create),
                    value: Some(*value),
                    input: TransactionInput::new(data.into()),
                    ..Default::default()
                }
            }
            Intent::TokenTransfer { token, to, amount } => {
                let contract = self.spec.contracts.contract_of(*token)?;
                let function = match find_function(&contract.abi, "transfer", 2) {
                    Ok(function) => function.clone(),
                    Err(_) => Function::parse(TRANSFER_SIGNATURE).map_err(|e| {
                        playbook_error!(PlaybookError::Codec, "invalid transfer signature: {}", e)
                    })?,
                };
                let args = [Value::Address(*to), Value::uint(u256_to_bigint(amount))];
                let data = encode_function_call(&function, &args)?;
                self.call_request(*token, data, U256::ZERO)?
            }
            Intent::MethodCall { instance, method, value } => {
                let contract = self.spec.contracts.contract_of(*instance)?;
                let values = finalize_params(&command.name, &command.params, args, Some(sender.address), self)?;
                let function = find_function(&contract.abi, method, values.len())?;
                let data = encode_function_call(function, &values)?;
                self.call_request(*instance, data, *value)?
            }
        };

        let (hash, nonce) = self.submit(&sender, request, gas_price).await?;
        self.ctx.try_log(|logger| {
            info!(logger, "wallet {} submitted transaction {:#x} (nonce {})", sender.name, hash, nonce)
        });

        if let Intent::Deploy { instance, .. } = intent {
            let address = sender.address.create(nonce);
            let label = self.spec.contracts.instance(instance).label();
            self.ctx.try_log(|logger| info!(logger, "contract {} deployed at {:#x}", label, address));
            self.spec.contracts.instance_mut(instance).address = Some(address);
            self.symbol_probed.insert(instance);
            self.fetch_token_symbol(instance).await;
        }
        Ok(hash)
    }

    async fn refresh_balance(&mut self, name: &str) -> PlaybookResult<()> {
        let address = self.wallet_address(name)?;
        let balance = self
            .client
            .balance_of(address)
            .await
            .attach_printable_lazy(|| format!("fetching balance of wallet '{}'", name))?;
        if let Some(record) = self.spec.wallets.get_mut(name) {
            record.balance = Some(balance);
        }
        Ok(())
    }

    /// Takes the receipt's contract address over the one predicted from the nonce.
    pub(super) fn confirm_deployment(&mut self, command: &str, deployed: Address) {
        let Some(instance) = self.spec.write_cmds.get(command).and_then(|c| c.instance) else {
            return;
        };
        let target = self.spec.contracts.instance_mut(instance);
        if target.address == Some(deployed) {
            return;
        }
        let label = target.label();
        target.address = Some(deployed);
        self.ctx.try_log(|logger| {
            warn!(logger, "contract {} was deployed at {:#x}, not at the predicted address", label, deployed)
        });
    }

    /// Lowercase symbols of every known token.
    fn token_symbols(&self) -> Vec<String> {
        self.spec
            .contracts
            .instance_ids()
            .filter_map(|id| self.spec.contracts.instance(id).token_symbol.as_ref())
            .map(|symbol| symbol.to_lowercase())
            .collect()
    }

    fn intent(&self, command: &WriteCommand, args: &[String], amount: Option<&Amount>) -> PlaybookResult<Intent> {
        let token_denominated = amount.map_or(false, Amount::is_token_denominated);
        let value = amount.filter(|a| !a.is_token_denominated()).map_or(U256::ZERO, |a| a.value);
        let to = match &command.to {
            Some(recipient) => Some(self.recipient_address(recipient, args)?),
            None => None,
        };

        if let (Some(amount), false, Some(to), None) = (amount, token_denominated, to, command.instance) {
            return Ok(Intent::Transfer { to, value: amount.value });
        }
        if let Some(instance) = command.instance {
            if !token_denominated && !self.spec.contracts.instance(instance).is_deployed() {
                return Ok(Intent::Deploy { instance, value });
            }
        }
        if let Some(amount) = amount.filter(|a| a.is_token_denominated()) {
            let symbol = amount.denomination.clone().unwrap_or_default();
            let token = self.spec.contracts.find_by_token_symbol(&symbol).ok_or_else(|| {
                playbook_error!(PlaybookError::Resolution, "referenced token contract not found: {}", symbol)
            })?;
            if !self.spec.contracts.instance(token).is_deployed() {
                return Err(playbook_error!(
                    PlaybookError::Resolution,
                    "referenced token contract is not deployed yet: {}",
                    symbol
                ));
            }
            let to = to.ok_or_else(|| {
                playbook_error!(PlaybookError::Resolution, "no transfer recipient address specified")
            })?;
            return Ok(Intent::TokenTransfer { token, to, amount: amount.value });
        }
        let instance = command.instance.ok_or_else(|| {
            playbook_error!(PlaybookError::Resolution, "write command has no contract instance to call")
        })?;
        let method = command.method.clone().ok_or_else(|| {
            playbook_error!(PlaybookError::Resolution, "write command has no method to call")
        })?;
        Ok(Intent::MethodCall { instance, method, value })
    }

    fn recipient_address(&self, recipient: &Recipient, args: &[String]) -> PlaybookResult<Address> {
        match recipient {
            Recipient::Address(address) => Ok(*address),
            Recipient::Wallet(name) => self.wallet_address(name),
            Recipient::Arg(template) => {
                let text = substitute_args(template, args).map_err(|index| {
                    playbook_error!(
                        PlaybookError::Resolution,
                        "insufficient arguments: recipient needs ${} but {} were supplied",
                        index,
                        args.len()
                    )
                })?;
                let text = text.trim();
                match text.strip_prefix(WALLET_SIGIL) {
                    Some(name) => self.wallet_address(name),
                    None => Address::from_str(text).map_err(|e| {
                        playbook_error!(PlaybookError::Resolution, "recipient '{}' is not an address: {}", text, e)
                    }),
                }
            }
        }
    }

    fn wallet_address(&self, name: &str) -> PlaybookResult<Address> {
        self.spec
            .wallets
            .get(name)
            .map(|w| w.address)
            .ok_or_else(|| playbook_error!(PlaybookError::Resolution, "unknown wallet '{}'", name))
    }

    fn call_request(&self, instance: InstanceId, data: Vec<u8>, value: U256) -> PlaybookResult<TransactionRequest> {
        let target = self.spec.contracts.instance(instance);
        let Some(address) = target.address.filter(|_| target.is_deployed()) else {
            return Err(playbook_error!(
                PlaybookError::Resolution,
                "contract instance {} is not deployed yet",
                target.label()
            ));
        };
        Ok(TransactionRequest {
            to: Some(TxKind::Call(address)),
            value: Some(value),
            input: TransactionInput::new(data.into()),
            ..Default::default()
        })
    }

    /// Fills in nonce, gas and chain id, signs a legacy transaction and broadcasts it.
    async fn submit(
        &self,
        sender: &Sender,
        request: TransactionRequest,
        gas_price: u128,
    ) -> PlaybookResult<(B256, u64)> {
        let config = &self.spec.config;
        let nonce = self.client.pending_nonce(sender.address).await?;
        let mut request = TransactionRequest {
            from: Some(sender.address),
            nonce: Some(nonce),
            gas_price: Some(gas_price),
            chain_id: Some(config.chain_id),
            transaction_type: Some(LEGACY_TX_TYPE),
            ..request
        };
        request.gas = Some(match self.client.estimate_gas(request.clone()).await {
            Ok(estimate) if estimate < config.gas_limit => estimate,
            Ok(_) => config.gas_limit,
            Err(e) => {
                self.ctx.try_log(|logger| {
                    warn!(logger, "gas estimation failed, using limit {}: {:?}", config.gas_limit, e.current_context())
                });
                config.gas_limit
            }
        });

        let record = self.spec.wallets.get(&sender.name).ok_or_else(|| {
            playbook_error!(PlaybookError::Signer, "unknown wallet '{}'", sender.name)
        })?;
        let signer = record.signer(self.key_cache.as_ref()).ok_or_else(|| {
            playbook_error!(PlaybookError::Signer, "failed to get private key of wallet '{}'", sender.name)
        })?;
        let wallet = EthereumWallet::from(signer);
        let envelope = <TransactionRequest as TransactionBuilder<Ethereum>>::build(request, &wallet)
            .await
            .map_err(|e| playbook_error!(PlaybookError::Signer, "failed to sign transaction: {}", e))?;
        let raw = Bytes::from(envelope.encoded_2718());
        let hash = self
            .client
            .send_raw_transaction(raw)
            .await
            .attach_printable_lazy(|| format!("broadcasting transaction {:#x}", envelope.tx_hash()))?;
        Ok((hash, nonce))
    }
}
