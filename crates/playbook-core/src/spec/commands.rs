use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use error_stack::ResultExt;
use std::str::FromStr;

use super::contracts::{Contracts, InstanceId};
use super::wallets::{compile_selector, StickySelector, Wallets};
use crate::errors::{PlaybookError, PlaybookResult};
use crate::manifest::{CallDecl, ParamDecl, ReadDecl, WriteDecl};
use crate::playbook_error;
use crate::types::params::{
    arg_indices, parse_wallet_reference, resolve_param, ParamSlot, ParamValue, ResolutionContext,
    WalletDirectory, WalletField, WALLET_SIGIL,
};
use crate::types::valuer::check_value_references;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Call,
    Read,
    Write,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandKind::Call => write!(f, "call"),
            CommandKind::Read => write!(f, "read"),
            CommandKind::Write => write!(f, "write"),
        }
    }
}

/// Raw JSON-RPC method call, fanned out over matching wallets.
#[derive(Debug, Clone)]
pub struct CallCommand {
    pub name: String,
    pub description: Option<String>,
    pub wallets: Vec<String>,
    pub method: String,
    pub params: Vec<ParamSlot>,
}

/// Contract view call, fanned out over matching wallets.
#[derive(Debug, Clone)]
pub struct ReadCommand {
    pub name: String,
    pub description: Option<String>,
    pub wallets: Vec<String>,
    pub method: String,
    pub params: Vec<ParamSlot>,
    pub instance: InstanceId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Address(Address),
    Wallet(String),
    /// Text containing `$N` tokens, resolved per invocation.
    Arg(String),
}

/// State-changing transaction sent by exactly one wallet.
#[derive(Debug, Clone)]
pub struct WriteCommand {
    pub name: String,
    pub description: Option<String>,
    pub wallet: String,
    pub sticky_key: String,
    pub method: Option<String>,
    pub params: Vec<ParamSlot>,
    pub instance: Option<InstanceId>,
    pub value: Option<String>,
    pub to: Option<Recipient>,
}

fn arg_count_of(indices: impl IntoIterator<Item = usize>) -> usize {
    indices.into_iter().max().map_or(0, |max| max + 1)
}

fn resolve_params(
    command: &str,
    decls: &[ParamDecl],
    args: &[String],
    wallets: &dyn WalletDirectory,
) -> PlaybookResult<Vec<ParamSlot>> {
    let ctx = ResolutionContext { command, args, wallets };
    decls
        .iter()
        .enumerate()
        .map(|(position, decl)| {
            let resolution = resolve_param(decl, &ctx)
                .attach_printable_lazy(|| format!("param #{} of command '{}'", position, command))?;
            Ok(ParamSlot { decl: decl.clone(), resolution })
        })
        .collect()
}

fn ensure_method(abi: &JsonAbi, method: &str, contract: &str) -> PlaybookResult<()> {
    if abi.function(method).is_some() {
        return Ok(());
    }
    let available = abi.functions().map(|f| f.name.clone()).collect::<Vec<_>>().join(", ");
    Err(playbook_error!(
        PlaybookError::Validation,
        "contract {} has no method '{}' (available: {})",
        contract,
        method,
        available
    ))
}

impl CallCommand {
    pub fn validate(
        name: &str,
        decl: &CallDecl,
        wallets: &Wallets,
        args: &[String],
    ) -> PlaybookResult<CallCommand> {
        let selector = decl.wallet.as_deref().unwrap_or_default();
        if selector.starts_with(WALLET_SIGIL) {
            return Err(playbook_error!(
                PlaybookError::Validation,
                "wallet selector '{}' must be a name pattern, not a wallet reference",
                selector
            ));
        }
        let matched = wallets.matching(&compile_selector(selector)?);
        if !selector.is_empty() && matched.is_empty() {
            return Err(playbook_error!(
                PlaybookError::Validation,
                "no wallet matches selector '{}'",
                selector
            ));
        }
        if decl.method.trim().is_empty() {
            return Err(playbook_error!(PlaybookError::Validation, "method is required"));
        }
        Ok(CallCommand {
            name: name.to_string(),
            description: decl.description.clone(),
            wallets: matched,
            method: decl.method.clone(),
            params: resolve_params(name, &decl.params, args, wallets)?,
        })
    }

    pub fn arg_indices(&self) -> Vec<usize> {
        self.params.iter().flat_map(ParamSlot::arg_indices).collect()
    }

    pub fn arg_count(&self) -> usize {
        arg_count_of(self.arg_indices())
    }
}

impl ReadCommand {
    pub fn validate(
        name: &str,
        decl: &ReadDecl,
        wallets: &Wallets,
        contracts: &mut Contracts,
        args: &[String],
    ) -> PlaybookResult<ReadCommand> {
        let selector = decl.wallet.as_deref().unwrap_or_default();
        let matched = wallets.matching(&compile_selector(selector)?);
        if !selector.is_empty() && matched.is_empty() {
            return Err(playbook_error!(
                PlaybookError::Validation,
                "no wallet matches selector '{}'",
                selector
            ));
        }
        let Some(instance_ref) = &decl.instance else {
            return Err(playbook_error!(PlaybookError::Validation, "instance is required"));
        };
        let instance = contracts.bind(instance_ref)?;
        let contract = contracts.contract_of(instance)?;
        ensure_method(&contract.abi, &decl.method, &contract.name)?;
        Ok(ReadCommand {
            name: name.to_string(),
            description: decl.description.clone(),
            wallets: matched,
            method: decl.method.clone(),
            params: resolve_params(name, &decl.params, args, wallets)?,
            instance,
        })
    }

    pub fn arg_indices(&self) -> Vec<usize> {
        self.params.iter().flat_map(ParamSlot::arg_indices).collect()
    }

    pub fn arg_count(&self) -> usize {
        arg_count_of(self.arg_indices())
    }
}

impl WriteCommand {
    pub fn validate(
        name: &str,
        decl: &WriteDecl,
        wallets: &Wallets,
        contracts: &mut Contracts,
        sticky: &mut StickySelector,
        args: &[String],
    ) -> PlaybookResult<WriteCommand> {
        let selector = decl.wallet.as_deref().map(str::trim).unwrap_or_default();
        if selector.is_empty() {
            return Err(playbook_error!(
                PlaybookError::Validation,
                "write commands need an explicit wallet selector"
            ));
        }
        if selector.starts_with(WALLET_SIGIL) {
            return Err(playbook_error!(
                PlaybookError::Validation,
                "wallet selector '{}' must be a name pattern, not a wallet reference",
                selector
            ));
        }
        let matched = wallets.matching(&compile_selector(selector)?);
        let sticky_key = decl.sticky.clone().unwrap_or_else(|| name.to_string());
        let wallet = sticky
            .select(&sticky_key, &matched)
            .attach_printable_lazy(|| format!("selector '{}'", selector))?;

        let instance = match &decl.instance {
            Some(instance_ref) => Some(contracts.bind(instance_ref)?),
            None => None,
        };
        let method = decl.method.clone().filter(|m| !m.trim().is_empty());
        if let (Some(instance), Some(method)) = (instance, &method) {
            let contract = contracts.contract_of(instance)?;
            ensure_method(&contract.abi, method, &contract.name)?;
        }
        let value = decl.value.as_ref().map(|v| v.to_string());
        if let Some(value) = &value {
            check_value_references(value, wallets)?;
        }
        let to = match decl.to.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(to) => Some(parse_recipient(to, wallets)?),
        };
        if instance.is_none() && (value.is_none() || to.is_none()) {
            return Err(playbook_error!(
                PlaybookError::Validation,
                "write command needs a contract instance, or both value and to"
            ));
        }
        Ok(WriteCommand {
            name: name.to_string(),
            description: decl.description.clone(),
            wallet,
            sticky_key,
            method,
            params: resolve_params(name, &decl.params, args, wallets)?,
            instance,
            value,
            to,
        })
    }

    pub fn arg_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.params.iter().flat_map(ParamSlot::arg_indices).collect();
        if let Some(value) = &self.value {
            indices.extend(arg_indices(value));
        }
        if let Some(Recipient::Arg(template)) = &self.to {
            indices.extend(arg_indices(template));
        }
        indices
    }

    pub fn arg_count(&self) -> usize {
        arg_count_of(self.arg_indices())
    }
}

fn parse_recipient(to: &str, wallets: &Wallets) -> PlaybookResult<Recipient> {
    if to.starts_with(WALLET_SIGIL) {
        return match parse_wallet_reference(to)? {
            ParamValue::WalletField(field_ref) if field_ref.field == WalletField::Address => {
                if !wallets.contains_wallet(&field_ref.wallet) {
                    return Err(playbook_error!(
                        PlaybookError::Validation,
                        "field to references unknown wallet '{}'",
                        field_ref.wallet
                    ));
                }
                Ok(Recipient::Wallet(field_ref.wallet))
            }
            _ => Err(playbook_error!(
                PlaybookError::Validation,
                "field to must name a wallet address, got '{}'",
                to
            )),
        };
    }
    if !arg_indices(to).is_empty() {
        return Ok(Recipient::Arg(to.to_string()));
    }
    Address::from_str(to).map(Recipient::Address).map_err(|e| {
        playbook_error!(PlaybookError::Validation, "field to '{}' is not an address: {}", to, e)
    })
}
