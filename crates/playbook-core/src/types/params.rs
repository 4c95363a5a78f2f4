//! Parameter grammar: turns declared parameters into typed values, or into
//! references that can only be resolved once a command actually runs.

use alloy::primitives::{hex, Address};
use error_stack::{Report, ResultExt};
use num::BigInt;
use regex::{Captures, Regex};
use std::fmt;
use std::str::FromStr;

use super::{ParamType, Value};
use crate::errors::{PlaybookError, PlaybookResult};
use crate::eval::{evaluate, ExprKind};
use crate::manifest::{ParamDecl, TypedParamDecl};
use crate::playbook_error;

pub const WALLET_SIGIL: char = '@';

lazy_static! {
    static ref ARG_TOKEN: Regex = Regex::new(r"\$(\d+)").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletField {
    Address,
    Balance,
    Keystore,
    Keyfile,
}

impl FromStr for WalletField {
    type Err = Report<PlaybookError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "address" => Ok(WalletField::Address),
            "balance" => Ok(WalletField::Balance),
            "keystore" => Ok(WalletField::Keystore),
            "keyfile" => Ok(WalletField::Keyfile),
            other => Err(playbook_error!(
                PlaybookError::Validation,
                "unknown wallet field '{}' (expected address, balance, keystore or keyfile)",
                other
            )),
        }
    }
}

impl fmt::Display for WalletField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletField::Address => write!(f, "address"),
            WalletField::Balance => write!(f, "balance"),
            WalletField::Keystore => write!(f, "keystore"),
            WalletField::Keyfile => write!(f, "keyfile"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletFieldRef {
    pub wallet: String,
    pub field: WalletField,
}

/// A reference template such as `"$0 * 1e18"`, parsed as `ty` once the
/// argument tokens are substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgRef {
    pub template: String,
    pub ty: ParamType,
    pub indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Literal(Value),
    WalletField(WalletFieldRef),
    Arg(ArgRef),
    /// Stands for the address of whichever wallet sends the command.
    PlaceholderAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    SenderUnknown,
    WalletState,
    MissingArgument { index: usize, supplied: usize },
    /// The supplied arguments do not parse as the declared type.
    ArgumentMismatch,
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferReason::SenderUnknown => write!(f, "sender is only known at execution"),
            DeferReason::WalletState => write!(f, "wallet field is read at execution"),
            DeferReason::MissingArgument { index, supplied } => {
                write!(f, "argument ${} not supplied ({} given)", index, supplied)
            }
            DeferReason::ArgumentMismatch => write!(f, "arguments do not fit this parameter"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(Value),
    Deferred { param: ParamValue, reason: DeferReason },
}

impl Resolution {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Resolution::Deferred { .. })
    }
}

/// Read access to wallets for reference resolution.
pub trait WalletDirectory {
    fn contains_wallet(&self, name: &str) -> bool;

    /// Current value of a wallet field, `None` when unknown (e.g. a balance not fetched yet).
    fn wallet_field(&self, name: &str, field: WalletField) -> Option<Value>;
}

pub struct ResolutionContext<'a> {
    pub command: &'a str,
    pub args: &'a [String],
    pub wallets: &'a dyn WalletDirectory,
}

/// Everything needed to finish resolving a parameter right before the network call.
pub struct InvocationScope<'a> {
    pub args: &'a [String],
    pub sender: Option<Address>,
    pub wallets: &'a dyn WalletDirectory,
}

/// A declared parameter together with its validation-time resolution.
#[derive(Debug, Clone)]
pub struct ParamSlot {
    pub decl: ParamDecl,
    pub resolution: Resolution,
}

impl ParamSlot {
    /// Indices of every `$N` token the declaration references.
    pub fn arg_indices(&self) -> Vec<usize> {
        match &self.decl {
            ParamDecl::Typed(TypedParamDecl { reference: Some(reference), .. }) => {
                arg_indices(reference)
            }
            _ => vec![],
        }
    }

    /// Produces the concrete value for one invocation.
    pub fn finalize(&self, command: &str, scope: &InvocationScope<'_>) -> PlaybookResult<Value> {
        let resolution = if self.arg_indices().is_empty() {
            self.resolution.clone()
        } else {
            // argument-dependent values are rebuilt from the declaration, since
            // a target step can supply different arguments than the command line
            let ctx = ResolutionContext { command, args: scope.args, wallets: scope.wallets };
            resolve_param(&self.decl, &ctx).change_context(PlaybookError::Resolution)?
        };
        match resolution {
            Resolution::Resolved(value) => Ok(value),
            Resolution::Deferred { param, .. } => resolve_deferred(&param, scope),
        }
    }
}

pub fn arg_indices(text: &str) -> Vec<usize> {
    ARG_TOKEN
        .captures_iter(text)
        .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse::<usize>().ok()))
        .collect()
}

/// Replaces every `$N` token with the matching argument.
///
/// Returns the first index with no argument as the error.
pub fn substitute_args(text: &str, args: &[String]) -> Result<String, usize> {
    let mut missing = None;
    let substituted = ARG_TOKEN.replace_all(text, |caps: &Captures| {
        let index = caps[1].parse::<usize>().unwrap_or(usize::MAX);
        match args.get(index) {
            Some(arg) => arg.clone(),
            None => {
                missing.get_or_insert(index);
                String::new()
            }
        }
    });
    match missing {
        Some(index) => Err(index),
        None => Ok(substituted.into_owned()),
    }
}

/// Resolves one declared parameter during validation.
pub fn resolve_param(decl: &ParamDecl, ctx: &ResolutionContext<'_>) -> PlaybookResult<Resolution> {
    let typed = match decl {
        ParamDecl::Plain(scalar) => return Ok(Resolution::Resolved(Value::String(scalar.to_string()))),
        ParamDecl::Typed(typed) => typed,
    };
    let ty = typed.ty.as_deref().unwrap_or_default().parse::<ParamType>()?;
    match (&typed.value, &typed.reference) {
        (Some(_), Some(_)) => Err(playbook_error!(
            PlaybookError::Validation,
            "param of command '{}' sets both value and reference",
            ctx.command
        )),
        (None, None) => Err(playbook_error!(
            PlaybookError::Validation,
            "param of command '{}' needs a value or a reference",
            ctx.command
        )),
        (Some(value), None) => {
            let raw = value.to_string();
            if ty == ParamType::Address && raw.starts_with(WALLET_SIGIL) {
                return resolve_wallet_reference(&raw, ctx);
            }
            parse_param(ty, &raw)
                .change_context(PlaybookError::Validation)
                .attach_printable_lazy(|| format!("in command '{}'", ctx.command))
                .map(Resolution::Resolved)
        }
        (None, Some(reference)) => resolve_reference(ty, reference, ctx),
    }
}

fn resolve_reference(
    ty: ParamType,
    reference: &str,
    ctx: &ResolutionContext<'_>,
) -> PlaybookResult<Resolution> {
    let reference = reference.trim();
    if reference.starts_with(WALLET_SIGIL) {
        return resolve_wallet_reference(reference, ctx);
    }
    let indices = arg_indices(reference);
    if indices.is_empty() {
        return Err(playbook_error!(
            PlaybookError::Validation,
            "reference '{}' in command '{}' names neither a wallet (@name) nor an argument ($N)",
            reference,
            ctx.command
        ));
    }
    let deferred = |reason| Resolution::Deferred {
        param: ParamValue::Arg(ArgRef { template: reference.to_string(), ty, indices: indices.clone() }),
        reason,
    };
    match substitute_args(reference, ctx.args) {
        Ok(text) => {
            let resolved = if ty == ParamType::Address && text.starts_with(WALLET_SIGIL) {
                resolve_wallet_reference(&text, ctx)
            } else {
                parse_param(ty, &text).map(Resolution::Resolved)
            };
            // the arguments may belong to another command; a real mismatch
            // surfaces when this one runs
            Ok(resolved.unwrap_or_else(|_| deferred(DeferReason::ArgumentMismatch)))
        }
        Err(index) => Ok(deferred(DeferReason::MissingArgument { index, supplied: ctx.args.len() })),
    }
}

fn resolve_wallet_reference(
    reference: &str,
    ctx: &ResolutionContext<'_>,
) -> PlaybookResult<Resolution> {
    let param = parse_wallet_reference(reference)?;
    if let ParamValue::WalletField(field_ref) = &param {
        if !ctx.wallets.contains_wallet(&field_ref.wallet) {
            return Err(playbook_error!(
                PlaybookError::Validation,
                "field {} of command '{}' references unknown wallet '{}'",
                field_ref.field,
                ctx.command,
                field_ref.wallet
            ));
        }
    }
    let reason = match param {
        ParamValue::PlaceholderAddress => DeferReason::SenderUnknown,
        _ => DeferReason::WalletState,
    };
    Ok(Resolution::Deferred { param, reason })
}

/// Parses `@`, `@@`, `@name` or `@name.field`.
pub fn parse_wallet_reference(reference: &str) -> PlaybookResult<ParamValue> {
    let Some(body) = reference.strip_prefix(WALLET_SIGIL) else {
        return Err(playbook_error!(
            PlaybookError::Validation,
            "'{}' is not a wallet reference",
            reference
        ));
    };
    if body.is_empty() || body == "@" {
        return Ok(ParamValue::PlaceholderAddress);
    }
    let (wallet, field) = match body.split_once('.') {
        Some((wallet, field)) => (wallet, field.parse::<WalletField>()?),
        None => (body, WalletField::Address),
    };
    if wallet.is_empty() {
        return Err(playbook_error!(
            PlaybookError::Validation,
            "wallet reference '{}' has no wallet name",
            reference
        ));
    }
    Ok(ParamValue::WalletField(WalletFieldRef { wallet: wallet.to_string(), field }))
}

/// Second resolution pass for values that could not be resolved during validation.
pub fn resolve_deferred(param: &ParamValue, scope: &InvocationScope<'_>) -> PlaybookResult<Value> {
    match param {
        ParamValue::Literal(value) => Ok(value.clone()),
        ParamValue::PlaceholderAddress => scope.sender.map(Value::Address).ok_or_else(|| {
            playbook_error!(
                PlaybookError::Resolution,
                "wallet placeholder used but the command has no sending wallet"
            )
        }),
        ParamValue::WalletField(field_ref) => scope
            .wallets
            .wallet_field(&field_ref.wallet, field_ref.field)
            .ok_or_else(|| {
                playbook_error!(
                    PlaybookError::Resolution,
                    "{} of wallet '{}' is not available",
                    field_ref.field,
                    field_ref.wallet
                )
            }),
        ParamValue::Arg(arg_ref) => {
            let text = substitute_args(&arg_ref.template, scope.args).map_err(|index| {
                playbook_error!(
                    PlaybookError::Resolution,
                    "insufficient arguments: '{}' needs ${} but {} were supplied",
                    arg_ref.template,
                    index,
                    scope.args.len()
                )
            })?;
            if arg_ref.ty == ParamType::Address && text.starts_with(WALLET_SIGIL) {
                let param = parse_wallet_reference(&text).change_context(PlaybookError::Resolution)?;
                return resolve_deferred(&param, scope);
            }
            parse_param(arg_ref.ty, &text)
        }
    }
}

/// Parses a raw string as a value of type `ty`.
pub fn parse_param(ty: ParamType, raw: &str) -> PlaybookResult<Value> {
    match ty {
        ParamType::String => Ok(Value::String(raw.to_string())),
        ParamType::Address => Address::from_str(raw.trim()).map(Value::Address).map_err(|e| {
            playbook_error!(PlaybookError::Resolution, "'{}' is not a valid address: {}", raw, e)
        }),
        ParamType::Bytes => parse_bytes(raw).map(Value::Bytes),
        ParamType::Bool => {
            let value = evaluate(raw, &[ExprKind::Boolean])
                .change_context(PlaybookError::Resolution)
                .attach_printable_lazy(|| format!("'{}' is not a valid bool", raw))?;
            Ok(Value::Bool(value.as_bool().unwrap_or_default()))
        }
        ParamType::Byte => {
            let value = parse_integer(raw, ty)?;
            let byte = u8::try_from(&value).map_err(|_| {
                playbook_error!(PlaybookError::Resolution, "{} does not fit in a byte", value)
            })?;
            Ok(Value::Byte(byte))
        }
        ParamType::Int(int) => {
            let value = parse_integer(raw, ty)?;
            if !int.accepts(&value) {
                return Err(playbook_error!(
                    PlaybookError::Resolution,
                    "value {} does not fit declared type {}",
                    value,
                    int
                ));
            }
            Ok(Value::Int { value, ty: int })
        }
    }
}

fn parse_integer(raw: &str, ty: ParamType) -> PlaybookResult<BigInt> {
    evaluate(raw, &[ExprKind::Integer])
        .change_context(PlaybookError::Resolution)
        .attach_printable_lazy(|| format!("'{}' is not a valid {}", raw, ty))?
        .into_integer()
        .ok_or_else(|| playbook_error!(PlaybookError::Resolution, "'{}' is not an integer", raw))
}

fn parse_bytes(raw: &str) -> PlaybookResult<Vec<u8>> {
    if raw.starts_with("0x") || raw.starts_with("0X") {
        hex::decode(&raw[2..]).map_err(|e| {
            playbook_error!(PlaybookError::Resolution, "'{}' is not valid hex: {}", raw, e)
        })
    } else {
        Ok(raw.as_bytes().to_vec())
    }
}
