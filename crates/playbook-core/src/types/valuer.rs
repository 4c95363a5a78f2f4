use alloy::primitives::U256;
use error_stack::ResultExt;
use num::BigInt;
use regex::{Captures, Regex};

use super::params::{substitute_args, WalletDirectory, WalletField};
use super::{bigint_to_u256, Value};
use crate::errors::{PlaybookError, PlaybookResult};
use crate::eval::{evaluate, is_math_expr, ExprKind};
use crate::playbook_error;

pub const COMMON_DENOMINATIONS: [&str; 4] = ["wei", "gwei", "ether", "eth"];

lazy_static! {
    static ref WALLET_TOKEN: Regex =
        Regex::new(r"@([A-Za-z0-9_\-]+)(?:\.([A-Za-z]+))?").unwrap();
    static ref GWEI: BigInt = BigInt::from(1_000_000_000u64);
    static ref ETHER: BigInt = BigInt::from(1_000_000_000_000_000_000u64);
}

/// A monetary amount and the unit it was written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Amount {
    /// Wei for common denominations, raw token units for token symbols.
    pub value: U256,
    pub denomination: Option<String>,
}

impl Amount {
    pub fn is_token_denominated(&self) -> bool {
        self.denomination.as_deref().map_or(false, |d| !is_common_denomination(d))
    }
}

pub fn is_common_denomination(denomination: &str) -> bool {
    COMMON_DENOMINATIONS.contains(&denomination)
}

/// Wallets whose balance a value expression reads.
pub fn balance_references(expression: &str) -> Vec<String> {
    WALLET_TOKEN
        .captures_iter(expression)
        .filter(|c| c.get(2).map(|m| m.as_str()) == Some("balance"))
        .map(|c| c[1].to_string())
        .collect()
}

/// Checks the wallet references of a value expression without evaluating it.
pub fn check_value_references(expression: &str, wallets: &dyn WalletDirectory) -> PlaybookResult<()> {
    for caps in WALLET_TOKEN.captures_iter(expression) {
        let field = caps.get(2).map(|m| m.as_str()).unwrap_or("address");
        if field != "balance" {
            return Err(playbook_error!(
                PlaybookError::Validation,
                "illegal wallet field in value '{}': {} (only balance is allowed)",
                expression,
                field
            ));
        }
        if !wallets.contains_wallet(&caps[1]) {
            return Err(playbook_error!(
                PlaybookError::Validation,
                "value '{}' references unknown wallet '{}'",
                expression,
                &caps[1]
            ));
        }
    }
    Ok(())
}

/// Parses a value expression such as `"5 * 1e8 gwei"`, `"@alice.balance / 2"` or `"$0 usdt"`.
///
/// `token_symbols` extends the common denominations and must be lowercase.
pub fn parse_value(
    expression: &str,
    token_symbols: &[String],
    args: &[String],
    wallets: &dyn WalletDirectory,
) -> PlaybookResult<Amount> {
    parse_value_inner(expression, token_symbols, args, wallets)
        .attach_printable_lazy(|| format!("unable to parse value '{}'", expression))
}

fn parse_value_inner(
    expression: &str,
    token_symbols: &[String],
    args: &[String],
    wallets: &dyn WalletDirectory,
) -> PlaybookResult<Amount> {
    let mut failure = None;
    let with_balances = WALLET_TOKEN.replace_all(expression, |caps: &Captures| {
        if failure.is_some() {
            return String::new();
        }
        match wallet_balance(&caps[1], caps.get(2).map(|m| m.as_str()), wallets) {
            Ok(balance) => balance,
            Err(e) => {
                failure = Some(e);
                String::new()
            }
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    let substituted = substitute_args(&with_balances, args).map_err(|index| {
        playbook_error!(
            PlaybookError::Resolution,
            "insufficient arguments: ${} referenced but {} supplied",
            index,
            args.len()
        )
    })?;

    let lowered = substituted.trim().to_lowercase();
    let mut denominations: Vec<&str> = COMMON_DENOMINATIONS.to_vec();
    denominations.extend(token_symbols.iter().map(String::as_str));
    // longest first so "gwei" wins over "wei"
    denominations.sort_by_key(|d| std::cmp::Reverse(d.len()));

    let mut amount_expr = lowered.as_str();
    let mut denomination = None;
    for candidate in denominations {
        if candidate.is_empty() {
            continue;
        }
        if let Some(rest) = lowered.strip_suffix(candidate) {
            if is_math_expr(rest) {
                amount_expr = rest;
                denomination = Some(candidate.to_string());
                break;
            }
        }
    }
    let amount_expr = amount_expr.trim();
    if !is_math_expr(amount_expr) {
        return Err(playbook_error!(
            PlaybookError::Resolution,
            "'{}' is not an arithmetic expression",
            amount_expr
        ));
    }
    let value = evaluate(amount_expr, &[ExprKind::Integer])
        .change_context(PlaybookError::Resolution)?
        .into_integer()
        .ok_or_else(|| playbook_error!(PlaybookError::Resolution, "value is not an integer"))?;
    let value = match &denomination {
        Some(denomination) => denominate(value, denomination),
        None => value,
    };
    Ok(Amount { value: bigint_to_u256(&value)?, denomination })
}

fn wallet_balance(
    wallet: &str,
    field: Option<&str>,
    wallets: &dyn WalletDirectory,
) -> PlaybookResult<String> {
    let field = field.unwrap_or("address");
    if field != "balance" {
        return Err(playbook_error!(
            PlaybookError::Resolution,
            "illegal wallet field in value: {} (only balance is allowed)",
            field
        ));
    }
    if !wallets.contains_wallet(wallet) {
        return Err(playbook_error!(PlaybookError::Resolution, "unknown wallet '{}'", wallet));
    }
    match wallets.wallet_field(wallet, WalletField::Balance) {
        Some(Value::Int { value, .. }) => Ok(value.to_string()),
        _ => Err(playbook_error!(
            PlaybookError::Resolution,
            "balance of wallet '{}' is not known yet",
            wallet
        )),
    }
}

/// Converts an amount written in `denomination` to wei. Token symbols are left untouched.
pub fn denominate(value: BigInt, denomination: &str) -> BigInt {
    match denomination {
        "gwei" => value * &*GWEI,
        "ether" => value * &*ETHER,
        _ => value,
    }
}
