use alloy::primitives::U256;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{PlaybookError, PlaybookResult};
use crate::manifest::{ConfigSection, Scalar};
use crate::playbook_error;

pub const DEFAULT_GAS_PRICE: u128 = 8_000_000_000;
pub const DEFAULT_GAS_LIMIT: u64 = 10_000_000;
pub const DEFAULT_CHAIN_ID: u64 = 1;
pub const DEFAULT_AWAIT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Floor for the gas price, in wei. The node suggestion wins when higher.
    pub gas_price: u128,
    /// Hard cap applied to every gas estimate.
    pub gas_limit: u64,
    pub chain_id: u64,
    pub await_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gas_price: DEFAULT_GAS_PRICE,
            gas_limit: DEFAULT_GAS_LIMIT,
            chain_id: DEFAULT_CHAIN_ID,
            await_timeout: DEFAULT_AWAIT_TIMEOUT,
        }
    }
}

impl Config {
    pub fn from_section(section: Option<&ConfigSection>) -> PlaybookResult<Config> {
        let mut config = Config::default();
        let Some(section) = section else {
            return Ok(config);
        };
        if let Some(gas_price) = &section.gas_price {
            let value = parse_quantity("gasPrice", gas_price)?;
            config.gas_price = u128::try_from(value).map_err(|_| {
                playbook_error!(PlaybookError::Validation, "gasPrice {} is too large", value)
            })?;
        }
        if let Some(gas_limit) = &section.gas_limit {
            let value = parse_quantity("gasLimit", gas_limit)?;
            config.gas_limit = u64::try_from(value).map_err(|_| {
                playbook_error!(PlaybookError::Validation, "gasLimit {} is too large", value)
            })?;
            if config.gas_limit == 0 {
                return Err(playbook_error!(PlaybookError::Validation, "gasLimit must be positive"));
            }
        }
        if let Some(chain_id) = &section.chain_id {
            let value = parse_quantity("chainID", chain_id)?;
            config.chain_id = u64::try_from(value).map_err(|_| {
                playbook_error!(PlaybookError::Validation, "chainID {} is too large", value)
            })?;
        }
        if let Some(timeout) = &section.await_timeout {
            config.await_timeout = humantime::parse_duration(timeout).map_err(|e| {
                playbook_error!(
                    PlaybookError::Validation,
                    "awaitTimeout '{}' is not a duration: {}",
                    timeout,
                    e
                )
            })?;
        }
        Ok(config)
    }
}

fn parse_quantity(field: &str, value: &Scalar) -> PlaybookResult<U256> {
    let text = value.to_string();
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str(&text),
    };
    parsed.map_err(|e| {
        playbook_error!(PlaybookError::Validation, "{} '{}' is not a quantity: {}", field, text, e)
    })
}
