use playbook_core::alloy::primitives::U256;
use playbook_core::errors::report_summary;
use playbook_core::executor::{CommandResult, TX_MARKER};
use serde_json::{json, Map, Value as JsonValue};

const ADDRESS_HEX_LEN: usize = 40;
const MAX_QUANTITY_HEX_LEN: usize = 64;

/// One JSON object per result.
pub fn result_line(result: &CommandResult) -> JsonValue {
    let mut line = Map::new();
    line.insert("command".into(), JsonValue::String(result.command.clone()));
    if let Some(wallet) = &result.wallet {
        line.insert("wallet".into(), JsonValue::String(format!("@{}", wallet)));
    }
    if let Some(address) = &result.address {
        line.insert("address".into(), JsonValue::String(format!("{:#x}", address)));
    }
    match &result.result {
        Ok(value) => line.insert("result".into(), prettify(value)),
        Err(e) => line.insert("error".into(), JsonValue::String(report_summary(e))),
    };
    JsonValue::Object(line)
}

pub fn error_line(command: &str, message: &str) -> JsonValue {
    json!({ "command": command, "error": message })
}

pub fn prettify(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(text) => JsonValue::String(prettify_str(text)),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(prettify).collect()),
        JsonValue::Object(entries) => {
            JsonValue::Object(entries.iter().map(|(k, v)| (k.clone(), prettify(v))).collect())
        }
        other => other.clone(),
    }
}

/// Transaction markers become bare hashes, addresses are lowercased and hex
/// quantities of at most 256 bits become decimal.
fn prettify_str(text: &str) -> String {
    if let Some(hash) = text.strip_prefix(TX_MARKER) {
        return hash.to_string();
    }
    let Some(digits) = text.strip_prefix("0x") else {
        return text.to_string();
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return text.to_string();
    }
    if digits.len() == ADDRESS_HEX_LEN {
        return text.to_lowercase();
    }
    // leading zeros mean raw bytes, not a quantity
    if digits.len() > MAX_QUANTITY_HEX_LEN || (digits.len() > 1 && digits.starts_with('0')) {
        return text.to_string();
    }
    match U256::from_str_radix(digits, 16) {
        Ok(quantity) => quantity.to_string(),
        Err(_) => text.to_string(),
    }
}
