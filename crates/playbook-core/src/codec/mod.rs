//! Conversion between playbook values and Solidity ABI values.

use alloy::dyn_abi::{DynSolType, DynSolValue, FunctionExt, JsonAbiExt, Specifier};
use alloy::json_abi::{Function, JsonAbi, Param};
use alloy::primitives::{hex, B256, U256};
use error_stack::{Report, ResultExt};
use serde_json::Value as JsonValue;

use crate::errors::{PlaybookError, PlaybookResult};
use crate::playbook_error;
use crate::types::{bigint_to_i256, bigint_to_u256, Value};

/// Upper bound on output slots tried when a method's return shape is unknown.
pub const GENERIC_OUTPUT_SLOTS: usize = 32;

pub fn value_to_sol(value: &Value, param: &Param) -> PlaybookResult<DynSolValue> {
    let ty = param.resolve().map_err(|e| {
        playbook_error!(PlaybookError::Codec, "unsupported ABI type {}: {}", param.ty, e)
    })?;
    value_to_sol_type(value, &ty)
        .attach_printable_lazy(|| format!("encoding {} as {} ({})", value, param.ty, param.name))
}

fn value_to_sol_type(value: &Value, ty: &DynSolType) -> PlaybookResult<DynSolValue> {
    let sol = match (value, ty) {
        (Value::Address(address), DynSolType::Address) => DynSolValue::Address(*address),
        (Value::Bool(b), DynSolType::Bool) => DynSolValue::Bool(*b),
        (Value::Int { value, .. }, DynSolType::Uint(bits)) => {
            DynSolValue::Uint(bigint_to_u256(value).change_context(PlaybookError::Codec)?, *bits)
        }
        (Value::Int { value, .. }, DynSolType::Int(bits)) => {
            DynSolValue::Int(bigint_to_i256(value).change_context(PlaybookError::Codec)?, *bits)
        }
        (Value::Byte(b), DynSolType::Uint(bits)) => DynSolValue::Uint(U256::from(*b), *bits),
        (Value::Byte(b), DynSolType::FixedBytes(size)) => fixed_bytes(&[*b], *size)?,
        (Value::Bytes(bytes), DynSolType::Bytes) => DynSolValue::Bytes(bytes.clone()),
        (Value::Bytes(bytes), DynSolType::FixedBytes(size)) => fixed_bytes(bytes, *size)?,
        (Value::String(s), DynSolType::String) => DynSolValue::String(s.clone()),
        (other, ty) => ty.coerce_str(&other.to_string()).map_err(|e| {
            playbook_error!(PlaybookError::Codec, "cannot convert '{}' to {}: {}", other, ty, e)
        })?,
    };
    if !ty.matches(&sol) {
        return Err(playbook_error!(PlaybookError::Codec, "'{}' does not match ABI type {}", value, ty));
    }
    Ok(sol)
}

fn fixed_bytes(bytes: &[u8], size: usize) -> PlaybookResult<DynSolValue> {
    if bytes.len() > size {
        return Err(playbook_error!(
            PlaybookError::Codec,
            "{} bytes do not fit bytes{}",
            bytes.len(),
            size
        ));
    }
    let mut word = B256::ZERO;
    word[..bytes.len()].copy_from_slice(bytes);
    Ok(DynSolValue::FixedBytes(word, size))
}

fn values_to_sol(values: &[Value], params: &[Param]) -> PlaybookResult<Vec<DynSolValue>> {
    values
        .iter()
        .zip(params.iter())
        .enumerate()
        .map(|(i, (value, param))| {
            value_to_sol(value, param).attach_printable_lazy(|| format!("parameter #{}", i))
        })
        .collect()
}

/// Picks the overload of `method` taking `arity` inputs.
pub fn find_function<'a>(abi: &'a JsonAbi, method: &str, arity: usize) -> PlaybookResult<&'a Function> {
    let overloads = abi.function(method).ok_or_else(|| {
        playbook_error!(PlaybookError::Codec, "function '{}' not found in ABI", method)
    })?;
    overloads.iter().find(|f| f.inputs.len() == arity).ok_or_else(|| {
        let arities = overloads.iter().map(|f| f.inputs.len().to_string()).collect::<Vec<_>>();
        playbook_error!(
            PlaybookError::Codec,
            "function '{}' expects {} arguments, got {}",
            method,
            arities.join(" or "),
            arity
        )
    })
}

/// Selector plus encoded arguments.
pub fn encode_function_call(function: &Function, values: &[Value]) -> PlaybookResult<Vec<u8>> {
    let args = values_to_sol(values, &function.inputs)
        .attach_printable_lazy(|| format!("encoding arguments of '{}'", function.name))?;
    function.abi_encode_input(&args).map_err(|e| {
        playbook_error!(PlaybookError::Codec, "failed to encode call to '{}': {}", function.name, e)
    })
}

/// Creation code: bytecode followed by the encoded constructor arguments.
pub fn encode_deployment(abi: &JsonAbi, bytecode: &[u8], values: &[Value]) -> PlaybookResult<Vec<u8>> {
    let mut data = bytecode.to_vec();
    match &abi.constructor {
        Some(constructor) => {
            if constructor.inputs.len() != values.len() {
                return Err(playbook_error!(
                    PlaybookError::Codec,
                    "constructor expects {} arguments, got {}",
                    constructor.inputs.len(),
                    values.len()
                ));
            }
            let args = values_to_sol(values, &constructor.inputs)
                .attach_printable("encoding constructor arguments")?;
            let encoded = constructor.abi_encode_input(&args).map_err(|e| {
                playbook_error!(PlaybookError::Codec, "failed to encode constructor: {}", e)
            })?;
            data.extend_from_slice(&encoded);
        }
        None if !values.is_empty() => {
            return Err(playbook_error!(
                PlaybookError::Codec,
                "contract has no constructor but {} arguments were given",
                values.len()
            ))
        }
        None => {}
    }
    Ok(data)
}

/// Decodes a call result. A single output is returned as a scalar, several as an array.
///
/// When the declared outputs do not fit the returned data, the data is read
/// as up to [`GENERIC_OUTPUT_SLOTS`] uint256 words instead.
pub fn decode_outputs(function: &Function, data: &[u8]) -> PlaybookResult<JsonValue> {
    match function.abi_decode_output(data) {
        Ok(mut values) => {
            if values.len() == 1 {
                Ok(sol_to_json(&values.remove(0)))
            } else {
                Ok(JsonValue::Array(values.iter().map(sol_to_json).collect()))
            }
        }
        Err(e) if function.outputs.len() > 1 || data.len() > 32 => {
            decode_generic_words(data).ok_or_else(|| {
                Report::new(PlaybookError::Codec)
                    .attach_printable(format!("failed to decode output of '{}': {}", function.name, e))
            })
        }
        Err(e) => Err(playbook_error!(
            PlaybookError::Codec,
            "failed to decode output of '{}': {}",
            function.name,
            e
        )),
    }
}

fn decode_generic_words(data: &[u8]) -> Option<JsonValue> {
    if data.is_empty() {
        return None;
    }
    let mut slots: Vec<Option<U256>> = data
        .chunks(32)
        .take(GENERIC_OUTPUT_SLOTS)
        .map(|chunk| (chunk.len() == 32).then(|| U256::from_be_slice(chunk)))
        .collect();
    while matches!(slots.last(), Some(None)) {
        slots.pop();
    }
    if slots.is_empty() {
        return None;
    }
    Some(JsonValue::Array(
        slots
            .into_iter()
            .map(|slot| slot.map_or(JsonValue::Null, |word| JsonValue::String(word.to_string())))
            .collect(),
    ))
}

pub fn sol_to_json(value: &DynSolValue) -> JsonValue {
    match value {
        DynSolValue::Bool(b) => JsonValue::Bool(*b),
        DynSolValue::Int(i, _) => JsonValue::String(i.to_string()),
        DynSolValue::Uint(u, _) => JsonValue::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => JsonValue::String(hex::encode_prefixed(&word[..*size])),
        DynSolValue::Address(address) => JsonValue::String(format!("{:#x}", address)),
        DynSolValue::Function(function) => JsonValue::String(hex::encode_prefixed(function.as_slice())),
        DynSolValue::Bytes(bytes) => JsonValue::String(hex::encode_prefixed(bytes)),
        DynSolValue::String(s) => JsonValue::String(s.clone()),
        DynSolValue::Array(values) | DynSolValue::FixedArray(values) | DynSolValue::Tuple(values) => {
            JsonValue::Array(values.iter().map(sol_to_json).collect())
        }
    }
}
