use alloy::hex;
use alloy::json_abi::JsonAbi;
use alloy::primitives::Bytes;
use error_stack::Report;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use playbook_core::client::{CompiledContract, Compiler};
use playbook_core::{PlaybookError, PlaybookResult};

pub const DEFAULT_SOLC: &str = "solc";

/// Runs the `solc` binary with `--combined-json bin,abi`.
#[derive(Debug, Clone)]
pub struct SolcCompiler {
    pub path: PathBuf,
}

impl Default for SolcCompiler {
    fn default() -> Self {
        SolcCompiler { path: PathBuf::from(DEFAULT_SOLC) }
    }
}

impl SolcCompiler {
    pub fn new(path: impl Into<PathBuf>) -> SolcCompiler {
        SolcCompiler { path: path.into() }
    }

    fn arguments(source: &Path, optimize_runs: Option<u32>) -> Vec<String> {
        let mut args = vec!["--combined-json".to_string(), "bin,abi".to_string()];
        if let Some(runs) = optimize_runs {
            args.push("--optimize".to_string());
            args.push("--optimize-runs".to_string());
            args.push(runs.to_string());
        }
        args.push(source.display().to_string());
        args
    }
}

impl Compiler for SolcCompiler {
    fn compile(
        &self,
        base_dir: &Path,
        source: &Path,
        optimize_runs: Option<u32>,
    ) -> PlaybookResult<HashMap<String, CompiledContract>> {
        let output = Command::new(&self.path)
            .args(SolcCompiler::arguments(source, optimize_runs))
            .current_dir(base_dir)
            .output()
            .map_err(|e| {
                Report::new(PlaybookError::Compilation)
                    .attach_printable(format!("unable to run {}: {}", self.path.display(), e))
            })?;
        if !output.status.success() {
            return Err(Report::new(PlaybookError::Compilation).attach_printable(format!(
                "{} failed on {}: {}",
                self.path.display(),
                source.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_combined_json(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Deserialize)]
struct CombinedOutput {
    contracts: HashMap<String, CombinedContract>,
}

#[derive(Deserialize)]
struct CombinedContract {
    /// An ABI array, or the same array serialized as a string by older compilers.
    abi: JsonValue,
    #[serde(default)]
    bin: String,
}

/// Contracts in `solc --combined-json` output, keyed by name without the source path.
pub fn parse_combined_json(output: &str) -> PlaybookResult<HashMap<String, CompiledContract>> {
    let combined: CombinedOutput = serde_json::from_str(output).map_err(|e| {
        Report::new(PlaybookError::Compilation)
            .attach_printable(format!("unexpected compiler output: {}", e))
    })?;
    let mut contracts = HashMap::new();
    for (key, contract) in combined.contracts {
        let name = key.rsplit(':').next().unwrap_or(&key).to_string();
        let abi: JsonAbi = match contract.abi {
            JsonValue::String(text) => serde_json::from_str(&text),
            other => serde_json::from_value(other),
        }
        .map_err(|e| {
            Report::new(PlaybookError::Compilation)
                .attach_printable(format!("abi of {} is malformed: {}", name, e))
        })?;
        let bytecode = hex::decode(contract.bin.trim()).map(Bytes::from).map_err(|e| {
            Report::new(PlaybookError::Compilation)
                .attach_printable(format!("bytecode of {} is not hex: {}", name, e))
        })?;
        contracts.insert(name.clone(), CompiledContract { name, abi, bytecode });
    }
    Ok(contracts)
}
