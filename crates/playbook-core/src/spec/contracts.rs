use alloy::json_abi::JsonAbi;
use alloy::primitives::{hex, Address, Bytes};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::client::{CompiledContract, Compiler};
use crate::errors::{PlaybookError, PlaybookErrorExt, PlaybookResult};
use crate::manifest::{ContractSection, InstanceRef};
use crate::playbook_error;
use crate::Context;

pub type InstanceId = usize;

#[derive(Debug, Clone)]
pub struct ContractType {
    /// Key of the CONTRACTS entry.
    pub name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

#[derive(Debug, Clone)]
pub struct ContractInstance {
    pub name: Option<String>,
    pub contract: String,
    pub address: Option<Address>,
    /// Uppercased ERC20 symbol, once discovered.
    pub token_symbol: Option<String>,
}

impl ContractInstance {
    pub fn is_deployed(&self) -> bool {
        self.address.map_or(false, |a| !a.is_zero())
    }

    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("<{}>", self.contract),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Contracts {
    types: IndexMap<String, ContractType>,
    instances: Vec<ContractInstance>,
}

impl Contracts {
    pub fn validate(
        sections: Option<&IndexMap<String, ContractSection>>,
        base_dir: &Path,
        compiler: Option<&dyn Compiler>,
        ctx: &Context,
    ) -> PlaybookResult<Contracts> {
        let mut contracts = Contracts::default();
        let mut compiled: HashMap<(PathBuf, Option<u32>), HashMap<String, CompiledContract>> =
            HashMap::new();
        for (key, section) in sections.into_iter().flatten() {
            let contract_type = load_contract_type(key, section, base_dir, compiler, &mut compiled, ctx)
                .with_site("CONTRACTS", key.clone())?;
            contracts.types.insert(key.clone(), contract_type);
            for decl in section.instances.iter() {
                let address = parse_instance_address(decl.address.as_deref())
                    .with_site("CONTRACTS", key.clone())?;
                if let Some(name) = &decl.name {
                    if contracts.find_by_name(name).is_some() {
                        return Err(playbook_error!(
                            PlaybookError::Validation,
                            "duplicate contract instance name '{}'",
                            name
                        ))
                        .with_site("CONTRACTS", key.clone());
                    }
                }
                contracts.instances.push(ContractInstance {
                    name: decl.name.clone(),
                    contract: key.clone(),
                    address,
                    token_symbol: None,
                });
            }
        }
        Ok(contracts)
    }

    pub fn contract_type(&self, name: &str) -> Option<&ContractType> {
        self.types.get(name)
    }

    pub fn instance(&self, id: InstanceId) -> &ContractInstance {
        &self.instances[id]
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> &mut ContractInstance {
        &mut self.instances[id]
    }

    pub fn instance_ids(&self) -> std::ops::Range<InstanceId> {
        0..self.instances.len()
    }

    /// ABI and bytecode of the contract an instance is bound to.
    pub fn contract_of(&self, id: InstanceId) -> PlaybookResult<&ContractType> {
        let instance = self.instance(id);
        self.types.get(&instance.contract).ok_or_else(|| {
            playbook_error!(
                PlaybookError::Validation,
                "instance {} references unknown contract '{}'",
                instance.label(),
                instance.contract
            )
        })
    }

    pub fn find_by_name(&self, name: &str) -> Option<InstanceId> {
        self.instances.iter().position(|i| i.name.as_deref() == Some(name))
    }

    pub fn find_by_token_symbol(&self, symbol: &str) -> Option<InstanceId> {
        self.instances.iter().position(|i| {
            i.token_symbol.as_deref().map_or(false, |s| s.eq_ignore_ascii_case(symbol))
        })
    }

    /// Resolves a command's `instance` setting. Inline instances are registered anonymously.
    pub fn bind(&mut self, instance: &InstanceRef) -> PlaybookResult<InstanceId> {
        match instance {
            InstanceRef::Named(name) => self.find_by_name(name).ok_or_else(|| {
                playbook_error!(PlaybookError::Validation, "unknown contract instance '{}'", name)
            }),
            InstanceRef::Inline(inline) => {
                if !self.types.contains_key(&inline.contract) {
                    return Err(playbook_error!(
                        PlaybookError::Validation,
                        "instance references unknown contract '{}'",
                        inline.contract
                    ));
                }
                let address = parse_instance_address(inline.address.as_deref())?;
                self.instances.push(ContractInstance {
                    name: None,
                    contract: inline.contract.clone(),
                    address,
                    token_symbol: None,
                });
                Ok(self.instances.len() - 1)
            }
        }
    }
}

fn parse_instance_address(address: Option<&str>) -> PlaybookResult<Option<Address>> {
    match address.map(str::trim) {
        None | Some("") => Ok(None),
        Some(address) => Address::from_str(address).map(Some).map_err(|e| {
            playbook_error!(PlaybookError::Validation, "instance address '{}' is not valid: {}", address, e)
        }),
    }
}

fn load_contract_type(
    key: &str,
    section: &ContractSection,
    base_dir: &Path,
    compiler: Option<&dyn Compiler>,
    compiled: &mut HashMap<(PathBuf, Option<u32>), HashMap<String, CompiledContract>>,
    ctx: &Context,
) -> PlaybookResult<ContractType> {
    let source_name = section.name.clone().unwrap_or_else(|| key.to_string());
    match (&section.sol, &section.artifact) {
        (Some(_), Some(_)) => Err(playbook_error!(
            PlaybookError::Validation,
            "contract sets both sol and artifact"
        )),
        (None, None) => Err(playbook_error!(
            PlaybookError::Validation,
            "contract needs either a sol source or an artifact"
        )),
        (None, Some(artifact)) => {
            let path = base_dir.join(artifact);
            let (abi, bytecode) = load_artifact(&path)?;
            Ok(ContractType { name: key.to_string(), abi, bytecode })
        }
        (Some(sol), None) => {
            let Some(compiler) = compiler else {
                return Err(playbook_error!(
                    PlaybookError::Compilation,
                    "no Solidity compiler available to build {}",
                    sol
                ));
            };
            let cache_key = (PathBuf::from(sol), section.optimize);
            if !compiled.contains_key(&cache_key) {
                ctx.try_log(|logger| info!(logger, "compiling {}", sol));
                let output = compiler.compile(base_dir, Path::new(sol), section.optimize)?;
                compiled.insert(cache_key.clone(), output);
            }
            let contract = compiled
                .get(&cache_key)
                .and_then(|output| output.get(&source_name))
                .ok_or_else(|| {
                    playbook_error!(
                        PlaybookError::Compilation,
                        "contract {} not found in compiled output of {}",
                        source_name,
                        sol
                    )
                })?;
            Ok(ContractType {
                name: key.to_string(),
                abi: contract.abi.clone(),
                bytecode: contract.bytecode.clone(),
            })
        }
    }
}

#[derive(Deserialize)]
struct Artifact {
    abi: JsonAbi,
    #[serde(default)]
    bytecode: Option<ArtifactBytecode>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ArtifactBytecode {
    Hex(String),
    Object { object: String },
}

/// Loads a Foundry or Hardhat artifact: `abi` plus `bytecode` as a string or `{object}`.
pub fn load_artifact(path: &Path) -> PlaybookResult<(JsonAbi, Bytes)> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        playbook_error!(PlaybookError::Compilation, "unable to read artifact {}: {}", path.display(), e)
    })?;
    let artifact: Artifact = serde_json::from_str(&data).map_err(|e| {
        playbook_error!(PlaybookError::Compilation, "artifact {} has wrong format: {}", path.display(), e)
    })?;
    let bytecode = match artifact.bytecode {
        None => Bytes::new(),
        Some(ArtifactBytecode::Hex(code)) | Some(ArtifactBytecode::Object { object: code }) => {
            hex::decode(code.trim()).map(Bytes::from).map_err(|e| {
                playbook_error!(
                    PlaybookError::Compilation,
                    "artifact {} bytecode is not hex: {}",
                    path.display(),
                    e
                )
            })?
        }
    };
    Ok((artifact.abi, bytecode))
}
