//! Serde binding of the playbook YAML file. Nothing here is validated yet,
//! see [`crate::spec`] for that.

use error_stack::Report;
use indexmap::IndexMap;
use std::fmt;
use std::path::Path;

use crate::errors::{PlaybookError, PlaybookResult};
use crate::playbook_error;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaybookFile {
    #[serde(rename = "CONFIG", default)]
    pub config: Option<ConfigSection>,
    #[serde(rename = "INVENTORY", default)]
    pub inventory: Option<IndexMap<String, Vec<String>>>,
    #[serde(rename = "WALLETS", default)]
    pub wallets: Option<IndexMap<String, WalletSection>>,
    #[serde(rename = "CONTRACTS", default)]
    pub contracts: Option<IndexMap<String, ContractSection>>,
    #[serde(rename = "TARGETS", default)]
    pub targets: Option<IndexMap<String, Vec<TargetStepDecl>>>,
    #[serde(rename = "CALL", default)]
    pub call: Option<IndexMap<String, CallDecl>>,
    #[serde(rename = "READ", alias = "VIEW", default)]
    pub read: Option<IndexMap<String, ReadDecl>>,
    #[serde(rename = "WRITE", default)]
    pub write: Option<IndexMap<String, WriteDecl>>,
}

impl PlaybookFile {
    pub fn from_yaml(source: &str) -> PlaybookResult<PlaybookFile> {
        serde_yml::from_str(source).map_err(|e| {
            Report::new(PlaybookError::Validation)
                .attach_printable(format!("unable to parse playbook: {}", e))
        })
    }

    pub fn from_path(path: &Path) -> PlaybookResult<PlaybookFile> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            playbook_error!(
                PlaybookError::Validation,
                "unable to read playbook {}: {}",
                path.display(),
                e
            )
        })?;
        PlaybookFile::from_yaml(&source)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigSection {
    #[serde(default)]
    pub gas_price: Option<Scalar>,
    #[serde(default)]
    pub gas_limit: Option<Scalar>,
    #[serde(rename = "chainID", alias = "chainId", default)]
    pub chain_id: Option<Scalar>,
    #[serde(default)]
    pub await_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WalletSection {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub privkey: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub keystore: Option<String>,
    #[serde(default)]
    pub keyfile: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractSection {
    /// Contract name inside the compiled source, defaults to the section key.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sol: Option<String>,
    #[serde(default)]
    pub artifact: Option<String>,
    /// Optimizer runs passed to the compiler.
    #[serde(default)]
    pub optimize: Option<u32>,
    #[serde(default)]
    pub instances: Vec<InstanceDecl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceDecl {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InstanceRef {
    Named(String),
    Inline(InlineInstance),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InlineInstance {
    pub contract: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallDecl {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub wallet: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadDecl {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub wallet: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    #[serde(default)]
    pub instance: Option<InstanceRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteDecl {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub wallet: Option<String>,
    #[serde(default)]
    pub sticky: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    #[serde(default)]
    pub instance: Option<InstanceRef>,
    #[serde(default)]
    pub value: Option<Scalar>,
    #[serde(default)]
    pub to: Option<String>,
}

/// A declared command parameter: a bare scalar, or a typed value/reference.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParamDecl {
    Typed(TypedParamDecl),
    Plain(Scalar),
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypedParamDecl {
    #[serde(rename = "type", default)]
    pub ty: Option<String>,
    #[serde(default)]
    pub value: Option<Scalar>,
    #[serde(default)]
    pub reference: Option<String>,
}

/// A YAML scalar kept in its textual form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::UInt(u) => write!(f, "{}", u),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::String(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TargetStepDecl {
    /// `"command"`, or `"command &"` to skip waiting for confirmation.
    Short(String),
    Detailed {
        command: String,
        #[serde(default)]
        args: Vec<Scalar>,
        #[serde(default)]
        deferred: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYBOOK: &str = r#"
CONFIG:
  gasPrice: 20000000000
  chainID: 5
  awaitTimeout: 90s
INVENTORY:
  genesis:
    - http://localhost:8545
WALLETS:
  alice:
    privkey: ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80
CONTRACTS:
  Token:
    sol: contracts/Token.sol
    optimize: 200
    instances:
      - name: token
CALL:
  balance:
    wallet: alice
    method: eth_getBalance
    params:
      - type: address
        value: "@@"
      - latest
VIEW:
  supply:
    method: totalSupply
    instance: token
WRITE:
  deploy:
    wallet: alice
    instance:
      contract: Token
    params:
      - type: uint256
        reference: $0
  send:
    wallet: alice
    value: 1 ether
    to: "@alice"
TARGETS:
  release:
    - deploy &
    - command: send
      args: ["$1"]
"#;

    #[test]
    fn test_parse_full_playbook() {
        let file = PlaybookFile::from_yaml(PLAYBOOK).unwrap();
        let config = file.config.unwrap();
        assert_eq!(config.gas_price, Some(Scalar::Int(20_000_000_000)));
        assert_eq!(config.await_timeout.as_deref(), Some("90s"));
        assert_eq!(file.inventory.unwrap()["genesis"], vec!["http://localhost:8545"]);

        let call = &file.call.unwrap()["balance"];
        assert!(matches!(&call.params[0], ParamDecl::Typed(t) if t.ty.as_deref() == Some("address")));
        assert_eq!(call.params[1], ParamDecl::Plain(Scalar::String("latest".into())));

        let read = &file.read.unwrap()["supply"];
        assert!(matches!(&read.instance, Some(InstanceRef::Named(n)) if n == "token"));

        let write = file.write.unwrap();
        let names: Vec<_> = write.keys().cloned().collect();
        assert_eq!(names, vec!["deploy", "send"]);
        assert!(matches!(&write["deploy"].instance, Some(InstanceRef::Inline(i)) if i.contract == "Token"));
        assert_eq!(write["send"].value, Some(Scalar::String("1 ether".into())));

        let steps = &file.targets.unwrap()["release"];
        assert_eq!(steps[0], TargetStepDecl::Short("deploy &".into()));
        assert!(matches!(&steps[1], TargetStepDecl::Detailed { command, .. } if command == "send"));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result = PlaybookFile::from_yaml("WALLETS:\n  alice:\n    privkey: \"ab\"\n    pasword: x\n");
        assert!(result.is_err());
    }
}
