//! Alloy-backed implementations of the services the playbook engine consumes:
//! node access over HTTP JSON-RPC, an encrypted keyfile cache and a `solc`
//! driver.

#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate hiro_system_kit;

pub mod keystore;
pub mod rpc;
pub mod solc;

pub use keystore::KeystoreCache;
pub use rpc::{EvmConnector, EvmRpc};
pub use solc::SolcCompiler;
