//! Services the engine consumes but does not implement: node access, key
//! storage and Solidity compilation.

use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::errors::PlaybookResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionStatus {
    pub is_pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub success: bool,
    pub block_number: Option<u64>,
    pub contract_address: Option<Address>,
}

/// Ethereum JSON-RPC access used by validation and execution.
#[async_trait]
pub trait EthClient: Send + Sync {
    async fn call_contract(&self, tx: TransactionRequest) -> PlaybookResult<Bytes>;

    /// Broadcasts an EIP-2718 encoded signed transaction.
    async fn send_raw_transaction(&self, raw: Bytes) -> PlaybookResult<B256>;

    async fn balance_of(&self, address: Address) -> PlaybookResult<U256>;

    async fn pending_nonce(&self, address: Address) -> PlaybookResult<u64>;

    async fn suggest_gas_price(&self) -> PlaybookResult<u128>;

    async fn estimate_gas(&self, tx: TransactionRequest) -> PlaybookResult<u64>;

    /// `None` when the node does not know the transaction (yet).
    async fn transaction_by_hash(&self, hash: B256) -> PlaybookResult<Option<TransactionStatus>>;

    async fn transaction_receipt(&self, hash: B256) -> PlaybookResult<Option<ReceiptSummary>>;

    /// Generic JSON-RPC call.
    async fn rpc_call(&self, method: &str, params: Vec<JsonValue>) -> PlaybookResult<JsonValue>;
}

/// Opens a client for one inventory node.
#[async_trait]
pub trait NodeConnector: Send + Sync {
    async fn connect(&self, url: &str) -> PlaybookResult<Arc<dyn EthClient>>;
}

/// Decrypted key cache backed by keyfiles on disk.
pub trait KeyCache: Send + Sync {
    fn set_path(&self, address: Address, path: &Path);

    fn unset_path(&self, address: Address, path: &Path);

    fn private_key(&self, address: Address, password: &str) -> Option<PrivateKeySigner>;
}

#[derive(Debug, Clone)]
pub struct CompiledContract {
    pub name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

/// Solidity compiler. Keys of the returned map are contract names.
pub trait Compiler: Send + Sync {
    fn compile(
        &self,
        base_dir: &Path,
        source: &Path,
        optimize_runs: Option<u32>,
    ) -> PlaybookResult<HashMap<String, CompiledContract>>;
}
