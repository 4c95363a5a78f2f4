use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::network::{Ethereum, ReceiptResponse};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::TransactionRequest;
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use error_stack::Report;
use serde_json::Value as JsonValue;

use playbook_core::client::{EthClient, NodeConnector, ReceiptSummary, TransactionStatus};
use playbook_core::{PlaybookError, PlaybookResult};

const MAX_RETRIES: u64 = 3;

/// Node and method a failed request was sent to.
#[derive(Debug, Clone)]
pub struct RpcContext {
    pub endpoint: String,
    pub method: String,
}

impl fmt::Display for RpcContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.method, self.endpoint)
    }
}

#[derive(Clone, Debug)]
pub struct EvmRpc {
    pub url: Url,
    pub provider: RootProvider<Ethereum>,
}

impl EvmRpc {
    pub fn new(url: &str) -> PlaybookResult<Self> {
        let url = Url::parse(url).map_err(|e| {
            Report::new(PlaybookError::Network)
                .attach_printable(format!("invalid node url '{}': {}", url, e))
        })?;
        let provider = RootProvider::<Ethereum>::new_http(url.clone());
        Ok(Self { url, provider })
    }

    fn failure(&self, method: &str, error: impl fmt::Display) -> Report<PlaybookError> {
        Report::new(PlaybookError::Network)
            .attach_printable(error.to_string())
            .attach_printable(RpcContext { endpoint: self.url.to_string(), method: method.to_string() })
    }

    async fn retry_async<T, E, Fut, F>(f: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut retries = 0;
        loop {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if retries >= MAX_RETRIES {
                        return Err(e);
                    }
                    retries += 1;
                    tokio::time::sleep(Duration::from_millis(100 * retries)).await;
                }
            }
        }
    }
}

#[async_trait]
impl EthClient for EvmRpc {
    async fn call_contract(&self, tx: TransactionRequest) -> PlaybookResult<Bytes> {
        self.provider.call(tx).await.map_err(|e| self.failure("eth_call", e))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> PlaybookResult<B256> {
        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| self.failure("eth_sendRawTransaction", e))?;
        Ok(*pending.tx_hash())
    }

    async fn balance_of(&self, address: Address) -> PlaybookResult<U256> {
        EvmRpc::retry_async(|| async {
            self.provider
                .get_balance(address)
                .await
                .map_err(|e| self.failure("eth_getBalance", e))
                .map_err(|e| e.attach_printable(format!("getting balance of {:#x}", address)))
        })
        .await
    }

    async fn pending_nonce(&self, address: Address) -> PlaybookResult<u64> {
        EvmRpc::retry_async(|| async {
            self.provider
                .get_transaction_count(address)
                .pending()
                .await
                .map_err(|e| self.failure("eth_getTransactionCount", e))
                .map_err(|e| e.attach_printable(format!("getting nonce of {:#x}", address)))
        })
        .await
    }

    async fn suggest_gas_price(&self) -> PlaybookResult<u128> {
        EvmRpc::retry_async(|| async {
            self.provider.get_gas_price().await.map_err(|e| self.failure("eth_gasPrice", e))
        })
        .await
    }

    async fn estimate_gas(&self, tx: TransactionRequest) -> PlaybookResult<u64> {
        self.provider.estimate_gas(tx).await.map_err(|e| self.failure("eth_estimateGas", e))
    }

    async fn transaction_by_hash(&self, hash: B256) -> PlaybookResult<Option<TransactionStatus>> {
        let transaction = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| self.failure("eth_getTransactionByHash", e))?;
        Ok(transaction.map(|tx| TransactionStatus { is_pending: tx.block_number.is_none() }))
    }

    async fn transaction_receipt(&self, hash: B256) -> PlaybookResult<Option<ReceiptSummary>> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| self.failure("eth_getTransactionReceipt", e))?;
        Ok(receipt.map(|receipt| ReceiptSummary {
            success: receipt.status(),
            block_number: receipt.block_number(),
            contract_address: receipt.contract_address(),
        }))
    }

    async fn rpc_call(&self, method: &str, params: Vec<JsonValue>) -> PlaybookResult<JsonValue> {
        self.provider
            .raw_request::<_, JsonValue>(method.to_string().into(), params)
            .await
            .map_err(|e| self.failure(method, e))
    }
}

/// Opens HTTP clients for inventory nodes.
#[derive(Debug, Default, Clone)]
pub struct EvmConnector;

#[async_trait]
impl NodeConnector for EvmConnector {
    async fn connect(&self, url: &str) -> PlaybookResult<Arc<dyn EthClient>> {
        Ok(Arc::new(EvmRpc::new(url)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_invalid_url_is_rejected() {
        let error = EvmRpc::new("not a url").unwrap_err();
        assert_eq!(error.current_context(), &PlaybookError::Network);
        assert!(format!("{:?}", error).contains("not a url"));
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), &str> = EvmRpc::retry_async(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err("unavailable")
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_RETRIES as usize + 1);
    }

    #[tokio::test]
    async fn test_retry_returns_first_success() {
        let attempts = AtomicUsize::new(0);
        let result: Result<usize, &str> = EvmRpc::retry_async(|| async {
            match attempts.fetch_add(1, Ordering::SeqCst) {
                0 => Err("unavailable"),
                n => Ok(n),
            }
        })
        .await;
        assert_eq!(result, Ok(1));
    }

    #[tokio::test]
    async fn test_unreachable_node_reports_method() {
        let client = EvmConnector.connect("http://127.0.0.1:1").await.unwrap();
        let error = client.rpc_call("net_version", vec![]).await.unwrap_err();
        assert_eq!(error.current_context(), &PlaybookError::Network);
        let context = error.downcast_ref::<RpcContext>().unwrap();
        assert_eq!(context.method, "net_version");
    }
}
