//! JSON-RPC ledger client. Signing happens on the node: the signer account
//! is unlocked there (or unlocked per call with a passphrase) and the agent
//! only ever sees raw signed transactions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tempchain_core::ledger::{Ledger, LedgerError, LedgerResult, Receipt, SignedOperation, TxRequest};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: Option<String>,
    block_number: Option<String>,
    status: Option<String>,
}

/// How long to wait for an operation to be included.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceiptPolling {
    pub interval: Duration,
    pub timeout: Duration,
}

pub struct JsonRpcLedger {
    client: Client,
    url: String,
    passphrase: Option<SecretString>,
    polling: ReceiptPolling,
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    pub fn new(
        client: Client,
        url: &str,
        passphrase: Option<SecretString>,
        polling: ReceiptPolling,
    ) -> Self {
        Self {
            client,
            url: url.to_string(),
            passphrase,
            polling,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> RpcResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("{} #{} -> {}", method, id, self.url);
        let response: RpcResponse = self
            .client
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if let Some(error) = response.error {
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        serde_json::from_value(response.result)
            .map_err(|e| RpcError::Decode(format!("{}: {}", method, e)))
    }

    async fn wait_for_receipt(&self, hash: &str) -> RpcResult<RpcReceipt> {
        let deadline = Instant::now() + self.polling.timeout;
        loop {
            let receipt: Option<RpcReceipt> = self
                .call("eth_getTransactionReceipt", json!([hash]))
                .await?;
            if let Some(receipt) = receipt {
                return Ok(receipt);
            }
            if Instant::now() >= deadline {
                return Err(RpcError::Decode(format!(
                    "no receipt for {} after {:?}",
                    hash, self.polling.timeout
                )));
            }
            tokio::time::sleep(self.polling.interval).await;
        }
    }
}

fn quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

fn parse_quantity(value: &str) -> RpcResult<u64> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16)
        .map_err(|e| RpcError::Decode(format!("invalid quantity {:?}: {}", value, e)))
}

fn transaction_object(request: &TxRequest) -> Value {
    let mut tx = json!({
        "from": request.from,
        "to": request.to,
        "nonce": quantity(request.nonce),
        "gas": quantity(request.gas),
        "gasPrice": quantity(request.gas_price),
        "data": format!("0x{}", hex::encode(&request.data)),
    });
    if let Some(chain_id) = request.chain_id {
        tx["chainId"] = json!(quantity(chain_id));
    }
    tx
}

/// Nodes answer either with the raw transaction or with `{raw, tx}`.
fn raw_transaction(signed: Value) -> RpcResult<String> {
    match signed {
        Value::String(raw) => Ok(raw),
        Value::Object(mut object) => match object.remove("raw") {
            Some(Value::String(raw)) => Ok(raw),
            _ => Err(RpcError::Decode("signed transaction without raw".to_string())),
        },
        other => Err(RpcError::Decode(format!("signed transaction: {}", other))),
    }
}

#[async_trait]
impl Ledger for JsonRpcLedger {
    async fn sequence_number(&self, account: &str) -> LedgerResult<u64> {
        let count: String = self
            .call("eth_getTransactionCount", json!([account, "latest"]))
            .await
            .map_err(|e| LedgerError::SequenceFetch {
                message: e.to_string(),
            })?;
        parse_quantity(&count).map_err(|e| LedgerError::SequenceFetch {
            message: e.to_string(),
        })
    }

    async fn sign(&self, request: &TxRequest) -> LedgerResult<SignedOperation> {
        let tx = transaction_object(request);
        let signed: RpcResult<Value> = match &self.passphrase {
            Some(passphrase) => {
                self.call(
                    "personal_signTransaction",
                    json!([tx, passphrase.expose_secret()]),
                )
                .await
            }
            None => self.call("eth_signTransaction", json!([tx])).await,
        };
        let raw = signed
            .and_then(raw_transaction)
            .map_err(|e| LedgerError::Signing {
                sequence: request.nonce,
                message: e.to_string(),
            })?;
        Ok(SignedOperation {
            sequence: request.nonce,
            raw,
        })
    }

    async fn submit(&self, operation: &SignedOperation) -> LedgerResult<Receipt> {
        let failed = |message: String| LedgerError::Submission {
            sequence: operation.sequence,
            message,
        };

        let hash: String = self
            .call("eth_sendRawTransaction", json!([operation.raw]))
            .await
            .map_err(|e| failed(e.to_string()))?;
        let receipt = self
            .wait_for_receipt(&hash)
            .await
            .map_err(|e| failed(e.to_string()))?;

        if receipt.status.as_deref() == Some("0x0") {
            return Err(failed(format!("transaction {} reverted", hash)));
        }
        let block_number = match receipt.block_number.as_deref() {
            Some(number) => Some(parse_quantity(number).map_err(|e| failed(e.to_string()))?),
            None => None,
        };
        Ok(Receipt {
            transaction_hash: receipt.transaction_hash.unwrap_or(hash),
            block_number,
        })
    }
}

/// Hands out the ledger a round should talk to.
pub trait LedgerProvider: Send + Sync {
    /// `endpoint` overrides the agent's default ledger endpoint.
    fn ledger_for(&self, endpoint: Option<&str>) -> Arc<dyn Ledger>;
}

pub struct JsonRpcLedgerProvider {
    client: Client,
    default_url: String,
    passphrase: Option<SecretString>,
    polling: ReceiptPolling,
}

impl JsonRpcLedgerProvider {
    pub fn new(default_url: &str, passphrase: Option<SecretString>, polling: ReceiptPolling) -> Self {
        Self {
            client: Client::new(),
            default_url: default_url.to_string(),
            passphrase,
            polling,
        }
    }
}

impl JsonRpcLedgerProvider {
    fn resolve<'a>(&'a self, endpoint: Option<&'a str>) -> &'a str {
        endpoint.unwrap_or(&self.default_url)
    }
}

impl LedgerProvider for JsonRpcLedgerProvider {
    fn ledger_for(&self, endpoint: Option<&str>) -> Arc<dyn Ledger> {
        Arc::new(JsonRpcLedger::new(
            self.client.clone(),
            self.resolve(endpoint),
            self.passphrase.clone(),
            self.polling,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    fn polling() -> ReceiptPolling {
        ReceiptPolling {
            interval: Duration::from_millis(10),
            timeout: Duration::from_millis(100),
        }
    }

    fn ledger(url: &str, passphrase: Option<&str>) -> JsonRpcLedger {
        JsonRpcLedger::new(
            Client::new(),
            url,
            passphrase.map(|p| SecretString::new(Box::from(p))),
            polling(),
        )
    }

    fn request() -> TxRequest {
        TxRequest {
            from: "0xagent".to_string(),
            to: "0xcontract".to_string(),
            nonce: 26,
            gas: 300_000,
            gas_price: 0,
            chain_id: Some(1337),
            data: vec![0xde, 0xad],
        }
    }

    fn rpc_result(result: Value) -> String {
        json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string()
    }

    #[tokio::test]
    async fn test_sequence_number() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "eth_getTransactionCount",
                "params": ["0xagent", "latest"],
            })))
            .with_header("content-type", "application/json")
            .with_body(rpc_result(json!("0x1a")))
            .create_async()
            .await;

        let ledger = ledger(&server.url(), None);
        assert_eq!(ledger.sequence_number("0xagent").await.unwrap(), 26);
    }

    #[tokio::test]
    async fn test_sequence_number_rpc_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_header("content-type", "application/json")
            .with_body(
                json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "unknown account"}})
                    .to_string(),
            )
            .create_async()
            .await;

        let ledger = ledger(&server.url(), None);
        match ledger.sequence_number("0xagent").await {
            Err(LedgerError::SequenceFetch { message }) => {
                assert!(message.contains("unknown account"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sign_with_node_account() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "eth_signTransaction",
            })))
            .with_header("content-type", "application/json")
            .with_body(rpc_result(json!({"raw": "0xf86b", "tx": {}})))
            .create_async()
            .await;

        let signed = ledger(&server.url(), None).sign(&request()).await.unwrap();
        assert_eq!(
            signed,
            SignedOperation {
                sequence: 26,
                raw: "0xf86b".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_sign_with_passphrase() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "personal_signTransaction",
            })))
            .with_header("content-type", "application/json")
            .with_body(rpc_result(json!("0xf86c")))
            .create_async()
            .await;

        let signed = ledger(&server.url(), Some("hunter2"))
            .sign(&request())
            .await
            .unwrap();
        assert_eq!(signed.raw, "0xf86c");
    }

    async fn submit_with_receipt(receipt: Value) -> LedgerResult<Receipt> {
        let mut server = mockito::Server::new_async().await;
        let _send = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_sendRawTransaction"})))
            .with_header("content-type", "application/json")
            .with_body(rpc_result(json!("0xhash")))
            .create_async()
            .await;
        let _receipt = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "eth_getTransactionReceipt",
                "params": ["0xhash"],
            })))
            .with_header("content-type", "application/json")
            .with_body(rpc_result(receipt))
            .create_async()
            .await;

        let operation = SignedOperation {
            sequence: 3,
            raw: "0xf86b".to_string(),
        };
        ledger(&server.url(), None).submit(&operation).await
    }

    #[tokio::test]
    async fn test_submit_included() {
        let receipt = submit_with_receipt(json!({
            "transactionHash": "0xhash",
            "blockNumber": "0x10",
            "status": "0x1",
        }))
        .await
        .unwrap();
        assert_eq!(receipt.transaction_hash, "0xhash");
        assert_eq!(receipt.block_number, Some(16));
    }

    #[tokio::test]
    async fn test_submit_reverted() {
        let result = submit_with_receipt(json!({
            "transactionHash": "0xhash",
            "blockNumber": "0x10",
            "status": "0x0",
        }))
        .await;
        assert!(matches!(
            result,
            Err(LedgerError::Submission { sequence: 3, ref message }) if message.contains("reverted")
        ));
    }

    #[tokio::test]
    async fn test_submit_times_out_without_receipt() {
        let result = submit_with_receipt(Value::Null).await;
        assert!(matches!(
            result,
            Err(LedgerError::Submission { ref message, .. }) if message.contains("no receipt")
        ));
    }

    #[test]
    fn test_raw_transaction_shapes() {
        assert_eq!(raw_transaction(json!("0x01")).unwrap(), "0x01");
        assert_eq!(raw_transaction(json!({"raw": "0x02"})).unwrap(), "0x02");
        assert!(raw_transaction(json!({"tx": {}})).is_err());
        assert!(raw_transaction(json!(7)).is_err());
    }

    #[test]
    fn test_transaction_object() {
        assert_eq!(
            transaction_object(&request()),
            json!({
                "from": "0xagent",
                "to": "0xcontract",
                "nonce": "0x1a",
                "gas": "0x493e0",
                "gasPrice": "0x0",
                "data": "0xdead",
                "chainId": "0x539",
            })
        );
        let mut request = request();
        request.chain_id = None;
        assert!(transaction_object(&request).get("chainId").is_none());
    }

    #[test]
    fn test_provider_endpoint_override() {
        let provider = JsonRpcLedgerProvider::new("http://default:8545", None, polling());
        assert_eq!(provider.resolve(None), "http://default:8545");
        assert_eq!(
            provider.resolve(Some("http://override:8545")),
            "http://override:8545"
        );
    }
}
