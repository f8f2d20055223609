//! Ethereum JSON-RPC block feed.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use mev_scan_telemetry::Metrics;
use mev_scan_types::{BlockRecord, FeedError, TransactionRecord};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::feed::BlockFeed;

const WEI_PER_GWEI: f64 = 1e9;
const WEI_PER_ETHER: f64 = 1e18;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Ethereum RPC client wrapper.
pub struct RpcClient {
    client: Client,
    rpc_url: String,
    metrics: Metrics,
    with_receipts: bool,
}

impl RpcClient {
    /// Create a new RPC client.
    ///
    /// # Arguments
    /// * `rpc_url` - HTTP/HTTPS JSON-RPC endpoint URL
    /// * `metrics` - Metrics collector
    pub fn new(rpc_url: &str, metrics: Metrics) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        info!(rpc_url, "Initialized RPC client");

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            metrics,
            with_receipts: false,
        })
    }

    /// Fetch receipts alongside each block for the real gas used.
    ///
    /// Without receipts a transaction's gas limit stands in for gas used.
    pub fn with_receipts(mut self, enabled: bool) -> Self {
        self.with_receipts = enabled;
        self
    }

    async fn call_rpc(&self, method: &str, params: Value) -> Result<Value, FeedError> {
        let start = Instant::now();
        let result = self.send(method, params).await;
        self.metrics
            .observe_fetch_latency(method, start.elapsed().as_secs_f64());
        if result.is_err() {
            self.metrics.inc_rpc_errors();
        }
        result
    }

    async fn send(&self, method: &str, params: Value) -> Result<Value, FeedError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FeedError::Transport(format!(
                "RPC request failed with status: {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FeedError::Malformed(e.to_string()))?;

        rpc_result(body)
    }

    /// Gas used per transaction hash, from the block's receipts.
    async fn receipt_gas(&self, hex_block: &str) -> Result<HashMap<String, f64>, FeedError> {
        let receipts = self
            .call_rpc("eth_getBlockReceipts", json!([hex_block]))
            .await?;
        let receipts = receipts
            .as_array()
            .ok_or_else(|| FeedError::Malformed("receipts are not an array".to_string()))?;

        Ok(receipts
            .iter()
            .filter_map(|r| {
                let hash = r["transactionHash"].as_str()?.to_lowercase();
                Some((hash, quantity(&r["gasUsed"])))
            })
            .collect())
    }
}

#[async_trait]
impl BlockFeed for RpcClient {
    async fn latest_block_number(&self) -> Result<u64, FeedError> {
        let result = self.call_rpc("eth_blockNumber", json!([])).await?;
        let block_num = hex_u64(&result)
            .ok_or_else(|| FeedError::Malformed(format!("invalid block number {result}")))?;
        debug!(block_num, "Latest block number");
        Ok(block_num)
    }

    async fn fetch_block(&self, block_number: u64) -> Result<BlockRecord, FeedError> {
        let hex_block = format!("0x{:x}", block_number);
        let block = self
            .call_rpc("eth_getBlockByNumber", json!([hex_block, true]))
            .await?;

        if block.is_null() {
            return Err(FeedError::NotFound(block_number));
        }

        let gas_used = if self.with_receipts {
            match self.receipt_gas(&hex_block).await {
                Ok(gas) => Some(gas),
                Err(e) => {
                    warn!(block = block_number, error = %e, "Receipts unavailable, using gas limits");
                    None
                }
            }
        } else {
            None
        };

        let record = parse_block(&block, gas_used.as_ref())?;
        debug!(block = block_number, transactions = record.transactions.len(), "Fetched block");
        Ok(record)
    }
}

/// Take the `result` out of a JSON-RPC response body.
fn rpc_result(mut body: Value) -> Result<Value, FeedError> {
    if let Some(error) = body.get("error") {
        return Err(FeedError::Rpc(error.to_string()));
    }
    body.get_mut("result")
        .map(Value::take)
        .ok_or_else(|| FeedError::Malformed(format!("response has no result: {body}")))
}

/// Convert a full `eth_getBlockByNumber` response into a block record.
///
/// Gas prices become gwei and values become ether. A quantity that cannot be
/// read is carried as NaN so validation rejects that one transaction instead
/// of the whole block.
fn parse_block(
    block: &Value,
    receipt_gas: Option<&HashMap<String, f64>>,
) -> Result<BlockRecord, FeedError> {
    let number = hex_u64(&block["number"])
        .ok_or_else(|| FeedError::Malformed("block missing number".to_string()))?;
    let timestamp = hex_u64(&block["timestamp"])
        .ok_or_else(|| FeedError::Malformed("block missing timestamp".to_string()))?;
    let transactions = block["transactions"]
        .as_array()
        .ok_or_else(|| FeedError::Malformed("block missing transactions array".to_string()))?;

    let transactions = transactions
        .iter()
        .enumerate()
        .map(|(index, tx)| {
            let hash = tx["hash"].as_str().unwrap_or_default().to_string();
            let gas_used = receipt_gas
                .and_then(|gas| gas.get(&hash.to_lowercase()).copied())
                .unwrap_or_else(|| quantity(&tx["gas"]));

            TransactionRecord {
                sender: tx["from"].as_str().unwrap_or_default().to_string(),
                receiver: tx["to"].as_str().map(str::to_string),
                gas_price: quantity(&tx["gasPrice"]) / WEI_PER_GWEI,
                gas_used,
                value: quantity(&tx["value"]) / WEI_PER_ETHER,
                block_number: hex_u64(&tx["blockNumber"]).unwrap_or(number),
                position_in_block: hex_u64(&tx["transactionIndex"]).unwrap_or(index as u64),
                hash,
            }
        })
        .collect();

    Ok(BlockRecord {
        number,
        timestamp,
        transactions,
    })
}

fn hex_u64(value: &Value) -> Option<u64> {
    let s = value.as_str()?;
    u64::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16).ok()
}

fn quantity(value: &Value) -> f64 {
    value
        .as_str()
        .and_then(|s| u128::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16).ok())
        .map(|q| q as f64)
        .unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_json() -> Value {
        json!({
            "number": "0x10",
            "timestamp": "0x6553f100",
            "transactions": [
                {
                    "hash": format!("0x{:064x}", 1),
                    "from": format!("0x{:040x}", 0xa),
                    "to": format!("0x{:040x}", 0xb),
                    "gas": "0x5208",
                    "gasPrice": "0x174876e800",
                    "value": "0xde0b6b3a7640000",
                    "blockNumber": "0x10",
                    "transactionIndex": "0x0"
                },
                {
                    "hash": format!("0x{:064x}", 2),
                    "from": format!("0x{:040x}", 0xc),
                    "to": null,
                    "gas": "0x30d40",
                    "gasPrice": "garbage",
                    "value": "0x0",
                    "blockNumber": "0x10",
                    "transactionIndex": "0x1"
                }
            ]
        })
    }

    #[test]
    fn test_parse_block_units() {
        let record = parse_block(&block_json(), None).unwrap();
        assert_eq!(record.number, 16);
        assert_eq!(record.timestamp, 0x6553f100);
        assert_eq!(record.transactions.len(), 2);

        let first = &record.transactions[0];
        assert!((first.gas_price - 100.0).abs() < 1e-9);
        assert!((first.value - 1.0).abs() < 1e-12);
        assert_eq!(first.gas_used, 21_000.0);
        assert_eq!(first.position_in_block, 0);
        assert!(first.validate().is_ok());

        let second = &record.transactions[1];
        assert_eq!(second.receiver, None);
        assert!(second.gas_price.is_nan());
        assert!(second.validate().is_err());
    }

    #[test]
    fn test_parse_block_prefers_receipts() {
        let receipts = HashMap::from([(format!("0x{:064x}", 2), 150_000.0)]);
        let record = parse_block(&block_json(), Some(&receipts)).unwrap();
        assert_eq!(record.transactions[0].gas_used, 21_000.0);
        assert_eq!(record.transactions[1].gas_used, 150_000.0);
    }

    #[test]
    fn test_parse_block_requires_header() {
        let err = parse_block(&json!({ "transactions": [] }), None).unwrap_err();
        assert!(matches!(err, FeedError::Malformed(_)));
    }

    #[test]
    fn test_rpc_result_takes_result() {
        assert_eq!(rpc_result(json!({ "id": 1, "result": "0x10" })).unwrap(), json!("0x10"));
        assert_eq!(rpc_result(json!({ "id": 1, "result": null })).unwrap(), Value::Null);
    }

    #[test]
    fn test_rpc_result_reports_rpc_error() {
        let err = rpc_result(json!({ "error": { "code": -32000, "message": "busy" } })).unwrap_err();
        assert!(matches!(err, FeedError::Rpc(_)));
    }

    #[test]
    fn test_rpc_result_rejects_non_object_body() {
        for body in [json!([]), json!("0x10"), json!(7), Value::Null, json!({ "id": 1 })] {
            let err = rpc_result(body).unwrap_err();
            assert!(matches!(err, FeedError::Malformed(_)));
        }
    }

    /// Serve one HTTP request with a fixed JSON body.
    async fn serve_once(body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                let Some(header_end) = text.find("\r\n\r\n") else {
                    if n == 0 {
                        break;
                    }
                    continue;
                };
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if n == 0 || request.len() >= header_end + 4 + content_length {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        url
    }

    #[tokio::test]
    async fn test_array_response_is_malformed() {
        let url = serve_once("[]").await;
        let client = RpcClient::new(&url, Metrics::new().unwrap()).unwrap();
        let err = client.latest_block_number().await.unwrap_err();
        assert!(matches!(err, FeedError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_latest_block_number_over_http() {
        let url = serve_once(r#"{"jsonrpc":"2.0","id":1,"result":"0x1b4"}"#).await;
        let client = RpcClient::new(&url, Metrics::new().unwrap()).unwrap();
        assert_eq!(client.latest_block_number().await.unwrap(), 0x1b4);
    }
}
