//! Blockchain registry client.
//!
//! Resolves hashed `(alias, record-name)` pairs to on-chain record values by
//! calling the single read-only contract method the broker consumes,
//! `getRecordHashed(bytes32,bytes32[])`. Only the leading `mixedResult`
//! member of the return struct is decoded; everything else about the
//! contract is opaque to the broker.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::domain::{BrokerError, RegistryConfig, RegistryError, RecordRegistry};

/// First four bytes of `keccak256("getRecordHashed(bytes32,bytes32[])")`.
const GET_RECORD_HASHED_SELECTOR: [u8; 4] = [0x6f, 0xd6, 0x1d, 0x7e];

const WORD: usize = 32;

/// Abstract JSON-RPC transport to enable testing.
#[async_trait]
pub trait JsonRpcTransport: Send + Sync {
    /// Send a JSON-RPC request
    async fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, BrokerError>;
}

/// HTTP-based JSON-RPC transport
pub struct HttpJsonRpcTransport {
    http_client: Client,
    rpc_url: String,
}

impl HttpJsonRpcTransport {
    pub fn new(rpc_url: &str, timeout: std::time::Duration) -> Result<Self, BrokerError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrokerError::Registry(RegistryError::Connection(e.to_string())))?;

        Ok(Self {
            http_client,
            rpc_url: rpc_url.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<T: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    params: T,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[async_trait]
impl JsonRpcTransport for HttpJsonRpcTransport {
    async fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, BrokerError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: method.to_string(),
            params,
        };

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BrokerError::Registry(RegistryError::Timeout(e.to_string()))
                } else {
                    BrokerError::Registry(RegistryError::Connection(e.to_string()))
                }
            })?;

        let rpc_response: JsonRpcResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| BrokerError::Registry(RegistryError::Rpc(e.to_string())))?;

        if let Some(error) = rpc_response.error {
            return Err(BrokerError::Registry(RegistryError::Rpc(format!(
                "{}: {}",
                error.code, error.message
            ))));
        }

        rpc_response.result.ok_or_else(|| {
            BrokerError::Registry(RegistryError::Rpc("Empty response".to_string()))
        })
    }
}

/// Registry client speaking `eth_call` against the configured contract.
pub struct RpcRecordRegistry {
    transport: Box<dyn JsonRpcTransport>,
    config: RegistryConfig,
}

impl RpcRecordRegistry {
    /// Create a new registry client over HTTP.
    pub fn new(config: RegistryConfig) -> Result<Self, BrokerError> {
        let transport = HttpJsonRpcTransport::new(&config.rpc_url, config.timeout)?;
        Ok(Self {
            transport: Box::new(transport),
            config,
        })
    }

    /// Create a client with a specific transport (useful for testing)
    pub fn with_transport(transport: Box<dyn JsonRpcTransport>, config: RegistryConfig) -> Self {
        Self { transport, config }
    }

    /// Make an RPC call with bounded retries.
    #[instrument(skip(self, params))]
    async fn rpc_call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, BrokerError> {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            match self.transport.send_request(method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(attempt = attempt, error = ?e, method = %method, "RPC call failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| BrokerError::Registry(RegistryError::Rpc("Unknown error".into()))))
    }
}

#[async_trait]
impl RecordRegistry for RpcRecordRegistry {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), BrokerError> {
        let _ = self
            .rpc_call("eth_blockNumber", serde_json::json!([]))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, names))]
    async fn get_record_hashed(
        &self,
        alias_hash: &str,
        names: &[String],
    ) -> Result<String, BrokerError> {
        let data = encode_get_record_hashed(alias_hash, names)?;
        let params = serde_json::json!([
            { "to": self.config.contract_address, "data": data },
            "latest"
        ]);
        let result = self.rpc_call("eth_call", params).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| BrokerError::Registry(RegistryError::Rpc("non-string result".into())))?;
        let mixed = decode_bytes_result(raw)?;
        debug!(alias_hash = %alias_hash, mixed_len = mixed.len(), "Registry record resolved");
        Ok(mixed)
    }
}

fn decode_word(framed: &str, what: &str) -> Result<[u8; WORD], BrokerError> {
    let stripped = framed.strip_prefix("0x").unwrap_or(framed);
    let bytes = hex::decode(stripped)
        .map_err(|e| BrokerError::Registry(RegistryError::BadRecord(format!("{what}: {e}"))))?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        BrokerError::Registry(RegistryError::BadRecord(format!(
            "{what} must be 32 bytes, got {}",
            v.len()
        )))
    })
}

/// ABI-encode the one consumed call: selector, the alias hash word, then the
/// offset/length-prefixed name array.
fn encode_get_record_hashed(alias_hash: &str, names: &[String]) -> Result<String, BrokerError> {
    let mut data = Vec::with_capacity(4 + WORD * (3 + names.len()));
    data.extend_from_slice(&GET_RECORD_HASHED_SELECTOR);
    data.extend_from_slice(&decode_word(alias_hash, "alias hash")?);

    // Dynamic array head: offset past the two argument words.
    let mut offset = [0u8; WORD];
    offset[WORD - 1] = (2 * WORD) as u8;
    data.extend_from_slice(&offset);

    let mut len = [0u8; WORD];
    len[WORD - 8..].copy_from_slice(&(names.len() as u64).to_be_bytes());
    data.extend_from_slice(&len);

    for name in names {
        data.extend_from_slice(&decode_word(name, "record name")?);
    }

    Ok(format!("0x{}", hex::encode(data)))
}

/// Decode the leading dynamic `bytes` member of an `eth_call` return into a
/// `0x`-framed hex blob. An empty return or empty member maps to `"0x"`,
/// the registry's unknown-alias marker.
fn decode_bytes_result(raw: &str) -> Result<String, BrokerError> {
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    if stripped.is_empty() {
        return Ok("0x".to_string());
    }
    let bytes = hex::decode(stripped)
        .map_err(|e| BrokerError::Registry(RegistryError::BadRecord(e.to_string())))?;
    if bytes.len() < 2 * WORD {
        return Err(BrokerError::Registry(RegistryError::BadRecord(format!(
            "return data too short: {} bytes",
            bytes.len()
        ))));
    }

    let offset = be_usize(&bytes[..WORD])?;
    if bytes.len() < offset + WORD {
        return Err(BrokerError::Registry(RegistryError::BadRecord(
            "bytes offset past end of return data".to_string(),
        )));
    }
    let len = be_usize(&bytes[offset..offset + WORD])?;
    let start = offset + WORD;
    if bytes.len() < start + len {
        return Err(BrokerError::Registry(RegistryError::BadRecord(
            "bytes length past end of return data".to_string(),
        )));
    }

    if len == 0 {
        return Ok("0x".to_string());
    }
    Ok(format!("0x{}", hex::encode(&bytes[start..start + len])))
}

fn be_usize(word: &[u8]) -> Result<usize, BrokerError> {
    // Offsets and lengths in practice fit well within u64.
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(BrokerError::Registry(RegistryError::BadRecord(
            "oversized word in return data".to_string(),
        )));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[WORD - 8..]);
    Ok(u64::from_be_bytes(buf) as usize)
}
