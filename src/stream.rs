//! Stream client adapter
//!
//! Thin passthrough over the stream API: the coordinator only needs shard
//! enumeration. Errors propagate unchanged; the allocation path treats any
//! error as "skip this tick".

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Result, WardenError};

/// Enumerates the shards of a stream
#[async_trait]
pub trait ShardSource: Send + Sync {
    /// List all shard ids of the named stream, in stream-provided order.
    async fn list_shards(&self, stream_name: &str) -> Result<Vec<String>>;
}

/// Configuration for the Kinesis-compatible shard source
#[derive(Debug, Clone)]
pub struct KinesisConfig {
    /// Stream API endpoint URL
    pub endpoint: String,
    /// AWS region
    pub region: String,
    /// Access key ID
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for KinesisConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4566".into(),
            region: "us-east-1".into(),
            access_key_id: None,
            secret_access_key: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

/// Kinesis-compatible shard source using reqwest
pub struct KinesisShardSource {
    client: Client,
    config: KinesisConfig,
}

impl KinesisShardSource {
    /// Create a new shard source
    pub fn new(config: KinesisConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| WardenError::Internal {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    async fn call(&self, stream_name: &str, body: Value) -> Result<Value> {
        let resp = self
            .client
            .post(&self.config.endpoint)
            .header("content-type", "application/x-amz-json-1.1")
            .header("x-amz-target", "Kinesis_20131202.ListShards")
            .header(
                "authorization",
                credential_header(&self.config.access_key_id, &self.config.region),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| WardenError::StreamError {
                stream: stream_name.into(),
                message: format!("ListShards request failed: {}", e),
            })?;

        let status = resp.status();
        let payload: Value = resp.json().await.map_err(|e| WardenError::StreamError {
            stream: stream_name.into(),
            message: format!("failed to read ListShards response: {}", e),
        })?;

        if !status.is_success() {
            return Err(WardenError::StreamError {
                stream: stream_name.into(),
                message: format!("ListShards returned status {}: {}", status, payload),
            });
        }

        Ok(payload)
    }
}

#[async_trait]
impl ShardSource for KinesisShardSource {
    async fn list_shards(&self, stream_name: &str) -> Result<Vec<String>> {
        let mut shard_ids = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let body = match &next_token {
                // NextToken requests must not repeat the stream name
                Some(token) => json!({ "NextToken": token }),
                None => json!({ "StreamName": stream_name }),
            };

            let payload = self.call(stream_name, body).await?;

            if let Some(shards) = payload.get("Shards").and_then(Value::as_array) {
                for shard in shards {
                    if let Some(id) = shard.get("ShardId").and_then(Value::as_str) {
                        shard_ids.push(id.to_string());
                    }
                }
            }

            next_token = payload
                .get("NextToken")
                .and_then(Value::as_str)
                .map(String::from);
            if next_token.is_none() {
                break;
            }
        }

        debug!("Listed {} shards for stream {}", shard_ids.len(), stream_name);
        Ok(shard_ids)
    }
}

/// Fixed shard list, for tests and simulation
pub struct StaticShardSource {
    shard_ids: Vec<String>,
}

impl StaticShardSource {
    /// Create a source returning the given ids in order
    pub fn new<I, S>(shard_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            shard_ids: shard_ids.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ShardSource for StaticShardSource {
    async fn list_shards(&self, _stream_name: &str) -> Result<Vec<String>> {
        Ok(self.shard_ids.clone())
    }
}

/// Static credential header for unsigned local endpoints.
pub(crate) fn credential_header(access_key_id: &Option<String>, region: &str) -> String {
    let key = access_key_id.as_deref().unwrap_or("local");
    format!(
        "AWS4-HMAC-SHA256 Credential={}/19700101/{}/service/aws4_request",
        key, region
    )
}
