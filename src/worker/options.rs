//! Worker launch options
//!
//! The supervisor serializes one `WorkerOptions` record into the child's
//! environment; field names are camelCase so workers written against the
//! wire contract in any language can decode it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, WardenError};

/// Environment variable carrying the serialized options record
pub const WORKER_OPTIONS_ENV: &str = "WARDEN_WORKER_OPTIONS";

/// Where a fresh consumer starts reading its shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IteratorType {
    Latest,
    TrimHorizon,
    AtSequenceNumber,
    AfterSequenceNumber,
}

/// Endpoint and credential settings shared with workers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Key/value table endpoint URL
    pub table_endpoint: String,
    /// Stream API endpoint URL
    pub stream_endpoint: String,
    /// AWS region
    pub region: String,
    /// Access key ID
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            table_endpoint: "http://localhost:8000".into(),
            stream_endpoint: "http://localhost:4566".into(),
            region: "us-east-1".into(),
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// The options record a worker process receives via its environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerOptions {
    /// Lease table name
    pub table_name: String,
    /// Endpoint configuration
    pub stream_config: ConnectionConfig,
    /// Stream to consume
    pub stream_name: String,
    /// Iterator position for a fresh claim
    pub starting_iterator_type: IteratorType,
    /// Shard this worker owns
    pub shard_id: String,
    /// Counter to take over at; None means claim a fresh lease
    pub initial_lease_counter: Option<u64>,
    /// Owning instance id, written into the lease row
    pub owner: String,
    /// Lease duration in milliseconds
    pub lease_duration_ms: u64,
}

impl WorkerOptions {
    /// Serialize for the child environment.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| WardenError::InvalidOptions {
            reason: e.to_string(),
        })
    }

    /// Decode a serialized options record.
    pub fn decode(blob: &str) -> Result<Self> {
        serde_json::from_str(blob).map_err(|e| WardenError::InvalidOptions {
            reason: e.to_string(),
        })
    }

    /// Read and decode the options from this process's environment.
    pub fn from_env() -> Result<Self> {
        let blob = std::env::var(WORKER_OPTIONS_ENV).map_err(|_| WardenError::InvalidOptions {
            reason: format!("{} is not set", WORKER_OPTIONS_ENV),
        })?;
        Self::decode(&blob)
    }

    /// Lease duration as a Duration.
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }
}

/// Everything the supervisor needs to build per-shard worker options
#[derive(Debug, Clone)]
pub struct LaunchProfile {
    /// Lease table name
    pub table_name: String,
    /// Endpoint configuration forwarded to workers
    pub connection: ConnectionConfig,
    /// Stream to consume
    pub stream_name: String,
    /// Iterator position for fresh claims
    pub starting_iterator_type: IteratorType,
    /// This instance's id; becomes the lease owner
    pub owner: String,
    /// Lease duration granted on claim and renewal
    pub lease_duration: Duration,
}

impl LaunchProfile {
    /// Options for one shard spawn.
    pub fn options_for(&self, shard_id: &str, initial_lease_counter: Option<u64>) -> WorkerOptions {
        WorkerOptions {
            table_name: self.table_name.clone(),
            stream_config: self.connection.clone(),
            stream_name: self.stream_name.clone(),
            starting_iterator_type: self.starting_iterator_type,
            shard_id: shard_id.to_string(),
            initial_lease_counter,
            owner: self.owner.clone(),
            lease_duration_ms: self.lease_duration.as_millis() as u64,
        }
    }
}

/// Structured message sent to a worker over its stdin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ControlMessage {
    /// The shutdown message.
    pub fn shutdown() -> Self {
        Self {
            kind: "shutdown".into(),
        }
    }

    /// True for a shutdown message.
    pub fn is_shutdown(&self) -> bool {
        self.kind == "shutdown"
    }
}
