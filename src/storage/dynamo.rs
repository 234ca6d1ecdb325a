//! DynamoDB-compatible table client
//!
//! Async JSON client using reqwest against a configurable endpoint
//! (DynamoDB Local, LocalStack, Alternator). Requests are unsigned;
//! a fronting proxy supplies SigV4 where a real deployment needs it.

use reqwest::Client;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterMember, MemberStore};
use crate::error::{Result, WardenError};
use crate::lease::{CasOutcome, Lease, LeaseStore};
use crate::now_ms;
use crate::stream::credential_header;

/// Configuration for the table client
#[derive(Debug, Clone)]
pub struct DynamoConfig {
    /// Table API endpoint URL
    pub endpoint: String,
    /// AWS region
    pub region: String,
    /// Access key ID
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
    /// Read capacity units used when creating a missing table
    pub read_capacity: u32,
    /// Write capacity units used when creating a missing table
    pub write_capacity: u32,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for DynamoConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".into(),
            region: "us-east-1".into(),
            access_key_id: None,
            secret_access_key: None,
            read_capacity: 10,
            write_capacity: 10,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

/// How a table call failed, before error context is attached
enum CallFailure {
    /// The conditional expression was rejected; a normal CAS outcome
    Condition,
    /// The table does not exist
    TableMissing,
    /// Anything else
    Other(String),
}

/// DynamoDB-protocol client shared by both table stores
pub struct DynamoClient {
    client: Client,
    config: DynamoConfig,
}

impl DynamoClient {
    /// Create a new table client
    pub fn new(config: DynamoConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| WardenError::Internal {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    async fn call(&self, target: &str, body: Value) -> std::result::Result<Value, CallFailure> {
        let resp = self
            .client
            .post(&self.config.endpoint)
            .header("content-type", "application/x-amz-json-1.0")
            .header("x-amz-target", format!("DynamoDB_20120810.{}", target))
            .header(
                "authorization",
                credential_header(&self.config.access_key_id, &self.config.region),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| CallFailure::Other(format!("{} request failed: {}", target, e)))?;

        let status = resp.status();
        let payload: Value = resp
            .json()
            .await
            .map_err(|e| CallFailure::Other(format!("{} response unreadable: {}", target, e)))?;

        if status.is_success() {
            return Ok(payload);
        }

        let error_type = payload
            .get("__type")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        if error_type.contains("ConditionalCheckFailedException") {
            Err(CallFailure::Condition)
        } else if error_type.contains("ResourceNotFoundException") {
            Err(CallFailure::TableMissing)
        } else {
            Err(CallFailure::Other(format!(
                "{} returned {}: {}",
                target, status, payload
            )))
        }
    }

    /// Probe the table; create it with the configured capacity when absent.
    async fn ensure_table(&self, table: &str, key_attr: &str) -> Result<()> {
        match self.call("DescribeTable", json!({ "TableName": table })).await {
            Ok(_) => return Ok(()),
            Err(CallFailure::TableMissing) => {}
            Err(failure) => return Err(table_error(table, failure)),
        }

        info!("Creating table {}", table);
        let body = json!({
            "TableName": table,
            "AttributeDefinitions": [
                { "AttributeName": key_attr, "AttributeType": "S" }
            ],
            "KeySchema": [
                { "AttributeName": key_attr, "KeyType": "HASH" }
            ],
            "ProvisionedThroughput": {
                "ReadCapacityUnits": self.config.read_capacity,
                "WriteCapacityUnits": self.config.write_capacity
            }
        });

        match self.call("CreateTable", body).await {
            Ok(_) => Ok(()),
            // another instance won the create race
            Err(CallFailure::Other(message)) if message.contains("ResourceInUseException") => {
                Ok(())
            }
            Err(failure) => Err(table_error(table, failure)),
        }
    }

    /// Full scan, following LastEvaluatedKey.
    async fn scan(&self, table: &str) -> Result<Vec<Map<String, Value>>> {
        let mut items = Vec::new();
        let mut start_key: Option<Value> = None;

        loop {
            let mut body = json!({ "TableName": table });
            if let Some(key) = &start_key {
                body["ExclusiveStartKey"] = key.clone();
            }

            let payload = self
                .call("Scan", body)
                .await
                .map_err(|f| table_error(table, f))?;

            if let Some(page) = payload.get("Items").and_then(Value::as_array) {
                for item in page {
                    if let Some(map) = item.as_object() {
                        items.push(map.clone());
                    }
                }
            }

            start_key = payload.get("LastEvaluatedKey").cloned().filter(|v| !v.is_null());
            if start_key.is_none() {
                break;
            }
        }

        Ok(items)
    }
}

fn table_error(table: &str, failure: CallFailure) -> WardenError {
    match failure {
        CallFailure::Condition => WardenError::ConditionRejected { key: table.into() },
        CallFailure::TableMissing => WardenError::TableNotFound { table: table.into() },
        CallFailure::Other(message) => WardenError::TableError { message },
    }
}

// ---- attribute encoding helpers ----

fn attr_s(value: &str) -> Value {
    json!({ "S": value })
}

fn attr_n(value: u64) -> Value {
    json!({ "N": value.to_string() })
}

fn attr_bool(value: bool) -> Value {
    json!({ "BOOL": value })
}

fn item_str(item: &Map<String, Value>, name: &str) -> Option<String> {
    item.get(name)?.get("S")?.as_str().map(String::from)
}

fn item_u64(item: &Map<String, Value>, name: &str) -> Option<u64> {
    item.get(name)?.get("N")?.as_str()?.parse().ok()
}

fn item_bool(item: &Map<String, Value>, name: &str) -> Option<bool> {
    item.get(name)?.get("BOOL")?.as_bool()
}

fn parse_lease(item: &Map<String, Value>) -> Option<Lease> {
    Some(Lease {
        shard_id: item_str(item, "shardId")?,
        lease_counter: item_u64(item, "leaseCounter")?,
        expires_at_ms: item_u64(item, "expiresAt")?,
        owner: item_str(item, "owner"),
        checkpoint: item_str(item, "checkpoint"),
        is_finished: item_bool(item, "isFinished").unwrap_or(false),
    })
}

/// Lease table over the DynamoDB protocol
pub struct DynamoLeaseStore {
    client: Arc<DynamoClient>,
    table: String,
}

impl DynamoLeaseStore {
    /// Create a store for the named lease table
    pub fn new(client: Arc<DynamoClient>, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    /// One conditional UpdateItem on the lease row, mapping a rejected
    /// condition to `CasOutcome::Conflict`. Every expression name in
    /// `names` must be referenced by the expressions.
    async fn conditional_update(
        &self,
        shard_id: &str,
        update_expression: &str,
        condition_expression: &str,
        names: Value,
        values: Value,
    ) -> Result<CasOutcome> {
        let body = json!({
            "TableName": self.table,
            "Key": { "shardId": attr_s(shard_id) },
            "UpdateExpression": update_expression,
            "ConditionExpression": condition_expression,
            "ExpressionAttributeNames": names,
            "ExpressionAttributeValues": values,
            "ReturnValues": "ALL_NEW"
        });

        match self.client.call("UpdateItem", body).await {
            Ok(payload) => {
                let item = payload
                    .get("Attributes")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let lease = parse_lease(&item).ok_or_else(|| WardenError::MalformedLease {
                    shard_id: shard_id.into(),
                    reason: "UpdateItem returned incomplete attributes".into(),
                })?;
                Ok(CasOutcome::Applied(lease))
            }
            Err(CallFailure::Condition) => {
                debug!("Conditional write on shard {} rejected", shard_id);
                Ok(CasOutcome::Conflict)
            }
            Err(failure) => Err(table_error(&self.table, failure)),
        }
    }
}

#[async_trait::async_trait]
impl LeaseStore for DynamoLeaseStore {
    async fn ensure_table(&self) -> Result<()> {
        self.client.ensure_table(&self.table, "shardId").await
    }

    async fn fetch_all(&self) -> Result<Vec<Lease>> {
        let items = self.client.scan(&self.table).await?;
        let mut leases = Vec::with_capacity(items.len());
        for item in &items {
            match parse_lease(item) {
                Some(lease) => leases.push(lease),
                None => warn!("Skipping malformed lease row in {}", self.table),
            }
        }
        Ok(leases)
    }

    async fn claim_unheld(
        &self,
        shard_id: &str,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<CasOutcome> {
        let expires_at_ms = now_ms() + lease_duration.as_millis() as u64;
        let body = json!({
            "TableName": self.table,
            "Item": {
                "shardId": attr_s(shard_id),
                "leaseCounter": attr_n(0),
                "expiresAt": attr_n(expires_at_ms),
                "owner": attr_s(owner),
                "isFinished": attr_bool(false)
            },
            "ConditionExpression": "attribute_not_exists(shardId)"
        });

        match self.client.call("PutItem", body).await {
            Ok(_) => Ok(CasOutcome::Applied(Lease {
                shard_id: shard_id.into(),
                lease_counter: 0,
                expires_at_ms,
                owner: Some(owner.into()),
                checkpoint: None,
                is_finished: false,
            })),
            Err(CallFailure::Condition) => {
                debug!("Shard {} already has a lease row", shard_id);
                Ok(CasOutcome::Conflict)
            }
            Err(failure) => Err(table_error(&self.table, failure)),
        }
    }

    async fn take_over(
        &self,
        shard_id: &str,
        expected_counter: u64,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<CasOutcome> {
        self.conditional_update(
            shard_id,
            "SET leaseCounter = :next, #owner = :owner, expiresAt = :expires",
            "leaseCounter = :expected",
            json!({ "#owner": "owner" }),
            json!({
                ":expected": attr_n(expected_counter),
                ":next": attr_n(expected_counter + 1),
                ":owner": attr_s(owner),
                ":expires": attr_n(now_ms() + lease_duration.as_millis() as u64)
            }),
        )
        .await
    }

    async fn renew(
        &self,
        shard_id: &str,
        expected_counter: u64,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<CasOutcome> {
        self.conditional_update(
            shard_id,
            "SET leaseCounter = :next, expiresAt = :expires",
            "leaseCounter = :expected AND #owner = :owner",
            json!({ "#owner": "owner" }),
            json!({
                ":expected": attr_n(expected_counter),
                ":next": attr_n(expected_counter + 1),
                ":owner": attr_s(owner),
                ":expires": attr_n(now_ms() + lease_duration.as_millis() as u64)
            }),
        )
        .await
    }

    async fn mark_finished(
        &self,
        shard_id: &str,
        expected_counter: u64,
        owner: &str,
    ) -> Result<CasOutcome> {
        self.conditional_update(
            shard_id,
            "SET leaseCounter = :next, isFinished = :finished",
            "leaseCounter = :expected AND #owner = :owner",
            json!({ "#owner": "owner" }),
            json!({
                ":expected": attr_n(expected_counter),
                ":next": attr_n(expected_counter + 1),
                ":owner": attr_s(owner),
                ":finished": attr_bool(true)
            }),
        )
        .await
    }

    async fn update_checkpoint(
        &self,
        shard_id: &str,
        expected_counter: u64,
        owner: &str,
        checkpoint: &str,
    ) -> Result<CasOutcome> {
        self.conditional_update(
            shard_id,
            "SET #checkpoint = :checkpoint",
            "leaseCounter = :expected AND #owner = :owner",
            json!({ "#owner": "owner", "#checkpoint": "checkpoint" }),
            json!({
                ":expected": attr_n(expected_counter),
                ":owner": attr_s(owner),
                ":checkpoint": attr_s(checkpoint)
            }),
        )
        .await
    }
}

fn parse_member(item: &Map<String, Value>) -> Option<ClusterMember> {
    Some(ClusterMember {
        id: item_str(item, "id")?,
        active_consumers: item_u64(item, "activeConsumers")?,
        expires_at_ms: item_u64(item, "expiresAt")?,
    })
}

/// Cluster-member table over the DynamoDB protocol
pub struct DynamoMemberStore {
    client: Arc<DynamoClient>,
    table: String,
}

impl DynamoMemberStore {
    /// Create a store for the named member table
    pub fn new(client: Arc<DynamoClient>, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

#[async_trait::async_trait]
impl MemberStore for DynamoMemberStore {
    async fn ensure_table(&self) -> Result<()> {
        self.client.ensure_table(&self.table, "id").await
    }

    async fn report(&self, id: &str, active_consumers: u64, ttl: Duration) -> Result<()> {
        let body = json!({
            "TableName": self.table,
            "Item": {
                "id": attr_s(id),
                "activeConsumers": attr_n(active_consumers),
                "expiresAt": attr_n(now_ms() + ttl.as_millis() as u64)
            }
        });

        self.client
            .call("PutItem", body)
            .await
            .map(|_| ())
            .map_err(|f| table_error(&self.table, f))
    }

    async fn fetch_all(&self) -> Result<Vec<ClusterMember>> {
        let items = self.client.scan(&self.table).await?;
        let mut members = Vec::with_capacity(items.len());
        for item in &items {
            match parse_member(item) {
                Some(member) => members.push(member),
                None => warn!("Skipping malformed member row in {}", self.table),
            }
        }
        Ok(members)
    }

    async fn garbage_collect(&self, now_ms: u64) -> Result<usize> {
        let members = self.fetch_all().await?;
        let mut removed = 0;

        for member in members.iter().filter(|m| m.is_expired(now_ms)) {
            let body = json!({
                "TableName": self.table,
                "Key": { "id": attr_s(&member.id) },
                "ConditionExpression": "expiresAt < :now",
                "ExpressionAttributeValues": { ":now": attr_n(now_ms) }
            });

            match self.client.call("DeleteItem", body).await {
                Ok(_) => removed += 1,
                // the member refreshed between scan and delete
                Err(CallFailure::Condition) => {
                    debug!("Member {} refreshed before delete", member.id)
                }
                Err(failure) => return Err(table_error(&self.table, failure)),
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_roundtrip() {
        let mut item = Map::new();
        item.insert("shardId".into(), attr_s("shard-0000"));
        item.insert("leaseCounter".into(), attr_n(7));
        item.insert("expiresAt".into(), attr_n(1_700_000_000_000));
        item.insert("isFinished".into(), attr_bool(false));

        let lease = parse_lease(&item).unwrap();
        assert_eq!(lease.shard_id, "shard-0000");
        assert_eq!(lease.lease_counter, 7);
        assert!(lease.owner.is_none());
        assert!(!lease.is_finished);
    }

    #[test]
    fn test_incomplete_item_rejected() {
        let mut item = Map::new();
        item.insert("shardId".into(), attr_s("shard-0000"));
        assert!(parse_lease(&item).is_none());
    }
}
