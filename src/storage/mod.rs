//! Storage backends for the lease and cluster-member tables
//!
//! `dynamo` speaks the DynamoDB JSON protocol against a compatible
//! endpoint; `memory` backs tests and simulation.

pub mod dynamo;
pub mod memory;

pub use dynamo::{DynamoClient, DynamoConfig, DynamoLeaseStore, DynamoMemberStore};
pub use memory::{MemoryLeaseStore, MemoryMemberStore};
