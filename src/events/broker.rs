//! Broker seam: keyed, partitioned topics with consumer-group offsets

use crate::error::AclResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One record handed to a consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: String,
}

/// Message broker
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a record to the partition chosen by `key`
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> AclResult<()>;

    /// Open a subscription that resumes from the group's committed offsets
    async fn subscribe(&self, topic: &str, group: &str) -> AclResult<Box<dyn Subscription>>;
}

/// A consumer-group cursor over one topic
#[async_trait]
pub trait Subscription: Send + Sync {
    fn topic(&self) -> &str;

    /// Wait for the next record
    async fn fetch(&mut self) -> AclResult<Delivery>;

    /// Next record if one is ready
    async fn try_fetch(&mut self) -> AclResult<Option<Delivery>>;

    /// Mark the record and everything before it in its partition as done
    async fn commit(&mut self, delivery: &Delivery) -> AclResult<()>;

    /// Move the read position back so `delivery` is fetched again
    fn rewind(&mut self, delivery: &Delivery);
}

/// Partition for a key: same key, same partition
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    let mut head = [0u8; 4];
    head.copy_from_slice(&digest[..4]);
    u32::from_be_bytes(head) % partitions.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_stable_and_bounded() {
        for key in ["a", "team-1", "3f0c1d2e-0000-4000-8000-000000000000"] {
            let p = partition_for(key, 4);
            assert!(p < 4);
            assert_eq!(p, partition_for(key, 4));
        }
        assert_eq!(partition_for("anything", 0), 0);
    }

    fn shareable<T: Send + Sync + ?Sized>() {}

    #[test]
    fn subscriptions_are_shareable_across_tasks() {
        // Consumer loops borrow themselves across handler awaits inside tokio::spawn
        shareable::<dyn Subscription>();
        shareable::<crate::consumer::ConsumerLoop>();
    }
}
