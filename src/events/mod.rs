//! Domain events: envelopes, brokers and the outbound publisher

mod broker;
mod envelope;
mod memory;
mod publisher;
mod spool;

pub use broker::{partition_for, Broker, Delivery, Subscription};
pub use envelope::{
    decode, AssetAction, AssetEvent, AssetEventType, AssetType, TeamEvent, TeamEventType,
};
pub use memory::MemoryBroker;
pub use publisher::{EventPublisher, PublisherStatsSnapshot};
pub use spool::{SpoolBroker, TopicStatus};
