//! aclsync - access-control resolution and cache sync
//!
//! Resolves effective team roles and folder/note access levels, caches
//! team lookups cache-aside, and keeps derived ACL and membership
//! projections current from team-activity and asset-change events.

pub mod access;
pub mod cache;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod error;
pub mod events;
pub mod resolver;
pub mod service;
pub mod store;
pub mod ui;

pub use error::{AclError, AclResult};
