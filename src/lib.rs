//! AXON client core
//!
//! The job-lifecycle and reward-tracking core of the AXON desktop client:
//! durable at-least-once activity tracking, multi-endpoint failover,
//! periodic rewards reconciliation, content-addressed dataset transfer,
//! and a best-effort realtime notification channel.
//!
//! The UI layer, wallet connection, and GPU detection live outside this
//! crate and interact with it only through [`tracker::ActivityTracker`],
//! [`rewards::RewardsService`], and the [`notify::Notifier`] seam.

pub mod activity;
pub mod client;
pub mod config;
pub mod error;
pub mod hasher;
pub mod notify;
pub mod realtime;
pub mod rewards;
pub mod store;
pub mod tracker;
pub mod transfer;

pub use error::{ClientError, Result};
