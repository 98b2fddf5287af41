//! PubSub configuration model: connection, writer group, published dataset
//! and the runtime value updater.

pub mod address_space;
pub mod catalog;
pub mod connection;
pub mod context;
pub mod dataset;
pub mod error;
pub mod storage;
pub mod strategy;
pub mod updater;

pub use context::{FrameBuilder, PublisherContext};
pub use error::ConfigError;
pub use strategy::RtLevel;
