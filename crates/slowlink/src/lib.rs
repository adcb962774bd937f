//! Roles of the slowlink slow-telemetry fabric.
//!
//! A [`Publisher`] pushes heartbeat and data frames to one [`Aggregator`],
//! which keeps the live directory and the durable log. A [`Subscriber`]
//! follows the directory and attaches directly to every live publisher.
//! Each role composes a single-threaded reactor with its handler; driving
//! the role is one `serve(timeout)` call per loop iteration.

mod aggregator;
mod config;
mod error;
mod publisher;
mod repeater;
mod ring;
mod subscriber;

pub use aggregator::Aggregator;
pub use config::{
    AggregatorConfig, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_ROTATE_THRESHOLD, ENTRY_TTL_MINUTES,
    PUBLISHER_INBOX_LEN, PublisherConfig, SUBSCRIBER_BUFFER_LEN, SubscriberConfig,
};
pub use error::FabricError;
pub use publisher::Publisher;
pub use repeater::Repeater;
pub use ring::Ring;
pub use subscriber::Subscriber;

pub use slowlink_net::{Handler, NetError, Server, StreamId, StreamSet};
pub use slowlink_wire::{Entry, Message, Snapshot, SnapshotDiff, StatusColor};
