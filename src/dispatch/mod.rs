//! Queue-backed batched dispatch: broker seams, the per-channel batch consumer
//! and the connection supervisor that keeps it attached.

pub mod batch;
pub mod broker;
pub mod supervisor;

pub use batch::{BatchSettings, ChannelConsumer, FlushReport};
pub use broker::{Acknowledger, Broker, ConsumerSession, Delivery, QueuePublisher};
pub use supervisor::ConnectionSupervisor;
