//! Concrete [`cnc_broker_core::Publisher`] implementations.

mod kafka;

pub use kafka::KafkaPublisher;
