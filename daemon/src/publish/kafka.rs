use async_trait::async_trait;
use cnc_broker_core::Publisher;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;

/// Kafka-backed [`Publisher`], wrapping a single [`FutureProducer`] bound to
/// one topic — the async equivalent of the original service's
/// `kafka.Writer` wrapper (`kafka.TCP(broker)` + `LeastBytes` balancer).
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(broker: &str, topic: &str) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", broker)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn send(&self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        let record = FutureRecord::to(&self.topic).key(key).payload(value);
        match self.producer.send(record, Duration::from_secs(0)).await {
            Ok(_) => Ok(()),
            Err((err, _owned_msg)) => Err(anyhow::anyhow!(err)),
        }
    }

    async fn close(&self) {
        // FutureProducer flushes in its own Drop; an explicit flush here
        // just bounds how long shutdown waits for in-flight deliveries.
        let _ = self.producer.flush(Duration::from_secs(5));
    }
}
