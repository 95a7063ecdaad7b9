use std::time::Duration;

use async_trait::async_trait;
use health::HealthHandle;
use metrics::{counter, gauge};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::{debug, error, info, instrument};

use crate::api::PublishError;
use crate::config::KafkaConfig;
use crate::sinks::WindowSink;

struct KafkaContext {
    liveness: HealthHandle,
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy();

        gauge!("accept_kafka_callback_queue_depth").set(stats.replyq as f64);
        gauge!("accept_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("accept_kafka_producer_queue_depth_limit").set(stats.msg_max as f64);
        gauge!("accept_kafka_producer_queue_bytes").set(stats.msg_size as f64);
        gauge!("accept_kafka_producer_queue_bytes_limit").set(stats.msg_size_max as f64);

        for (_, stats) in stats.brokers {
            let id_string = format!("{}", stats.nodeid);
            gauge!("accept_kafka_broker_requests_pending", "broker" => id_string.clone())
                .set(stats.outbuf_cnt as f64);
            gauge!("accept_kafka_broker_responses_awaiting", "broker" => id_string.clone())
                .set(stats.waitresp_cnt as f64);
            counter!("accept_kafka_broker_tx_errors_total", "broker" => id_string.clone())
                .absolute(stats.txerrs);
            counter!("accept_kafka_broker_rx_errors_total", "broker" => id_string)
                .absolute(stats.rxerrs);
        }
    }
}

/// Produces each window count to a single topic as a decimal string,
/// without a key. Delivery is at-most-once: failures are reported to the
/// caller and never retried here beyond rdkafka's own retries.
#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaSink {
    pub fn new(config: KafkaConfig, liveness: HealthHandle) -> anyhow::Result<KafkaSink> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set("compression.codec", &config.kafka_compression_codec);

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer<KafkaContext> =
            client_config.create_with_context(KafkaContext { liveness })?;

        // Ping the cluster to make sure we can reach brokers, fail after 10 seconds
        drop(producer.client().fetch_metadata(
            Some("__consumer_offsets"),
            Timeout::After(Duration::new(10, 0)),
        )?);
        info!("connected to Kafka brokers");

        Ok(KafkaSink {
            producer,
            topic: config.kafka_topic,
        })
    }
}

#[async_trait]
impl WindowSink for KafkaSink {
    #[instrument(skip(self))]
    async fn publish(&self, count: u64) -> Result<(), PublishError> {
        let payload = count.to_string();

        let delivery = self
            .producer
            .send_result(FutureRecord::<(), String>::to(&self.topic).payload(&payload))
            .map_err(|(e, _)| {
                error!("failed to enqueue window count: {}", e);
                PublishError::Produce(e.to_string())
            })?;

        match delivery.await {
            Err(_) => {
                // Cancelled due to timeout while retrying
                error!("failed to produce to Kafka before write timeout");
                Err(PublishError::AckTimeout)
            }
            Ok(Err((err, _))) => {
                error!("failed to produce to Kafka: {}", err);
                Err(PublishError::Produce(err.to_string()))
            }
            Ok(Ok((partition, offset))) => {
                info!(
                    "window count sent to Kafka partition {} at offset {}",
                    partition, offset
                );
                Ok(())
            }
        }
    }
}
