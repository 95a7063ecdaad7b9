use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use health::{ComponentStatus, HealthRegistry};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::accept::AcceptService;
use crate::callback::CallbackNotifier;
use crate::config::Config;
use crate::dedup::DedupGate;
use crate::prometheus::setup_metrics_recorder;
use crate::publisher::WindowPublisher;
use crate::redis::RedisClient;
use crate::router;
use crate::sinks::kafka::KafkaSink;
use crate::sinks::print::PrintSink;
use crate::sinks::WindowSink;
use crate::window::WindowCounter;

fn create_sink(
    config: &Config,
    liveness: &HealthRegistry,
) -> anyhow::Result<Arc<dyn WindowSink + Send + Sync>> {
    if config.print_sink {
        // Print sink is only used for local debug, don't allow a container with it to run on prod
        liveness
            .register("print_sink", Duration::from_secs(30))
            .report_status(ComponentStatus::Unhealthy);

        Ok(Arc::new(PrintSink {}))
    } else {
        let sink_liveness = liveness.register("rdkafka", Duration::from_secs(30));
        Ok(Arc::new(KafkaSink::new(config.kafka.clone(), sink_liveness)?))
    }
}

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.validate()?;
    let liveness = HealthRegistry::new("liveness");

    let redis_client = RedisClient::new(
        config.redis_url.clone(),
        Duration::from_millis(config.redis_timeout_ms),
    )
    .await?;
    let gate = DedupGate::new(
        Arc::new(redis_client),
        config.dedup_key_prefix.clone(),
        Duration::from_secs(config.dedup_ttl_secs),
    );

    let counter = Arc::new(WindowCounter::new());
    let notifier = CallbackNotifier::new(
        Duration::from_millis(config.callback_timeout_ms),
        config.callback_max_concurrency,
        config.callback_count_policy,
    )?;
    let service = Arc::new(AcceptService::new(gate, counter.clone(), notifier));

    let window_interval = Duration::from_secs(config.window_interval_secs);
    let publisher = WindowPublisher::new(
        counter,
        create_sink(&config, &liveness)?,
        window_interval,
        liveness.register("window_publisher", window_interval * 2),
    );
    let stop_publisher = CancellationToken::new();
    let publisher_task = tokio::spawn(publisher.run(stop_publisher.clone()));

    let metrics = match config.export_prometheus {
        true => Some(setup_metrics_recorder()?),
        false => None,
    };
    let app = router::router(service.clone(), liveness, metrics);

    info!("listening on {:?}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("http server stopped, shutting down background tasks");
    stop_publisher.cancel();
    if let Err(err) = publisher_task.await {
        error!("window publisher task failed: {}", err);
    }
    service
        .notifier()
        .shutdown(Duration::from_millis(config.shutdown_grace_ms))
        .await;

    Ok(())
}
