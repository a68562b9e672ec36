use std::sync::Arc;

use mailroute_common::{internal, logging};
use mailroute_delivery::{
    CacheBackend, Dispatcher, DnsResolver, JobPipeline, MemoryMxStore, MxCache, MxStore,
    RedisJobSource, RedisMxStore, RedisPublisher, Reporter, SmtpDelivery,
};
use redis::aio::MultiplexedConnection;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Owns the parsed configuration and wires every component together.
#[derive(Debug)]
pub struct Mailroute {
    config: Config,
    cancel: CancellationToken,
}

async fn connect(url: &str) -> anyhow::Result<MultiplexedConnection> {
    let client = redis::Client::open(url)
        .map_err(|e| anyhow::anyhow!("Invalid Redis URL {url}: {e}"))?;

    client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| anyhow::anyhow!("Unable to connect to Redis at {url}: {e}"))
}

#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    Ok(())
}

impl Mailroute {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Builds the processing pipeline from the configuration.
    ///
    /// The queue gets its own connection since a blocking pop holds it for
    /// as long as the queue is empty.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn dispatcher(&self) -> anyhow::Result<Dispatcher> {
        let config = &self.config;

        let queue = connect(&config.redis.url).await?;
        let shared = connect(config.redis.cache_url()).await?;

        let store: Arc<dyn MxStore> = match config.mx_cache.backend {
            CacheBackend::Redis => {
                Arc::new(RedisMxStore::new(shared.clone(), config.mx_cache.ttl_secs))
            }
            CacheBackend::Memory => Arc::new(MemoryMxStore::new(config.mx_cache.ttl_secs)),
        };

        let resolver = DnsResolver::with_dns_config(config.dns.clone())?;
        let reporter = Reporter::new(
            Arc::new(RedisPublisher::new(shared)),
            config.channels.clone(),
        );

        let pipeline = JobPipeline::new(
            MxCache::new(store, Arc::new(resolver)),
            SmtpDelivery::new(config.delivery.clone()),
            reporter,
        );

        Ok(Dispatcher::new(
            Arc::new(RedisJobSource::new(
                queue,
                config.queue.name.clone(),
                config.queue.poll_timeout(),
            )),
            pipeline,
            config.queue.clone(),
            self.cancel.clone(),
        ))
    }

    /// Run until SIGINT or SIGTERM, then wait for in-flight jobs to finish.
    ///
    /// A second CTRL+C while draining stops waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if Redis cannot be reached or the resolver cannot be
    /// built.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let dispatcher = self.dispatcher().await?;
        internal!(level = INFO, "Controller running");

        let mut running = tokio::spawn(dispatcher.run());

        let finished = tokio::select! {
            r = &mut running => Some(r),
            r = shutdown() => {
                r?;
                None
            }
        };

        let stats = if let Some(r) = finished {
            r?
        } else {
            self.cancel.cancel();
            internal!(level = INFO, "Shutting down...");

            tokio::select! {
                r = &mut running => r?,
                _ = tokio::signal::ctrl_c() => {
                    internal!(level = WARN, "Forced shutdown, abandoning in-flight jobs");
                    running.abort();
                    return Ok(());
                }
            }
        };

        internal!(
            level = INFO,
            "Processed {} of {} received jobs \
             ({} malformed, {} dropped, {} discarded, {} aborted)",
            stats.processed,
            stats.received,
            stats.malformed,
            stats.dropped,
            stats.discarded,
            stats.aborted
        );

        Ok(())
    }
}
