use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use risk_analytics::api::{create_router, AppState};
use risk_analytics::behavior::UserBehaviorTracker;
use risk_analytics::config::Settings;
use risk_analytics::consumer::{ConsumerConfig, StreamConsumer};
use risk_analytics::feed::{run_price_feed, FeedConfig, PriceSimulator};
use risk_analytics::metrics::ServiceMetrics;
use risk_analytics::scorer::{RiskScorer, ScorerConfig};
use risk_analytics::store::AnalysisStore;
use risk_analytics::volatility::{EngineConfig, VolatilityEngine};
use risk_analytics::SERVICE_NAME;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::load()?;
    tracing::info!(service = SERVICE_NAME, "starting risk analytics service");

    // Shared state
    let engine = Arc::new(VolatilityEngine::new(
        EngineConfig {
            window_minutes: settings.volatility_window_minutes,
            ..EngineConfig::default()
        },
        settings.starting_price,
    ));
    let tracker = Arc::new(UserBehaviorTracker::new());
    let scorer = Arc::new(RiskScorer::new(
        engine.clone(),
        tracker.clone(),
        ScorerConfig {
            high_volatility_threshold: settings.high_volatility_threshold,
            extreme_volatility_threshold: settings.extreme_volatility_threshold,
            ..ScorerConfig::default()
        },
    ));
    let metrics = Arc::new(ServiceMetrics::new());
    let store = AnalysisStore::new(
        &settings.redis_url,
        &settings.stream_name,
        &settings.consumer_group,
        settings.result_ttl_secs,
    )?;

    // Price feed task
    let simulator = PriceSimulator::new(FeedConfig {
        tick_interval: Duration::from_secs(settings.price_tick_interval_secs),
        volatility_factor: settings.volatility_factor,
        seed: settings.feed_seed,
    });
    let feed_stop = Arc::new(AtomicBool::new(false));
    let feed_task = tokio::spawn(run_price_feed(
        engine.clone(),
        simulator,
        feed_stop.clone(),
    ));

    // Stream consumer task
    let consumer = Arc::new(StreamConsumer::new(
        ConsumerConfig {
            redis_url: settings.redis_url.clone(),
            stream_name: settings.stream_name.clone(),
            consumer_group: settings.consumer_group.clone(),
            consumer_name: settings.consumer_name.clone(),
            batch_size: settings.batch_size,
            block_ms: settings.block_ms,
            retry_backoff: Duration::from_secs(settings.retry_backoff_secs),
        },
        scorer.clone(),
        store.clone(),
        metrics.clone(),
    ));
    let consumer_task = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.run().await })
    };

    // HTTP read-side
    let state = AppState {
        engine,
        scorer,
        tracker,
        store,
        metrics,
    };
    let app = create_router(state);
    let addr: SocketAddr = settings.bind_address.parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);

    let server = axum::serve(listener, app).into_future();
    tokio::select! {
        result = server => result?,
        result = consumer_task => {
            // Fatal consumer startup failure (connect/group setup)
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    // Cooperative shutdown: both loops observe their flag at the
    // next suspension boundary
    consumer.stop();
    feed_stop.store(true, std::sync::atomic::Ordering::Relaxed);
    let _ = feed_task.await;

    tracing::info!("risk analytics service stopped");
    Ok(())
}
