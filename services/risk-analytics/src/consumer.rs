//! Stream consumer: order intake with at-least-once delivery
//!
//! Reads batches from the order stream with consumer-group semantics,
//! runs the scorer per message, persists the result, and acknowledges
//! only after the persist succeeds. A message that fails anywhere
//! between parse and persist stays pending for redelivery; transport
//! errors back the loop off without terminating it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use types::errors::{AnalyticsError, ConsumerError};
use types::order::Order;

use crate::metrics::ServiceMetrics;
use crate::scorer::RiskScorer;
use crate::store::AnalysisStore;

/// Consumer lifecycle, advanced once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connected,
    GroupEnsured,
    Consuming,
}

/// Stream-transport configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub redis_url: String,
    pub stream_name: String,
    pub consumer_group: String,
    pub consumer_name: String,
    /// Messages fetched per poll.
    pub batch_size: usize,
    /// How long an empty poll blocks before returning.
    pub block_ms: u64,
    /// Delay before retrying after a transport error.
    pub retry_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            stream_name: "orders:stream".to_string(),
            consumer_group: "analytics-group".to_string(),
            consumer_name: "analytics-consumer-1".to_string(),
            batch_size: 10,
            block_ms: 1000,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Order-stream consumer with consumer-group semantics.
pub struct StreamConsumer {
    config: ConsumerConfig,
    scorer: Arc<RiskScorer>,
    store: AnalysisStore,
    metrics: Arc<ServiceMetrics>,
    running: AtomicBool,
    state: std::sync::Mutex<ConsumerState>,
}

impl StreamConsumer {
    pub fn new(
        config: ConsumerConfig,
        scorer: Arc<RiskScorer>,
        store: AnalysisStore,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            config,
            scorer,
            store,
            metrics,
            running: AtomicBool::new(false),
            state: std::sync::Mutex::new(ConsumerState::Disconnected),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConsumerState {
        *self.state.lock().expect("consumer state poisoned")
    }

    fn set_state(&self, state: ConsumerState) {
        *self.state.lock().expect("consumer state poisoned") = state;
        debug!(state = ?state, "consumer state changed");
    }

    /// Request the poll loop to exit at its next iteration boundary.
    /// In-flight message processing completes first.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        info!("consumer stop requested");
    }

    /// Connect, verify, ensure the consumer group, then poll until
    /// stopped. Connection and group-setup failures are fatal; poll
    /// failures back off and retry.
    pub async fn run(&self) -> Result<(), ConsumerError> {
        self.running.store(true, Ordering::Relaxed);

        let client = redis::Client::open(self.config.redis_url.as_str())
            .map_err(|e| ConsumerError::Connection(e.to_string()))?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| ConsumerError::Connection(e.to_string()))?;

        // Verify connectivity before touching the stream
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| ConsumerError::Connection(e.to_string()))?;
        if pong != "PONG" {
            return Err(ConsumerError::Connection(format!(
                "unexpected PING response: {pong}"
            )));
        }
        self.set_state(ConsumerState::Connected);
        info!(stream = %self.config.stream_name, "connected to stream transport");

        self.ensure_group(&mut conn).await?;
        self.set_state(ConsumerState::GroupEnsured);

        self.set_state(ConsumerState::Consuming);
        info!(
            group = %self.config.consumer_group,
            consumer = %self.config.consumer_name,
            "starting message consumption"
        );
        self.consume_loop(&mut conn).await;

        self.set_state(ConsumerState::Disconnected);
        info!("consumer stopped");
        Ok(())
    }

    /// Create the consumer group at the beginning of the stream,
    /// creating the stream too if absent. An already-existing group
    /// is success; anything else is fatal.
    async fn ensure_group(&self, conn: &mut ConnectionManager) -> Result<(), ConsumerError> {
        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(
                self.config.stream_name.as_str(),
                self.config.consumer_group.as_str(),
                "0",
            )
            .await;

        match created {
            Ok(()) => {
                info!(group = %self.config.consumer_group, "created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                info!(group = %self.config.consumer_group, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(ConsumerError::GroupSetup(e.to_string())),
        }
    }

    async fn consume_loop(&self, conn: &mut ConnectionManager) {
        let options = StreamReadOptions::default()
            .group(
                self.config.consumer_group.as_str(),
                self.config.consumer_name.as_str(),
            )
            .count(self.config.batch_size)
            .block(self.config.block_ms as usize);

        while self.running.load(Ordering::Relaxed) {
            let reply: Result<StreamReadReply, redis::RedisError> = conn
                .xread_options(&[self.config.stream_name.as_str()], &[">"], &options)
                .await;

            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    error!(error = %e, "poll failed, backing off");
                    self.metrics.record_poll_error();
                    sleep(self.config.retry_backoff).await;
                    continue;
                }
            };

            for key in reply.keys {
                for message in key.ids {
                    let fields = string_fields(&message.map);
                    match self.process_message(&message.id, &fields).await {
                        Ok(()) => self.acknowledge(conn, &message.id).await,
                        Err(e) => {
                            // Not acknowledged: the message stays
                            // pending and will be redelivered
                            warn!(
                                message_id = %message.id,
                                error = %e,
                                "message processing failed, left pending"
                            );
                        }
                    }
                }
            }
        }
    }

    /// Parse, score, and persist one message. Any error leaves the
    /// message unacknowledged.
    async fn process_message(
        &self,
        message_id: &str,
        fields: &HashMap<String, String>,
    ) -> Result<(), AnalyticsError> {
        debug!(message_id, "processing message");

        let order = Order::from_stream_fields(fields).map_err(|e| {
            self.metrics.record_parse_failure();
            e
        })?;

        let analysis = self.scorer.analyze(&order).await;
        self.store.put(&analysis, message_id).await.map_err(|e| {
            self.metrics.record_store_failure();
            e
        })?;

        self.metrics
            .record_analysis(analysis.verdict, analysis.processing_time_ms);
        info!(
            order_id = %analysis.order_id,
            verdict = analysis.verdict.as_str(),
            score = analysis.risk_score,
            "order processed"
        );
        Ok(())
    }

    async fn acknowledge(&self, conn: &mut ConnectionManager, message_id: &str) {
        let acked: Result<i64, redis::RedisError> = conn
            .xack(
                self.config.stream_name.as_str(),
                self.config.consumer_group.as_str(),
                &[message_id],
            )
            .await;

        match acked {
            Ok(_) => self.metrics.record_ack(),
            Err(e) => {
                // The result is already persisted; redelivery will
                // overwrite it idempotently
                warn!(message_id, error = %e, "acknowledgment failed");
            }
        }
    }
}

/// Flatten a raw stream entry into string fields. Non-string values
/// are dropped and surface downstream as missing-field parse errors.
fn string_fields(map: &HashMap<String, redis::Value>) -> HashMap<String, String> {
    map.iter()
        .filter_map(|(k, v)| {
            redis::from_redis_value::<String>(v)
                .ok()
                .map(|s| (k.clone(), s))
        })
        .collect()
}
