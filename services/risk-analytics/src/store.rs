//! Result store: persisted risk analyses and group introspection
//!
//! Each analysis is written as a flat field hash at
//! `analysis:<orderId>` with a fixed expiry, so a redelivered message
//! simply overwrites its own record. The connection is established
//! lazily on first use and shared by every clone of the handle.

use std::collections::HashMap;
use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::streams::StreamInfoGroupsReply;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tracing::debug;

use types::analysis::{RiskAnalysis, Verdict};
use types::errors::StoreError;
use types::ids::{OrderId, Symbol, UserId};
use types::order::parse_timestamp;

/// Keyed store of analysis results with a fixed expiry.
#[derive(Clone)]
pub struct AnalysisStore {
    client: redis::Client,
    conn: Arc<OnceCell<ConnectionManager>>,
    stream_name: String,
    consumer_group: String,
    ttl_secs: u64,
}

impl AnalysisStore {
    /// Build a handle. No connection is made until first use.
    pub fn new(
        redis_url: &str,
        stream_name: &str,
        consumer_group: &str,
        ttl_secs: u64,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(|e| StoreError::Write {
            key: redis_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            client,
            conn: Arc::new(OnceCell::new()),
            stream_name: stream_name.to_string(),
            consumer_group: consumer_group.to_string(),
            ttl_secs,
        })
    }

    async fn conn(&self) -> Result<ConnectionManager, StoreError> {
        self.conn
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await
            .map(Clone::clone)
            .map_err(|e| StoreError::Write {
                key: "<connection>".to_string(),
                reason: e.to_string(),
            })
    }

    fn key(order_id: &OrderId) -> String {
        format!("analysis:{order_id}")
    }

    /// Persist an analysis keyed by order id. Overwrites any previous
    /// record for the same order (idempotent per key).
    pub async fn put(&self, analysis: &RiskAnalysis, message_id: &str) -> Result<(), StoreError> {
        let key = Self::key(&analysis.order_id);
        let fields = encode_fields(analysis, message_id)?;

        let mut conn = self.conn().await?;
        let _: () = conn
            .hset_multiple(&key, &fields)
            .await
            .map_err(|e| StoreError::Write {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        let _: () = redis::cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Write {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        debug!(key = %key, ttl_secs = self.ttl_secs, "analysis stored");
        Ok(())
    }

    /// Fetch a stored analysis by order id.
    pub async fn get(&self, order_id: &OrderId) -> Result<Option<RiskAnalysis>, StoreError> {
        let key = Self::key(order_id);
        let mut conn = self.conn().await?;

        let map: HashMap<String, String> =
            conn.hgetall(&key).await.map_err(|e| StoreError::Read {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        if map.is_empty() {
            return Ok(None);
        }
        decode_fields(&key, &map).map(Some)
    }

    /// Unacknowledged message count for the consumer group.
    pub async fn pending_count(&self) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        let reply: StreamInfoGroupsReply = conn
            .xinfo_groups(self.stream_name.as_str())
            .await
            .map_err(|e| StoreError::Read {
                key: self.stream_name.clone(),
                reason: e.to_string(),
            })?;

        Ok(reply
            .groups
            .iter()
            .find(|g| g.name == self.consumer_group)
            .map(|g| g.pending as u64)
            .unwrap_or(0))
    }
}

fn encode_fields(
    analysis: &RiskAnalysis,
    message_id: &str,
) -> Result<Vec<(String, String)>, StoreError> {
    let reasons = serde_json::to_string(&analysis.reasons).map_err(|e| StoreError::Write {
        key: AnalysisStore::key(&analysis.order_id),
        reason: e.to_string(),
    })?;

    Ok(vec![
        ("orderId".to_string(), analysis.order_id.to_string()),
        ("userId".to_string(), analysis.user_id.to_string()),
        ("symbol".to_string(), analysis.symbol.to_string()),
        ("verdict".to_string(), analysis.verdict.as_str().to_string()),
        ("riskScore".to_string(), analysis.risk_score.to_string()),
        ("volatility".to_string(), analysis.volatility.to_string()),
        ("slippage".to_string(), analysis.slippage.to_string()),
        ("reasons".to_string(), reasons),
        (
            "processingTimeMs".to_string(),
            analysis.processing_time_ms.to_string(),
        ),
        ("timestamp".to_string(), analysis.timestamp.to_rfc3339()),
        ("messageId".to_string(), message_id.to_string()),
    ])
}

fn decode_fields(key: &str, map: &HashMap<String, String>) -> Result<RiskAnalysis, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        key: key.to_string(),
        reason,
    };
    let field = |name: &str| {
        map.get(name)
            .cloned()
            .ok_or_else(|| corrupt(format!("missing field {name}")))
    };

    let verdict_raw = field("verdict")?;
    let verdict = Verdict::parse(&verdict_raw)
        .ok_or_else(|| corrupt(format!("unknown verdict {verdict_raw:?}")))?;
    let reasons: Vec<String> = serde_json::from_str(&field("reasons")?)
        .map_err(|e| corrupt(format!("bad reasons list: {e}")))?;
    let timestamp = parse_timestamp(&field("timestamp")?)
        .map_err(|e| corrupt(format!("bad timestamp: {e}")))?;

    let parse_f64 = |name: &str| -> Result<f64, StoreError> {
        field(name)?
            .parse::<f64>()
            .map_err(|e| corrupt(format!("bad number in {name}: {e}")))
    };
    let processing_time_ms = field("processingTimeMs")?
        .parse::<u64>()
        .map_err(|e| corrupt(format!("bad number in processingTimeMs: {e}")))?;

    Ok(RiskAnalysis {
        order_id: OrderId::new(field("orderId")?),
        user_id: UserId::new(field("userId")?),
        symbol: Symbol::new(field("symbol")?),
        risk_score: parse_f64("riskScore")?,
        verdict,
        volatility: parse_f64("volatility")?,
        slippage: parse_f64("slippage")?,
        reasons,
        processing_time_ms,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_analysis() -> RiskAnalysis {
        RiskAnalysis {
            order_id: OrderId::new("ord-9"),
            user_id: UserId::new("user-9"),
            symbol: Symbol::new("BTC-USD"),
            risk_score: 45.0,
            verdict: Verdict::Warn,
            volatility: 0.0712,
            slippage: 0.00185,
            reasons: vec![
                "Moderate risk score: 45.0/100".to_string(),
                "High volatility detected: 7.12%".to_string(),
            ],
            processing_time_ms: 3,
            timestamp: "2024-05-01T10:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_flat_hash_roundtrip() {
        let analysis = sample_analysis();
        let fields = encode_fields(&analysis, "1700000000000-0").unwrap();
        let map: HashMap<String, String> = fields.into_iter().collect();

        assert_eq!(map["messageId"], "1700000000000-0");
        assert_eq!(map["verdict"], "WARN");

        let decoded = decode_fields("analysis:ord-9", &map).unwrap();
        assert_eq!(decoded, analysis);
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        let analysis = sample_analysis();
        let mut map: HashMap<String, String> = encode_fields(&analysis, "1-0")
            .unwrap()
            .into_iter()
            .collect();
        map.remove("riskScore");

        let err = decode_fields("analysis:ord-9", &map).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_decode_rejects_unknown_verdict() {
        let analysis = sample_analysis();
        let mut map: HashMap<String, String> = encode_fields(&analysis, "1-0")
            .unwrap()
            .into_iter()
            .collect();
        map.insert("verdict".to_string(), "SHRUG".to_string());

        let err = decode_fields("analysis:ord-9", &map).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    // Requires a running Redis at the default url.
    #[tokio::test]
    #[ignore]
    async fn test_put_get_and_overwrite() {
        let store = AnalysisStore::new(
            "redis://127.0.0.1:6379/0",
            "orders:store-test",
            "analytics-test-group",
            60,
        )
        .unwrap();

        let analysis = sample_analysis();
        store.put(&analysis, "1-0").await.unwrap();

        let stored = store.get(&analysis.order_id).await.unwrap().unwrap();
        assert_eq!(stored, analysis);

        // Redelivery overwrites the same key without error
        store.put(&analysis, "1-1").await.unwrap();
        let again = store.get(&analysis.order_id).await.unwrap().unwrap();
        assert_eq!(again.order_id, analysis.order_id);

        assert!(store.get(&OrderId::new("never-seen")).await.unwrap().is_none());
    }
}
