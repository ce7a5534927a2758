//! # Prometheus Metrics
//!
//! Round and connectivity metrics, scraped at `GET /metrics`.
//!
//! Round metrics are driven by [`RoundEvent`]s from the scheduler;
//! connection and peer gauges are sampled periodically from the node.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use trustmesh_protocol::consensus::RoundEvent;
use trustmesh_protocol::node::Node;

/// How often connection and peer gauges are refreshed.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    pub rounds_finalized_total: IntCounter,
    pub rounds_failed_total: IntCounter,
    pub current_round: IntGauge,
    pub open_connections: IntGauge,
    pub known_peers: IntGauge,
    pub last_winner_score: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let metric = IntCounter::new(name, help)?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let metric = IntGauge::new(name, help)?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl NodeMetrics {
    /// Create and register every metric under the `trustmesh` prefix.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("trustmesh".into()), None)?;
        Ok(Self {
            rounds_finalized_total: counter(
                &registry,
                "rounds_finalized_total",
                "Rounds that committed a winner",
            )?,
            rounds_failed_total: counter(
                &registry,
                "rounds_failed_total",
                "Rounds that ended without a committed winner",
            )?,
            current_round: gauge(&registry, "current_round", "Most recently started round")?,
            open_connections: gauge(
                &registry,
                "open_connections",
                "Authenticated peer connections",
            )?,
            known_peers: gauge(&registry, "known_peers", "Entries in the peer directory")?,
            last_winner_score: gauge(
                &registry,
                "last_winner_score",
                "Tally of the most recently committed winner",
            )?,
            registry,
        })
    }

    pub fn observe(&self, event: &RoundEvent) {
        match event {
            RoundEvent::Started(round) => self.current_round.set(*round as i64),
            RoundEvent::Finalized(outcome) => {
                self.rounds_finalized_total.inc();
                self.last_winner_score.set(outcome.score as i64);
            }
            RoundEvent::Failed { .. } => self.rounds_failed_total.inc(),
        }
    }

    /// Encode every registered metric in the Prometheus text format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Renders `/metrics`.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

pub fn router(metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Serve `/metrics` on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    metrics: SharedMetrics,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

/// Feed round events and periodic node samples into `metrics`.
pub async fn track(
    metrics: SharedMetrics,
    node: Arc<Node>,
    mut events: broadcast::Receiver<RoundEvent>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            event = events.recv() => match event {
                Ok(event) => metrics.observe(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "metrics fell behind round events");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = ticker.tick() => {
                metrics.open_connections.set(node.connection_count() as i64);
                match node.known_peers() {
                    Ok(count) => metrics.known_peers.set(count as i64),
                    Err(e) => tracing::warn!(error = %e, "peer count unavailable"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustmesh_protocol::consensus::{ProposalHash, RoundOutcome};
    use trustmesh_protocol::crypto::NodeId;

    #[test]
    fn events_update_round_metrics() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.observe(&RoundEvent::Started(41));
        metrics.observe(&RoundEvent::Finalized(RoundOutcome {
            round: 41,
            winner: ProposalHash([1u8; 32]),
            proposer: NodeId([2u8; 32]),
            score: 4_321,
            proposals: 3,
        }));
        metrics.observe(&RoundEvent::Failed {
            round: 42,
            reason: "disk full".into(),
        });

        assert_eq!(metrics.current_round.get(), 41);
        assert_eq!(metrics.rounds_finalized_total.get(), 1);
        assert_eq!(metrics.rounds_failed_total.get(), 1);
        assert_eq!(metrics.last_winner_score.get(), 4_321);
    }

    #[test]
    fn encode_uses_prefix() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.open_connections.set(3);
        let text = metrics.encode().unwrap();
        assert!(text.contains("trustmesh_open_connections 3"));
        assert!(text.contains("trustmesh_rounds_finalized_total 0"));
    }
}
