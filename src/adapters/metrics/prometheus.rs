//! Prometheus Metrics Registry - Market Observability
//!
//! Registers and exposes Prometheus metrics for Grafana dashboards.
//! Covers emitted events, snapshot persistence and the headline
//! state of the market (users, open predictions, tokens in circulation).

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use prometheus::{
    Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tokio::sync::broadcast;
use tracing::{error, info, instrument};

use crate::domain::state::MarketStats;
use crate::ports::events::{EventSink, MarketEvent};

/// Centralized Prometheus metrics for the market service.
///
/// All metrics follow the naming convention `party_market_*`.
pub struct MarketMetrics {
    /// Prometheus registry.
    registry: Registry,
    /// Events emitted, by event type.
    pub events_emitted: IntCounterVec,
    /// Snapshot writes, by outcome (`ok` / `error`).
    pub snapshot_saves: IntCounterVec,
    /// Registered users (admins included).
    pub users: IntGauge,
    /// Predictions currently open for betting.
    pub open_predictions: IntGauge,
    /// Bets still waiting for a decision.
    pub placed_bets: IntGauge,
    /// Sum of every balance.
    pub tokens_in_circulation: IntGauge,
    /// Entries in the token log.
    pub ledger_entries: IntGauge,
}

impl MarketMetrics {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_emitted = IntCounterVec::new(
            Opts::new("party_market_events_emitted_total", "Market events emitted"),
            &["type"],
        )?;

        let snapshot_saves = IntCounterVec::new(
            Opts::new(
                "party_market_snapshot_saves_total",
                "Snapshot writes by outcome",
            ),
            &["outcome"],
        )?;

        let users = IntGauge::new("party_market_users", "Registered users")?;

        let open_predictions = IntGauge::new(
            "party_market_open_predictions",
            "Predictions open for betting",
        )?;

        let placed_bets = IntGauge::new(
            "party_market_placed_bets",
            "Bets awaiting a decision",
        )?;

        let tokens_in_circulation = IntGauge::new(
            "party_market_tokens_in_circulation",
            "Sum of all user balances",
        )?;

        let ledger_entries = IntGauge::new(
            "party_market_ledger_entries",
            "Entries in the token log",
        )?;

        registry.register(Box::new(events_emitted.clone()))?;
        registry.register(Box::new(snapshot_saves.clone()))?;
        registry.register(Box::new(users.clone()))?;
        registry.register(Box::new(open_predictions.clone()))?;
        registry.register(Box::new(placed_bets.clone()))?;
        registry.register(Box::new(tokens_in_circulation.clone()))?;
        registry.register(Box::new(ledger_entries.clone()))?;

        Ok(Self {
            registry,
            events_emitted,
            snapshot_saves,
            users,
            open_predictions,
            placed_bets,
            tokens_in_circulation,
            ledger_entries,
        })
    }

    /// Refresh the state gauges.
    pub fn observe(&self, stats: &MarketStats) {
        self.users.set(gauge_value(stats.users));
        self.open_predictions.set(gauge_value(stats.open_predictions));
        self.placed_bets.set(gauge_value(stats.placed_bets));
        self.tokens_in_circulation.set(stats.tokens_in_circulation);
        self.ledger_entries.set(gauge_value(stats.ledger_entries));
    }

    /// Count one snapshot write.
    pub fn record_snapshot(&self, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.snapshot_saves.with_label_values(&[outcome]).inc();
    }

    /// Render every metric in the Prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics_self);
                async move {
                    match metrics.render() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => {
                            error!(error = %e, "Failed to encode metrics");
                            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}

impl EventSink for MarketMetrics {
    fn emit(&self, event: MarketEvent) {
        self.events_emitted.with_label_values(&[event.kind()]).inc();
    }
}

fn gauge_value(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_counted_by_type() {
        let metrics = MarketMetrics::new().unwrap();
        metrics.emit(MarketEvent::Predictions);
        metrics.emit(MarketEvent::Predictions);
        metrics.emit(MarketEvent::bets_of("u1"));

        assert_eq!(
            metrics
                .events_emitted
                .with_label_values(&["predictions"])
                .get(),
            2
        );
        assert_eq!(metrics.events_emitted.with_label_values(&["bets"]).get(), 1);
    }

    #[test]
    fn test_observe_and_render() {
        let metrics = MarketMetrics::new().unwrap();
        metrics.observe(&MarketStats {
            users: 3,
            open_predictions: 1,
            placed_bets: 2,
            tokens_in_circulation: 2_500,
            ledger_entries: 9,
        });
        metrics.record_snapshot(true);
        metrics.record_snapshot(false);

        let text = metrics.render().unwrap();
        assert!(text.contains("party_market_tokens_in_circulation 2500"));
        assert!(text.contains("party_market_users 3"));
        assert!(text.contains(r#"party_market_snapshot_saves_total{outcome="error"} 1"#));
    }
}
