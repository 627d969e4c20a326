pub mod error;
pub mod response;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::control::TickLoop;
use crate::domain::{AccountingState, Mode, Override, Plan, TariffPoint, Telemetry};
use crate::forecast::ForecastAggregator;
use crate::repo::{AccountingRepo, InMemoryRepo, PlanRepo, PriceRepo, TelemetryRepo};
use crate::resilience::HealthManager;
use error::ApiError;
use response::ApiResponse;

#[derive(Clone)]
pub struct AppState {
    pub tick: Arc<TickLoop>,
    pub repo: Arc<InMemoryRepo>,
    pub forecast: Arc<ForecastAggregator>,
    pub health: Arc<HealthManager>,
    pub default_history_hours: u32,
    pub sse_hz: f64,
}

pub fn router(state: AppState, cfg: &Config) -> Router {
    let mut router = Router::new()
        .route("/api/telemetry/history", get(telemetry_history))
        .route("/api/prices/history", get(prices_history))
        .route("/api/plan/active", get(plan_active))
        .route("/api/mode", get(get_mode).post(set_mode))
        .route("/api/accounting/summary", get(accounting_summary))
        .route("/api/providers/status", get(providers_status))
        .route("/api/events", get(sse_events))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    if cfg.server.bearer_token != "change-me" {
        router = router.layer(crate::auth::auth_layer(cfg.server.bearer_token.clone()));
    }
    router
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    hours: Option<u32>,
}

async fn telemetry_history(State(state): State<AppState>, Query(q): Query<HistoryQuery>) -> ApiResponse<Vec<Telemetry>> {
    let hours = q.hours.unwrap_or(state.default_history_hours);
    let now = Utc::now();
    let from = now - chrono::Duration::hours(hours as i64);
    let rows = TelemetryRepo::query(state.repo.as_ref(), from, now).await;
    ApiResponse::ok(rows)
}

async fn prices_history(State(state): State<AppState>, Query(q): Query<HistoryQuery>) -> ApiResponse<Vec<TariffPoint>> {
    let hours = q.hours.unwrap_or(state.default_history_hours);
    let now = Utc::now();
    let from = now - chrono::Duration::hours(hours as i64);
    let rows = PriceRepo::query(state.repo.as_ref(), from, now).await;
    ApiResponse::ok(rows)
}

async fn plan_active(State(state): State<AppState>) -> Result<ApiResponse<Plan>, ApiError> {
    match state.tick.current_plan().await {
        Some(plan) => Ok(ApiResponse::ok((*plan).clone())),
        None => Err(ApiError::NotFound("no active plan yet".into())),
    }
}

#[derive(Debug, Serialize)]
struct ModeStatus {
    decision: Option<crate::domain::ArbitratorDecision>,
    override_active: Option<Override>,
}

async fn get_mode(State(state): State<AppState>) -> ApiResponse<ModeStatus> {
    let snapshot = state.tick.subscribe().borrow().clone();
    let override_active = state.tick.current_override().await;
    ApiResponse::ok(ModeStatus {
        decision: snapshot.decision,
        override_active,
    })
}

#[derive(Debug, Deserialize)]
struct SetModeRequest {
    mode: Mode,
    power_w: Option<f64>,
    timeout_s: i64,
}

async fn set_mode(State(state): State<AppState>, Json(req): Json<SetModeRequest>) -> Result<ApiResponse<()>, ApiError> {
    if req.timeout_s <= 0 {
        return Err(ApiError::BadRequest("timeout_s must be positive".into()));
    }
    let expires_at = Utc::now() + chrono::Duration::seconds(req.timeout_s);
    state
        .tick
        .set_override(Some(Override {
            mode: req.mode,
            power_w: req.power_w,
            expires_at,
        }))
        .await;
    Ok(ApiResponse::ok(()))
}

async fn accounting_summary(State(state): State<AppState>) -> Result<ApiResponse<AccountingState>, ApiError> {
    state
        .repo
        .current_cycle()
        .await
        .map(ApiResponse::ok)
        .ok_or_else(|| ApiError::NotFound("no accounting cycle recorded yet".into()))
}

#[derive(Debug, Serialize)]
struct ProviderStatus {
    name: String,
    healthy: bool,
    consecutive_failures: u32,
}

async fn providers_status(State(state): State<AppState>) -> ApiResponse<Vec<ProviderStatus>> {
    let now = Utc::now();
    let forecast_health = state.forecast.provider_health(now).await;
    let mut out: Vec<ProviderStatus> = forecast_health
        .into_iter()
        .map(|(name, h)| ProviderStatus {
            name: name.to_string(),
            healthy: h.healthy,
            consecutive_failures: h.consecutive_failures,
        })
        .collect();
    let inverter_health = state.health.health("inverter").await;
    out.push(ProviderStatus {
        name: "inverter".into(),
        healthy: inverter_health.healthy,
        consecutive_failures: inverter_health.consecutive_failures,
    });
    ApiResponse::ok(out)
}

async fn sse_events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.tick.subscribe();
    let period = Duration::from_secs_f64(1.0 / state.sse_hz.clamp(1.0, 5.0));
    let interval = tokio::time::interval(period);
    let stream = futures::stream::unfold((rx, interval), |(rx, mut interval)| async move {
        interval.tick().await;
        let snapshot = rx.borrow().clone();
        let event = match Event::default().json_data(&snapshot) {
            Ok(e) => e,
            Err(_) => Event::default().data("{}"),
        };
        Some((Ok(event), (rx, interval)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_query_defaults_to_none() {
        let q: HistoryQuery = serde_json::from_str("{}").unwrap();
        assert!(q.hours.is_none());
    }
}
