//! Ties every subsystem into the 5-minute control tick (§4.6): read
//! telemetry, settle accounting for the elapsed interval, rebuild the plan if
//! needed, arbitrate, guard against oscillation, apply the command, drive
//! the load scheduler, and publish a snapshot for the dashboard.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

use crate::accounting::{AccountingEngine, TickEnergySample};
use crate::config::Config;
use crate::domain::{
    AccountingState, ArbitratorDecision, LoadDefinition, LoadRuntimeState, Mode, Override, Plan, PlanStatus, Slot,
    SolarPercentile, Source, Telemetry,
};
use crate::error::PlannerError;
use crate::forecast::ForecastAggregator;
use crate::hardware::InverterDriver;
use crate::plan::{rebuild_needed, PlanCache, RebuildContext};
use crate::planner::{MilpPlanner, PlanInput};
use crate::repo::{AccountingRepo, LoadStateRepo, PlanRepo, PriceRepo, TelemetryRepo};
use crate::resilience::HealthManager;
use crate::scheduler::{LoadAction, LoadScheduler};
use crate::tariff::TariffSeries;

use super::anti_oscillation::AntiOscillationGuard;
use super::arbitrator::{decide, ArbitrationInput};

/// Snapshot published after every tick for the dashboard's SSE stream.
#[derive(Debug, Clone, Serialize)]
pub struct TickSnapshot {
    pub at: DateTime<Utc>,
    pub telemetry: Option<Telemetry>,
    pub decision: Option<ArbitratorDecision>,
    pub plan_status: Option<PlanStatus>,
    pub accounting: Option<AccountingState>,
    pub degraded: bool,
}

struct PrevTick {
    at: DateTime<Utc>,
    telemetry: Telemetry,
}

pub struct TickLoop {
    config: RwLock<Arc<Config>>,
    driver: Arc<dyn InverterDriver>,
    repo: Arc<crate::repo::InMemoryRepo>,
    forecast: Arc<ForecastAggregator>,
    tariff: Arc<RwLock<TariffSeries>>,
    plan_cache: Arc<PlanCache>,
    planner: MilpPlanner,
    accounting: Arc<AccountingEngine>,
    health: Arc<HealthManager>,
    guard: Arc<AntiOscillationGuard>,
    loads: RwLock<Vec<(LoadDefinition, LoadRuntimeState)>>,
    override_: RwLock<Option<Override>>,
    prev: RwLock<Option<PrevTick>>,
    last_status_non_optimal: RwLock<bool>,
    snapshot_tx: watch::Sender<TickSnapshot>,
}

impl TickLoop {
    pub fn new(
        config: Arc<Config>,
        driver: Arc<dyn InverterDriver>,
        repo: Arc<crate::repo::InMemoryRepo>,
        forecast: Arc<ForecastAggregator>,
        tariff: Arc<RwLock<TariffSeries>>,
        plan_cache: Arc<PlanCache>,
        planner: MilpPlanner,
        accounting: Arc<AccountingEngine>,
        health: Arc<HealthManager>,
        now: DateTime<Utc>,
    ) -> Self {
        let guard = Arc::new(AntiOscillationGuard::new(
            config.anti_oscillation.min_mode_dwell_s,
            config.anti_oscillation.power_hysteresis_w,
            config.anti_oscillation.max_mode_changes_per_hour,
            now,
        ));
        let loads = config
            .loads
            .iter()
            .cloned()
            .filter(|l| l.enabled)
            .map(|def| {
                let state = LoadRuntimeState::idle(def.name.clone(), now);
                (def, state)
            })
            .collect();
        let (snapshot_tx, _) = watch::channel(TickSnapshot {
            at: now,
            telemetry: None,
            decision: None,
            plan_status: None,
            accounting: None,
            degraded: false,
        });
        Self {
            config: RwLock::new(config),
            driver,
            repo,
            forecast,
            tariff,
            plan_cache,
            planner,
            accounting,
            health,
            guard,
            loads: RwLock::new(loads),
            override_: RwLock::new(None),
            prev: RwLock::new(None),
            last_status_non_optimal: RwLock::new(false),
            snapshot_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TickSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub async fn set_override(&self, ov: Option<Override>) {
        *self.override_.write().await = ov;
    }

    pub async fn current_override(&self) -> Option<Override> {
        *self.override_.read().await
    }

    pub async fn replace_config(&self, cfg: Arc<Config>) {
        *self.config.write().await = cfg;
    }

    pub async fn current_plan(&self) -> Option<Arc<Plan>> {
        self.plan_cache.active().await
    }

    /// Runs the fixed tick cadence until the process is asked to shut down.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let tick_interval_s = self.config.read().await.anti_oscillation.tick_interval_s;
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(tick_interval_s));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Utc::now();
                    if let Err(e) = self.tick(now).await {
                        error!(error = %e, "tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("tick loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Re-sends the last applied command on a short cadence (§4.6): FORCE_*
    /// modes on real inverters time out around 30s without a refresh.
    pub async fn run_refresh(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let refresh_s = self.config.read().await.anti_oscillation.refresh_interval_s;
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(refresh_s));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let decision = self.snapshot_tx.borrow().decision.clone();
                    if let Some(d) = decision {
                        if let Err(e) = self.driver.set_mode(d.target_mode, Some(d.power_w), d.export_cap_w).await {
                            warn!(error = %e, "command refresh failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let config = self.config.read().await.clone();

        // (a) read telemetry
        let telemetry = match self.driver.read_telemetry().await {
            Ok(t) => {
                self.health.record_success("inverter").await;
                t
            }
            Err(e) => {
                self.health.record_failure("inverter").await;
                warn!(error = %e, "telemetry read failed, holding last known state");
                self.publish_snapshot(now, None, None, true).await;
                return Ok(());
            }
        };
        TelemetryRepo::record(self.repo.as_ref(), telemetry.clone()).await;

        // (b) settle accounting for the interval since the previous tick
        let tariff_snapshot_for_accounting = self.tariff.read().await;
        let tariff_now = tariff_snapshot_for_accounting.get(Slot::containing(now)).cloned();
        drop(tariff_snapshot_for_accounting);
        let applied_mode_prev = self.snapshot_tx.borrow().decision.as_ref().map(|d| d.target_mode);
        {
            let mut prev = self.prev.write().await;
            if let Some(p) = prev.as_ref() {
                let elapsed_s = (now - p.at).num_milliseconds() as f64 / 1000.0;
                if elapsed_s > 0.0 {
                    let sample = TickEnergySample {
                        elapsed_s,
                        grid_w: p.telemetry.grid_w,
                        solar_w: p.telemetry.solar_w,
                        load_w: p.telemetry.load_w,
                        battery_w: p.telemetry.battery_w,
                        import_c: tariff_now.as_ref().map(|t| t.import_c).unwrap_or(0.0),
                        export_c: tariff_now.as_ref().map(|t| t.export_c).unwrap_or(0.0),
                        applied_mode: applied_mode_prev.unwrap_or(Mode::SelfUse),
                    };
                    if let Some(archived) = self.accounting.apply_tick(now, &sample).await {
                        self.repo.record_event(archived).await;
                    }
                    self.repo.set_current_cycle(self.accounting.snapshot().await).await;
                }
            }
            *prev = Some(PrevTick { at: now, telemetry: telemetry.clone() });
        }
        self.forecast.record_load_sample(now, telemetry.load_w).await;

        // (c) rebuild evaluator
        let forecast_snapshot = self.forecast.snapshot(now).await;
        let forecast_hash = forecast_snapshot.content_hash();
        let tariff_hash = {
            let series = self.tariff.read().await;
            series.content_hash()
        };
        let current_plan = self.plan_cache.active().await;
        let ov = self.override_.read().await;
        let override_just_expired = ov.map(|o| !o.is_active(now) && o.expires_at <= now).unwrap_or(false);
        drop(ov);
        let last_status_non_optimal = *self.last_status_non_optimal.read().await;
        let last_attempt_at = self.plan_cache.last_rebuild_attempt().await.map(|(at, _)| at);

        let reason = {
            let ctx = RebuildContext {
                now,
                current_soc: telemetry.soc,
                forecast_hash,
                tariff_hash,
                override_just_expired,
                plan: current_plan.as_deref(),
                max_age: chrono::Duration::seconds(config.planning.max_age_secs),
                soc_drift_threshold: config.planning.soc_drift_threshold,
                last_status_non_optimal,
                last_attempt_at,
                retry_backoff: chrono::Duration::seconds(config.planning.retry_backoff_secs),
            };
            rebuild_needed(&ctx)
        };

        if let Some(reason) = reason {
            info!(?reason, "rebuilding plan");
            let _guard = self.plan_cache.begin_rebuild().await;
            let loads_cfg: Vec<LoadDefinition> = self.loads.read().await.iter().map(|(d, _)| d.clone()).collect();
            let tariff_points: Vec<_> = {
                let series = self.tariff.read().await;
                forecast_snapshot
                    .points
                    .iter()
                    .map(|p| {
                        series
                            .get(p.slot)
                            .cloned()
                            .unwrap_or(crate::domain::TariffPoint::new(p.slot, 0.0, 0.0, config.tariff.spike_threshold_c))
                    })
                    .collect()
            };
            let percentile = config.planning.solar_percentile.parse().unwrap_or(SolarPercentile::P50);
            let input = PlanInput {
                forecast: forecast_snapshot.clone(),
                tariff: tariff_points,
                battery: config.battery.to_params(),
                loads: loads_cfg,
                percentile,
                soc_0: telemetry.soc,
                storm_probability_threshold: config.storm.probability_threshold,
                storm_reserve_soc: config.storm.reserve_soc,
                load_shed_weight_c: config.planning.load_shed_weight_c,
                prefer_solar_rho: config.planning.prefer_solar_rho,
                arbitrage_lambda_c: config.planning.arbitrage_lambda_c,
            };
            match self.planner.build_plan(input, now).await {
                Ok(plan) => {
                    *self.last_status_non_optimal.write().await = plan.status != PlanStatus::Optimal;
                    self.repo.save(plan.clone()).await;
                    self.plan_cache.publish(plan, true).await;
                }
                Err(e) => {
                    error!(error = %e, "plan build failed, falling back");
                    *self.last_status_non_optimal.write().await = true;
                    let fallback = Plan::fallback(now, telemetry.soc, Slot::horizon_from(now));
                    self.repo.save(fallback.clone()).await;
                    self.plan_cache.publish(fallback, false).await;
                }
            }
        }

        let plan = self.plan_cache.active().await;
        let plan_slot = plan.as_ref().and_then(|p| p.slot_covering(now)).cloned();

        // (d) arbitrate
        let tariff_point_now = {
            let series = self.tariff.read().await;
            series.get(Slot::containing(now)).cloned()
        };
        let storm_probability = forecast_snapshot
            .get(Slot::containing(now))
            .map(|p| p.storm_prob)
            .unwrap_or(0.0);
        let override_snapshot = self.override_.read().await;
        let decision = decide(&ArbitrationInput {
            now,
            telemetry: telemetry.clone(),
            soc_min_hard: config.battery.soc_min_hard,
            soc_min_soft: config.battery.soc_min_soft,
            soc_max: config.battery.soc_max,
            storm_probability,
            storm_probability_threshold: config.storm.probability_threshold,
            storm_reserve_soc: config.storm.reserve_soc,
            storm_charge_w: config.storm.charge_w,
            soc_floor_charge_w: config.planning.soc_floor_charge_w,
            tariff_spike_active: tariff_point_now.as_ref().map(|t| t.spike_flag).unwrap_or(false),
            export_c: tariff_point_now.as_ref().map(|t| t.export_c).unwrap_or(0.0),
            spike_threshold_c: config.tariff.spike_threshold_c,
            opportunistic_min_soc: config.planning.opportunistic_min_soc,
            opportunistic_discharge_w: config.planning.opportunistic_discharge_w,
            override_: override_snapshot.as_ref(),
            plan_slot: plan_slot.as_ref(),
        });
        drop(override_snapshot);

        // (e) anti-oscillation guard
        let applied = self.guard.apply(decision, now).await;

        // (f) apply command
        if let Err(e) = self.driver.set_mode(applied.target_mode, Some(applied.power_w), applied.export_cap_w).await {
            error!(error = %e, "failed to apply command");
            self.health.record_failure("inverter").await;
        }

        // (g) load scheduler
        {
            let mut loads = self.loads.write().await;
            let tick_minutes = (config.anti_oscillation.tick_interval_s / 60).max(1) as u32;
            let plan_scheduled = plan_slot.as_ref().map(|s| s.scheduled_loads.clone()).unwrap_or_default();
            for (def, state) in loads.iter_mut() {
                let plan_says_on = plan_scheduled.contains(&def.name);
                let action = LoadScheduler::tick(def, state, now, tick_minutes, plan_says_on, false);
                match action {
                    LoadAction::TurnOn => info!(load = %def.name, "turning load on"),
                    LoadAction::TurnOff => info!(load = %def.name, "turning load off"),
                    LoadAction::None => {}
                }
                self.repo.set(state.clone()).await;
            }
        }

        // (h) publish snapshot
        self.publish_snapshot(now, Some(telemetry), Some(applied), forecast_snapshot.is_degraded())
            .await;
        Ok(())
    }

    async fn publish_snapshot(
        &self,
        now: DateTime<Utc>,
        telemetry: Option<Telemetry>,
        decision: Option<ArbitratorDecision>,
        degraded: bool,
    ) {
        let plan_status = self.plan_cache.active().await.map(|p| p.status);
        let accounting = Some(self.accounting.snapshot().await);
        let _ = self.snapshot_tx.send(TickSnapshot {
            at: now,
            telemetry,
            decision,
            plan_status,
            accounting,
            degraded,
        });
    }
}

/// Records each incoming tariff sample into the rolling series and the
/// persisted price history, trimming anything older than 48h.
pub async fn ingest_tariff_point(
    tariff: &RwLock<TariffSeries>,
    repo: &crate::repo::InMemoryRepo,
    slot: Slot,
    import_c: f64,
    export_c: f64,
    now: DateTime<Utc>,
) {
    let mut series = tariff.write().await;
    series.ingest(slot, import_c, export_c);
    series.retain_window(now, chrono::Duration::hours(48));
    if let Some(point) = series.get(slot).cloned() {
        PriceRepo::record(repo, point).await;
    }
}
