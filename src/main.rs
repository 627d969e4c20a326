use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use power_master::accounting::AccountingEngine;
use power_master::config::Config;
use power_master::control::{ingest_tariff_point, TickLoop};
use power_master::domain::{Mode, Slot, SolarPercentile};
use power_master::error;
use power_master::error::exit_code;
use power_master::forecast::{self, ForecastAggregator, HttpSolarProvider, HttpStormProvider, HttpWeatherProvider, Provider};
use power_master::hardware;
use power_master::plan::PlanCache;
use power_master::planner::MilpPlanner;
use power_master::repo::{self, InMemoryRepo};
use power_master::resilience::HealthManager;
use power_master::tariff::{HttpTariffProvider, TariffSeries};
use power_master::telemetry::{init_tracing, shutdown_signal};
use power_master::api;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(exit_code::FATAL_CONFIG);
        }
    };
    let cfg = Arc::new(cfg);

    let driver: Arc<dyn hardware::InverterDriver> = match hardware::build_driver(&cfg) {
        Ok(d) => Arc::from(d),
        Err(e) => {
            error!(error = %e, "failed to initialise inverter driver");
            std::process::exit(exit_code::INVERTER_INIT_FAILED);
        }
    };

    let now = Utc::now();
    let repo = Arc::new(InMemoryRepo::new());
    let percentile: SolarPercentile = cfg.planning.solar_percentile.parse().unwrap_or(SolarPercentile::P50);
    let forecast = Arc::new(ForecastAggregator::new(&cfg.providers, percentile));
    let tariff_series = Arc::new(tokio::sync::RwLock::new(TariffSeries::new(
        cfg.tariff.spike_threshold_c,
        cfg.tariff.spike_hysteresis_ratio,
    )));
    let plan_cache = Arc::new(PlanCache::new());
    let planner = MilpPlanner::new(StdDuration::from_secs(cfg.planning.solver_wall_timeout_secs));
    let accounting = Arc::new(AccountingEngine::new(
        cfg.battery.capacity_kwh,
        cfg.accounting.billing_cycle_day_of_month,
        cfg.fixed_costs.daily_standing_charge_c,
        cfg.battery.initial_soc * cfg.battery.capacity_kwh,
        now,
    ));
    let health = Arc::new(HealthManager::new(
        cfg.resilience.max_consecutive_failures,
        cfg.resilience.backoff_initial_ms,
        cfg.resilience.backoff_max_ms,
    ));

    let tick_loop = Arc::new(TickLoop::new(
        cfg.clone(),
        driver.clone(),
        repo.clone(),
        forecast.clone(),
        tariff_series.clone(),
        plan_cache.clone(),
        planner,
        accounting.clone(),
        health.clone(),
        now,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    spawn_provider_pollers(&cfg, forecast.clone(), tariff_series.clone(), repo.clone(), health.clone(), shutdown_rx.clone());

    tokio::spawn(tick_loop.clone().run(shutdown_rx.clone()));
    tokio::spawn(tick_loop.clone().run_refresh(shutdown_rx.clone()));
    tokio::spawn(watch_config(cfg.clone(), tick_loop.clone(), shutdown_rx.clone()));

    let app_state = api::AppState {
        tick: tick_loop.clone(),
        repo: repo.clone(),
        forecast: forecast.clone(),
        health: health.clone(),
        default_history_hours: cfg.dashboard.default_history_hours,
        sse_hz: cfg.dashboard.sse_hz,
    };
    let app = api::router(app_state, &cfg);

    let addr = cfg.server.socket_addr()?;
    info!(%addr, "starting power-master");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("shutdown requested, settling final state");
    let _ = shutdown_tx.send(true);
    if let Err(e) = driver.set_mode(Mode::SelfUse, Some(0.0), None).await {
        warn!(error = %e, "failed to command self-use during shutdown");
    }
    let final_cycle = accounting.snapshot().await;
    repo::AccountingRepo::set_current_cycle(repo.as_ref(), final_cycle).await;
    tokio::time::sleep(StdDuration::from_millis(200)).await;

    warn!("shutdown complete");
    Ok(())
}

/// Polls the config file on a fixed interval and publishes a new snapshot to
/// the tick loop, refusing to apply changes to restart-only fields
/// (`battery.capacity_kwh`, `hardware.mode`) until the process is restarted.
async fn watch_config(current: Arc<Config>, tick_loop: Arc<TickLoop>, mut shutdown: watch::Receiver<bool>) {
    let mut current = current;
    let mut interval = tokio::time::interval(StdDuration::from_secs(30));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let reloaded = match Config::load() {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "config reload failed, keeping previous snapshot");
                        continue;
                    }
                };
                let restart_only = current.restart_required_diff(&reloaded);
                if !restart_only.is_empty() {
                    warn!(fields = ?restart_only, "config changed in restart-only fields, ignoring until restart");
                    continue;
                }
                let reloaded = Arc::new(reloaded);
                current = reloaded.clone();
                tick_loop.replace_config(reloaded).await;
            }
            _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
        }
    }
}

fn spawn_provider_pollers(
    cfg: &Arc<Config>,
    forecast: Arc<ForecastAggregator>,
    tariff_series: Arc<tokio::sync::RwLock<TariffSeries>>,
    repo: Arc<InMemoryRepo>,
    health: Arc<HealthManager>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(solar) = HttpSolarProvider::new(cfg.providers.solar.base_url.clone(), StdDuration::from_secs(cfg.providers.solar.http_timeout_secs)) {
        let forecast = forecast.clone();
        let health = health.clone();
        let poll_every = StdDuration::from_secs(cfg.providers.solar.fresh_ttl_secs.min(900));
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match solar.fetch().await {
                            outcome @ error::ProviderOutcome::Ok(_) => { health.record_success("solar").await; forecast.ingest_solar(outcome).await; }
                            outcome => { health.record_failure("solar").await; forecast.ingest_solar(outcome).await; }
                        }
                    }
                    _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
                }
            }
        });
    } else {
        warn!("solar provider not configured, forecast will stay degraded");
    }

    if let Ok(weather) = HttpWeatherProvider::new(cfg.providers.weather.base_url.clone(), StdDuration::from_secs(cfg.providers.weather.http_timeout_secs)) {
        let forecast = forecast.clone();
        let health = health.clone();
        let poll_every = StdDuration::from_secs(cfg.providers.weather.fresh_ttl_secs.min(900));
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match weather.fetch().await {
                            outcome @ error::ProviderOutcome::Ok(_) => { health.record_success("weather").await; forecast.ingest_weather(outcome).await; }
                            outcome => { health.record_failure("weather").await; forecast.ingest_weather(outcome).await; }
                        }
                    }
                    _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
                }
            }
        });
    } else {
        warn!("weather provider not configured, forecast will stay degraded");
    }

    if let Ok(storm) = HttpStormProvider::new(cfg.providers.storm.base_url.clone(), StdDuration::from_secs(cfg.providers.storm.http_timeout_secs)) {
        let health = health.clone();
        let poll_every = StdDuration::from_secs(cfg.providers.storm.fresh_ttl_secs.min(900));
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match storm.fetch().await {
                            outcome @ error::ProviderOutcome::Ok(_) => { health.record_success("storm").await; forecast.ingest_storm(outcome).await; }
                            outcome => { health.record_failure("storm").await; forecast.ingest_storm(outcome).await; }
                        }
                    }
                    _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
                }
            }
        });
    } else {
        warn!("storm provider not configured, forecast will stay degraded");
    }

    if let Ok(tariff_provider) = HttpTariffProvider::new(cfg.providers.tariff.base_url.clone(), StdDuration::from_secs(cfg.providers.tariff.http_timeout_secs)) {
        let poll_every = StdDuration::from_secs(cfg.providers.tariff.fresh_ttl_secs.min(900));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let error::ProviderOutcome::Ok(sample) | error::ProviderOutcome::Degraded(sample, _) = tariff_provider.fetch().await {
                            let now = Utc::now();
                            for point in sample.points {
                                let slot = Slot::containing(point.time);
                                ingest_tariff_point(&tariff_series, repo.as_ref(), slot, point.import_c, point.export_c, now).await;
                            }
                        }
                    }
                    _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
                }
            }
        });
    } else {
        warn!("tariff provider not configured, tariff series will stay empty");
    }
}
