//! Persistence seams (§6). The core depends only on these traits; a real
//! deployment backs them with SQLite behind the `db` feature. The in-memory
//! implementation here is what ships by default and what the test suite
//! exercises.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::RwLock;

use crate::domain::{
    AccountingState, CycleArchiveEvent, LoadDefinition, LoadRuntimeState, Override, Plan, Telemetry, TariffPoint,
};

#[async_trait]
pub trait TelemetryRepo: Send + Sync {
    async fn record(&self, sample: Telemetry);
    async fn query(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Telemetry>;
}

#[async_trait]
pub trait PriceRepo: Send + Sync {
    async fn record(&self, point: TariffPoint);
    async fn query(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<TariffPoint>;
}

#[async_trait]
pub trait PlanRepo: Send + Sync {
    async fn save(&self, plan: Plan);
    async fn get_latest(&self) -> Option<Plan>;
    async fn get_active_for(&self, now: DateTime<Utc>) -> Option<Plan>;
}

#[async_trait]
pub trait AccountingRepo: Send + Sync {
    async fn record_event(&self, event: CycleArchiveEvent);
    async fn current_cycle(&self) -> Option<AccountingState>;
    async fn set_current_cycle(&self, state: AccountingState);
    async fn daily(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<CycleArchiveEvent>;
}

#[async_trait]
pub trait LoadConfigRepo: Send + Sync {
    async fn list(&self) -> Vec<LoadDefinition>;
    async fn upsert(&self, def: LoadDefinition);
}

#[async_trait]
pub trait LoadStateRepo: Send + Sync {
    async fn get(&self, name: &str) -> Option<LoadRuntimeState>;
    async fn set(&self, state: LoadRuntimeState);
    async fn all(&self) -> Vec<LoadRuntimeState>;
}

#[async_trait]
pub trait OverrideRepo: Send + Sync {
    async fn get(&self) -> Option<Override>;
    async fn set(&self, ov: Option<Override>);
}

const TELEMETRY_RING_CAPACITY: usize = 100_000;
const PRICE_RING_CAPACITY: usize = 10_000;

/// Single in-memory store backing all repository traits. Bounded rings keep
/// long-running processes from growing memory unbounded; a `db`-backed
/// deployment would persist past this window.
#[derive(Default)]
pub struct InMemoryRepo {
    telemetry: RwLock<VecDeque<Telemetry>>,
    prices: RwLock<VecDeque<TariffPoint>>,
    plans: RwLock<Vec<Plan>>,
    accounting_cycle: RwLock<Option<AccountingState>>,
    accounting_events: RwLock<Vec<CycleArchiveEvent>>,
    loads: RwLock<Vec<LoadDefinition>>,
    load_states: RwLock<Vec<LoadRuntimeState>>,
    override_: RwLock<Option<Override>>,
}

impl InMemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TelemetryRepo for InMemoryRepo {
    async fn record(&self, sample: Telemetry) {
        let mut buf = self.telemetry.write().await;
        if buf.len() >= TELEMETRY_RING_CAPACITY {
            buf.pop_front();
        }
        buf.push_back(sample);
    }

    async fn query(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Telemetry> {
        self.telemetry
            .read()
            .await
            .iter()
            .filter(|t| t.read_at >= from && t.read_at <= to)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PriceRepo for InMemoryRepo {
    async fn record(&self, point: TariffPoint) {
        let mut buf = self.prices.write().await;
        if buf.len() >= PRICE_RING_CAPACITY {
            buf.pop_front();
        }
        buf.push_back(point);
    }

    async fn query(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<TariffPoint> {
        self.prices
            .read()
            .await
            .iter()
            .filter(|p| p.slot.start >= from && p.slot.start <= to)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PlanRepo for InMemoryRepo {
    async fn save(&self, plan: Plan) {
        self.plans.write().await.push(plan);
    }

    async fn get_latest(&self) -> Option<Plan> {
        self.plans.read().await.last().cloned()
    }

    async fn get_active_for(&self, now: DateTime<Utc>) -> Option<Plan> {
        self.plans
            .read()
            .await
            .iter()
            .rev()
            .find(|p| p.built_at <= now && now < p.horizon_end)
            .cloned()
    }
}

#[async_trait]
impl AccountingRepo for InMemoryRepo {
    async fn record_event(&self, event: CycleArchiveEvent) {
        self.accounting_events.write().await.push(event);
    }

    async fn current_cycle(&self) -> Option<AccountingState> {
        self.accounting_cycle.read().await.clone()
    }

    async fn set_current_cycle(&self, state: AccountingState) {
        *self.accounting_cycle.write().await = Some(state);
    }

    async fn daily(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<CycleArchiveEvent> {
        self.accounting_events
            .read()
            .await
            .iter()
            .filter(|e| e.archived_at >= from && e.archived_at <= to)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LoadConfigRepo for InMemoryRepo {
    async fn list(&self) -> Vec<LoadDefinition> {
        self.loads.read().await.clone()
    }

    async fn upsert(&self, def: LoadDefinition) {
        let mut loads = self.loads.write().await;
        if let Some(existing) = loads.iter_mut().find(|l| l.name == def.name) {
            *existing = def;
        } else {
            loads.push(def);
        }
    }
}

#[async_trait]
impl LoadStateRepo for InMemoryRepo {
    async fn get(&self, name: &str) -> Option<LoadRuntimeState> {
        self.load_states.read().await.iter().find(|s| s.name == name).cloned()
    }

    async fn set(&self, state: LoadRuntimeState) {
        let mut states = self.load_states.write().await;
        if let Some(existing) = states.iter_mut().find(|s| s.name == state.name) {
            *existing = state;
        } else {
            states.push(state);
        }
    }

    async fn all(&self) -> Vec<LoadRuntimeState> {
        self.load_states.read().await.clone()
    }
}

#[async_trait]
impl OverrideRepo for InMemoryRepo {
    async fn get(&self) -> Option<Override> {
        *self.override_.read().await
    }

    async fn set(&self, ov: Option<Override>) {
        *self.override_.write().await = ov;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Mode, Slot};
    use chrono::TimeZone;

    fn telemetry_at(t: DateTime<Utc>) -> Telemetry {
        Telemetry {
            soc: 0.5,
            solar_w: 0.0,
            load_w: 500.0,
            grid_w: 500.0,
            battery_w: 0.0,
            inverter_mode: Mode::SelfUse,
            fault_flags: 0,
            read_at: t,
        }
    }

    #[tokio::test]
    async fn telemetry_query_filters_by_range() {
        let repo = InMemoryRepo::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        TelemetryRepo::record(&repo, telemetry_at(t0)).await;
        TelemetryRepo::record(&repo, telemetry_at(t0 + chrono::Duration::hours(2))).await;

        let results = TelemetryRepo::query(&repo, t0, t0 + chrono::Duration::hours(1)).await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn plan_active_for_picks_covering_plan() {
        let repo = InMemoryRepo::new();
        let built_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let plan = Plan::fallback(built_at, 0.5, Slot::horizon_from(built_at));
        repo.save(plan).await;

        let active = repo.get_active_for(built_at + chrono::Duration::hours(1)).await;
        assert!(active.is_some());
    }
}
