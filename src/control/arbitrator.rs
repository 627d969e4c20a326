//! Pure control-hierarchy decision (§4.5). Takes a snapshot of everything
//! that can influence the command and returns exactly one decision; no I/O,
//! no shared state, fully unit-testable.

use crate::domain::{ArbitratorDecision, Mode, Override, PlanSlot, Source, Telemetry};

pub struct ArbitrationInput<'a> {
    pub now: chrono::DateTime<chrono::Utc>,
    pub telemetry: Telemetry,
    pub soc_min_hard: f64,
    pub soc_min_soft: f64,
    pub soc_max: f64,
    pub storm_probability: f64,
    pub storm_probability_threshold: f64,
    pub storm_reserve_soc: f64,
    pub storm_charge_w: f64,
    pub soc_floor_charge_w: f64,
    pub tariff_spike_active: bool,
    pub export_c: f64,
    pub spike_threshold_c: f64,
    pub opportunistic_min_soc: f64,
    pub opportunistic_discharge_w: f64,
    pub override_: Option<&'a Override>,
    pub plan_slot: Option<&'a PlanSlot>,
}

/// Evaluates the priority hierarchy top to bottom; the first matching rule
/// wins. Declaration order of `Source` doubles as the tie-break order.
pub fn decide(input: &ArbitrationInput) -> ArbitratorDecision {
    let t = &input.telemetry;

    if t.has_fault() || t.soc < input.soc_min_hard {
        return ArbitratorDecision {
            target_mode: Mode::SelfUse,
            power_w: 0.0,
            export_cap_w: Some(0.0),
            source: Source::Safety,
            rationale: if t.has_fault() {
                "inverter fault reported".into()
            } else {
                format!("soc {:.3} below hard floor {:.3}", t.soc, input.soc_min_hard)
            },
        };
    }
    if t.soc > input.soc_max {
        return ArbitratorDecision {
            target_mode: Mode::SelfUse,
            power_w: 0.0,
            export_cap_w: None,
            source: Source::Safety,
            rationale: format!("soc {:.3} above ceiling {:.3}, export unrestricted", t.soc, input.soc_max),
        };
    }

    if input.storm_probability >= input.storm_probability_threshold && t.soc < input.storm_reserve_soc {
        return ArbitratorDecision {
            target_mode: Mode::ForceCharge,
            power_w: input.storm_charge_w,
            export_cap_w: None,
            source: Source::Storm,
            rationale: format!(
                "storm probability {:.2} >= threshold, soc {:.3} below reserve {:.3}",
                input.storm_probability, t.soc, input.storm_reserve_soc
            ),
        };
    }

    if t.soc < input.soc_min_soft && !input.tariff_spike_active {
        return ArbitratorDecision {
            target_mode: Mode::ForceCharge,
            power_w: input.soc_floor_charge_w,
            export_cap_w: None,
            source: Source::SocFloor,
            rationale: format!("soc {:.3} below soft floor {:.3}", t.soc, input.soc_min_soft),
        };
    }

    if let Some(ov) = input.override_ {
        if ov.is_active(input.now) {
            return ArbitratorDecision {
                target_mode: ov.mode,
                power_w: ov.power_w.unwrap_or(0.0),
                export_cap_w: None,
                source: Source::Override,
                rationale: format!("user override active until {}", ov.expires_at),
            };
        }
    }

    if let Some(slot) = input.plan_slot {
        if slot.mode == Mode::SelfUse
            && input.export_c >= input.spike_threshold_c
            && t.soc >= input.opportunistic_min_soc
        {
            return ArbitratorDecision {
                target_mode: Mode::ForceDischarge,
                power_w: input.opportunistic_discharge_w,
                export_cap_w: None,
                source: Source::Opportunistic,
                rationale: format!(
                    "export price {:.1}c >= spike threshold {:.1}c, soc {:.3} supports discharge",
                    input.export_c, input.spike_threshold_c, t.soc
                ),
            };
        }
        return ArbitratorDecision {
            target_mode: slot.mode,
            power_w: slot.charge_w.max(slot.discharge_w),
            export_cap_w: if slot.mode.zero_export() { Some(0.0) } else { None },
            source: Source::Plan,
            rationale: "following active plan slot".into(),
        };
    }

    ArbitratorDecision {
        target_mode: Mode::SelfUse,
        power_w: 0.0,
        export_cap_w: None,
        source: Source::Default,
        rationale: "no plan available, defaulting to self-use".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PlanSlot, Slot};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;

    fn telemetry(soc: f64) -> Telemetry {
        Telemetry {
            soc,
            solar_w: 0.0,
            load_w: 500.0,
            grid_w: 500.0,
            battery_w: 0.0,
            inverter_mode: Mode::SelfUse,
            fault_flags: 0,
            read_at: Utc::now(),
        }
    }

    fn base_input<'a>(now: chrono::DateTime<Utc>, telemetry: Telemetry) -> ArbitrationInput<'a> {
        ArbitrationInput {
            now,
            telemetry,
            soc_min_hard: 0.05,
            soc_min_soft: 0.15,
            soc_max: 0.95,
            storm_probability: 0.0,
            storm_probability_threshold: 0.5,
            storm_reserve_soc: 0.6,
            storm_charge_w: 3000.0,
            soc_floor_charge_w: 500.0,
            tariff_spike_active: false,
            export_c: 5.0,
            spike_threshold_c: 80.0,
            opportunistic_min_soc: 0.3,
            opportunistic_discharge_w: 2000.0,
            override_: None,
            plan_slot: None,
        }
    }

    #[test]
    fn safety_wins_on_fault() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut t = telemetry(0.5);
        t.fault_flags = 1;
        let input = base_input(now, t);
        let decision = decide(&input);
        assert_eq!(decision.source, Source::Safety);
        assert_eq!(decision.target_mode, Mode::SelfUse);
    }

    #[test]
    fn storm_wins_over_plan() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut input = base_input(now, telemetry(0.35));
        input.storm_probability = 0.7;
        let slot = PlanSlot {
            slot: Slot::containing(now),
            mode: Mode::SelfUse,
            charge_w: 0.0,
            discharge_w: 0.0,
            expected_soc: 0.35,
            scheduled_loads: BTreeSet::new(),
        };
        input.plan_slot = Some(&slot);
        let decision = decide(&input);
        assert_eq!(decision.source, Source::Storm);
        assert_eq!(decision.target_mode, Mode::ForceCharge);
        assert_eq!(decision.power_w, 3000.0);
    }

    #[test]
    fn spike_arbitrage_opportunistic_discharge() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut input = base_input(now, telemetry(0.80));
        input.export_c = 95.0;
        let slot = PlanSlot {
            slot: Slot::containing(now),
            mode: Mode::SelfUse,
            charge_w: 0.0,
            discharge_w: 0.0,
            expected_soc: 0.80,
            scheduled_loads: BTreeSet::new(),
        };
        input.plan_slot = Some(&slot);
        let decision = decide(&input);
        assert_eq!(decision.source, Source::Opportunistic);
        assert_eq!(decision.target_mode, Mode::ForceDischarge);
    }

    #[test]
    fn override_beats_plan_but_not_safety() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut input = base_input(now, telemetry(0.5));
        let ov = Override {
            mode: Mode::ForceCharge,
            power_w: Some(1500.0),
            expires_at: now + chrono::Duration::hours(1),
        };
        input.override_ = Some(&ov);
        let decision = decide(&input);
        assert_eq!(decision.source, Source::Override);
        assert_eq!(decision.target_mode, Mode::ForceCharge);
    }

    #[test]
    fn expired_override_falls_through_to_default() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut input = base_input(now, telemetry(0.5));
        let ov = Override {
            mode: Mode::ForceCharge,
            power_w: Some(1500.0),
            expires_at: now - chrono::Duration::seconds(1),
        };
        input.override_ = Some(&ov);
        let decision = decide(&input);
        assert_eq!(decision.source, Source::Default);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn telemetry(soc: f64, fault: bool) -> Telemetry {
        Telemetry {
            soc,
            solar_w: 0.0,
            load_w: 500.0,
            grid_w: 500.0,
            battery_w: 0.0,
            inverter_mode: Mode::SelfUse,
            fault_flags: if fault { 1 } else { 0 },
            read_at: Utc::now(),
        }
    }

    proptest! {
        // Arbitrator monotonicity (§8): a fault or a hard-floor breach must
        // always win, regardless of what every lower-priority signal says.
        #[test]
        fn safety_always_wins_below_hard_floor(
            soc in 0.0f64..0.05,
            fault in any::<bool>(),
            storm_probability in 0.0f64..1.0,
            export_c in -50.0f64..200.0,
        ) {
            let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
            let input = ArbitrationInput {
                now,
                telemetry: telemetry(soc, fault),
                soc_min_hard: 0.05,
                soc_min_soft: 0.15,
                soc_max: 0.95,
                storm_probability,
                storm_probability_threshold: 0.0,
                storm_reserve_soc: 0.6,
                storm_charge_w: 3000.0,
                soc_floor_charge_w: 500.0,
                tariff_spike_active: true,
                export_c,
                spike_threshold_c: 10.0,
                opportunistic_min_soc: 0.0,
                opportunistic_discharge_w: 2000.0,
                override_: None,
                plan_slot: None,
            };
            let decision = decide(&input);
            prop_assert_eq!(decision.source, Source::Safety);
        }

        // An active, unexpired override can never be beaten by the plan or
        // the opportunistic-discharge path, only by safety/storm/soc-floor.
        #[test]
        fn override_never_loses_to_plan_or_opportunistic(
            soc in 0.2f64..0.9,
            override_power in 0.0f64..5000.0,
        ) {
            let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
            let ov = Override {
                mode: Mode::ForceDischarge,
                power_w: Some(override_power),
                expires_at: now + chrono::Duration::hours(1),
            };
            let input = ArbitrationInput {
                now,
                telemetry: telemetry(soc, false),
                soc_min_hard: 0.05,
                soc_min_soft: 0.15,
                soc_max: 0.95,
                storm_probability: 0.0,
                storm_probability_threshold: 0.5,
                storm_reserve_soc: 0.6,
                storm_charge_w: 3000.0,
                soc_floor_charge_w: 500.0,
                tariff_spike_active: false,
                export_c: 999.0,
                spike_threshold_c: 10.0,
                opportunistic_min_soc: 0.0,
                opportunistic_discharge_w: 2000.0,
                override_: Some(&ov),
                plan_slot: None,
            };
            let decision = decide(&input);
            prop_assert_eq!(decision.source, Source::Override);
        }
    }
}
