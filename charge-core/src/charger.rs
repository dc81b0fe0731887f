//! Charge Controller decision logic: power budgeting, thermal derating,
//! termination debounce, the balancing duty-cycle gate, and the
//! under-voltage precharge recovery state machine.
//!
//! Nothing here sleeps or touches hardware. The firmware task owns the
//! cycle cadence and every delay; these types are stepped once per
//! evaluation so tests can drive time forward for free.

use crate::config::{ChargerConfig, PrechargeConfig};

/// Linear thermal derate scalar: 1.0 at or below the throttle threshold,
/// then `1 − (0.0333·t − 1.66)` clamped to [0, 1].
pub fn thermal_derate(temp_c: f32, cfg: &ChargerConfig) -> f32 {
    if temp_c <= cfg.throttle_temp_c {
        return 1.0;
    }
    let scalar = 1.0 - (0.0333 * temp_c - 1.66);
    scalar.clamp(0.0, 1.0)
}

/// Charge power budget in mW: the least of what the source can deliver
/// (with the efficiency fudge so a marginal supply is never overloaded),
/// the board's absolute power ceiling, and the negotiated input power.
pub fn charge_power_budget_mw(
    vbus_mv: u32,
    max_input_current_ma: u32,
    max_input_power_mw: u32,
    mcu_temp_c: f32,
    cfg: &ChargerConfig,
) -> u32 {
    let source_mw = (vbus_mv as u64 * max_input_current_ma as u64 / 1_000) as u32;
    let mut budget = (source_mw as f32 * cfg.efficiency) as u32;

    if budget > cfg.max_charging_power_mw {
        budget = cfg.max_charging_power_mw;
    }
    if budget > max_input_power_mw {
        budget = (max_input_power_mw as f32 * cfg.efficiency) as u32;
    }

    (budget as f32 * thermal_derate(mcu_temp_c, cfg)) as u32
}

/// Charge current that spends the budget at the present pack voltage.
pub fn charge_current_target_ma(budget_mw: u32, pack_mv: u32) -> u32 {
    if pack_mv == 0 {
        return 0;
    }
    (budget_mw as u64 * 1_000 / pack_mv as u64) as u32
}

/// Debounced end-of-charge detection. A single sample at or above the
/// termination current (or a cycle that still requires charging) resets
/// the run; only an unbroken run of low samples terminates.
#[derive(Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TerminationDetector {
    low_samples: u8,
}

impl TerminationDetector {
    /// Feed one cycle's measurement. Returns true when charging should
    /// terminate.
    pub fn sample(&mut self, requires_charging: bool, charge_current_ma: u32, cfg: &ChargerConfig) -> bool {
        if !requires_charging && charge_current_ma < cfg.term_current_ma {
            self.low_samples = self.low_samples.saturating_add(1);
        } else {
            self.low_samples = 0;
        }
        self.low_samples >= cfg.term_sample_limit
    }

    pub fn reset(&mut self) {
        self.low_samples = 0;
    }
}

/// Decision from the balancing duty-cycle gate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GateDecision {
    /// Run the charger controller this cycle.
    Run,
    /// Hold the output disabled so the balancer sees quiet cells.
    ForceOff,
    /// Counter wrap cycle: leave the output untouched.
    Skip,
}

/// Periodically blanks the charger output so balancing measurements are
/// taken without charge current flowing. The bounds are asymmetric
/// (`< 90` / `> 100`) with a wrap cycle in between; the observed
/// three-way behavior is kept as-is.
#[derive(Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChargeDutyGate {
    count: u8,
}

impl ChargeDutyGate {
    pub fn advance(&mut self) -> GateDecision {
        self.count = self.count.saturating_add(1);
        if self.count < 90 {
            GateDecision::Run
        } else if self.count > 100 {
            self.count = 0;
            GateDecision::Skip
        } else {
            GateDecision::ForceOff
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PrechargeState {
    Idle,
    Precharging,
    Recovered,
    TimedOut,
}

/// What the charger task should do for the current precharge evaluation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PrechargeStep {
    /// Apply the recovery current at the nominal voltage for this many
    /// cycles, then re-measure and evaluate again.
    Apply { cycles: u8 },
    /// Recovery gave up: disable the output and run this many
    /// measurement-only cycles before resuming normal control.
    CoolDown { cycles: u8 },
    /// Recovery finished (either way); normal control may proceed.
    Done,
}

/// Under-voltage precharge recovery. Armed once at power-on; after it
/// reaches `Recovered` or `TimedOut` it stays there until reset.
pub struct PrechargeRecovery {
    state: PrechargeState,
    attempts_left: u16,
    first_burst: bool,
    cfg: PrechargeConfig,
}

impl PrechargeRecovery {
    pub fn new(cfg: PrechargeConfig) -> Self {
        Self {
            state: PrechargeState::Idle,
            attempts_left: cfg.attempt_budget,
            first_burst: true,
            cfg,
        }
    }

    pub fn state(&self) -> PrechargeState {
        self.state
    }

    /// True while bursts are being applied (reported to the rest of the
    /// system so it can tell precharge current from real charging).
    pub fn in_progress(&self) -> bool {
        self.state == PrechargeState::Precharging
    }

    /// Evaluate against a fresh pack-voltage measurement.
    pub fn evaluate(&mut self, pack_mv: u32, cell_count: u8) -> PrechargeStep {
        let wake_mv = cell_count as u32 * self.cfg.wake_mv_per_cell as u32;
        match self.state {
            PrechargeState::Recovered | PrechargeState::TimedOut => PrechargeStep::Done,
            PrechargeState::Idle | PrechargeState::Precharging => {
                if pack_mv >= wake_mv {
                    self.state = PrechargeState::Recovered;
                    return PrechargeStep::Done;
                }
                if self.attempts_left <= 1 {
                    self.state = PrechargeState::TimedOut;
                    return PrechargeStep::CoolDown {
                        cycles: self.cfg.cooldown_cycles,
                    };
                }
                self.state = PrechargeState::Precharging;
                self.attempts_left -= 1;
                let cycles = if self.first_burst {
                    self.first_burst = false;
                    self.cfg.first_burst_cycles
                } else {
                    self.cfg.burst_cycles
                };
                PrechargeStep::Apply { cycles }
            }
        }
    }
}
