//! Battery Monitor: topology detection, safety checks, cell balancing,
//! and the charging-required signal.

use crate::config::{BalanceMode, MonitorConfig};
use crate::fault::{FaultDelta, Faults};

pub const MAX_CELLS: usize = 4;

/// Battery record. Owned by the monitor task; other tasks read snapshots.
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryState {
    /// External high-power supply present on the pack terminals.
    pub source_connected: bool,
    /// True iff the detected cell count is greater than 1.
    pub balance_port_connected: bool,
    /// 0 (invalid/absent), or 2..=4. A lone first tap never counts.
    pub cell_count: u8,
    /// Hysteresis-latched bulk balancing state.
    pub balancing_active: bool,
    pub requires_charging: bool,
    /// Soft flag: gates the charger, self-clears, never in the registry.
    pub cell_over_voltage: bool,
    /// One discharge-enable bit per cell slot, low nibble.
    pub discharge_bits: u8,
}

impl BatteryState {
    pub const fn new() -> Self {
        BatteryState {
            source_connected: false,
            balance_port_connected: false,
            cell_count: 0,
            balancing_active: false,
            requires_charging: false,
            cell_over_voltage: false,
            discharge_bits: 0,
        }
    }

    /// Discharge bitmask as applied to the outputs: all off while the
    /// bulk latch is idle, except bits forced by absolute over-voltage.
    pub fn discharge_bits(&self) -> u8 {
        self.discharge_bits
    }
}

/// One cycle worth of settled ADC readings, all in millivolts except the
/// die temperature.
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PackReadings {
    /// Per-cell voltages (tap differentials), slots 0..=3.
    pub cell_mv: [u16; MAX_CELLS],
    /// Absolute tap voltages scaled to per-cell range; `tap_mv[0]` is the
    /// first cell itself.
    pub tap_mv: [u16; MAX_CELLS],
    /// Pack terminal voltage.
    pub pack_mv: u32,
    pub mcu_temp_c: f32,
}

/// Result of one monitor cycle.
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MonitorOutput {
    pub discharge_bits: u8,
    pub faults: FaultDelta,
}

/// Run one full monitor cycle in the original's order: source detection,
/// topology, temperature check, cell safety, balancing (only while the
/// regulator output is off), charging-required.
///
/// `registry` is the fault registry as read at cycle start; the returned
/// delta carries this cycle's set/clear decisions for the monitor-owned
/// bits. Balancing gates on the *effective* view (registry plus this
/// cycle's edits) so a connection fault raised above is honored in the
/// same cycle.
pub fn run_cycle(
    state: &mut BatteryState,
    readings: &PackReadings,
    registry: Faults,
    regulator_charging: bool,
    cfg: &MonitorConfig,
) -> MonitorOutput {
    let mut delta = FaultDelta::default();

    state.source_connected = readings.pack_mv > cfg.connected_thresh_mv as u32;

    match cfg.mode {
        BalanceMode::Detect => detect_topology(state, readings, cfg, &mut delta),
        BalanceMode::Fixed { cell_count } => {
            state.cell_count = cell_count;
            state.balance_port_connected = true;
            delta.clear(Faults::CELL_CONNECTION);
        }
    }

    temperature_check(readings.mcu_temp_c, registry, cfg, &mut delta);

    if cfg.mode == BalanceMode::Detect {
        cell_voltage_check(state, readings, cfg, &mut delta);
    }

    let effective = delta.apply_to(registry);

    if cfg.mode == BalanceMode::Detect {
        // Only move the balancer while the regulator output is off; the
        // charge current otherwise swamps the per-cell deltas.
        if !regulator_charging {
            balance_step(state, readings, effective, cfg);
        }
    } else {
        state.discharge_bits = 0;
        state.balancing_active = false;
    }

    state.requires_charging = state.source_connected
        && state.balance_port_connected
        && readings.pack_mv < state.cell_count as u32 * cfg.charge_enable_mv as u32;

    MonitorOutput {
        discharge_bits: state.discharge_bits,
        faults: delta,
    }
}

/// Infer the series cell count from which balance taps are live.
///
/// A tap counts as active when both the divider tap and the cell behind it
/// read above the connected threshold. The topology is valid only when the
/// active taps are contiguous from the bottom; a gap means a floating or
/// half-seated connector and raises the connection fault. An empty port
/// (or the first tap alone, which cannot make a balanceable pack) is a
/// valid "absent" state and clears the fault.
fn detect_topology(
    state: &mut BatteryState,
    readings: &PackReadings,
    cfg: &MonitorConfig,
    delta: &mut FaultDelta,
) {
    let thresh = cfg.connected_thresh_mv;
    let mut active = 0u8;
    for k in 0..MAX_CELLS {
        if readings.tap_mv[k] > thresh && readings.cell_mv[k] > thresh {
            active |= 1 << k;
        }
    }

    let highest = (8 - active.leading_zeros()) as u8; // 0..=4
    if highest >= 2 {
        let required = (1u8 << highest) - 1;
        if active & required == required {
            state.cell_count = highest;
            delta.clear(Faults::CELL_CONNECTION);
        } else {
            state.cell_count = 0;
            delta.set(Faults::CELL_CONNECTION);
        }
    } else {
        state.cell_count = 0;
        delta.clear(Faults::CELL_CONNECTION);
    }

    state.balance_port_connected = state.cell_count > 1;
}

/// MCU over-temperature fault with asymmetric thresholds: set above the
/// operating limit, cleared only once the reading falls below the lower
/// recovery temperature.
fn temperature_check(temp_c: f32, registry: Faults, cfg: &MonitorConfig, delta: &mut FaultDelta) {
    if temp_c > cfg.max_op_temp_c {
        delta.set(Faults::MCU_OVER_TEMP);
    } else if registry.contains(Faults::MCU_OVER_TEMP) && temp_c < cfg.recovery_temp_c {
        delta.clear(Faults::MCU_OVER_TEMP);
    }
}

/// Hard under-voltage fault and the soft over-voltage charge inhibit.
fn cell_voltage_check(
    state: &mut BatteryState,
    readings: &PackReadings,
    cfg: &MonitorConfig,
    delta: &mut FaultDelta,
) {
    let cells = &readings.cell_mv[..state.cell_count as usize];
    let under = cells.iter().any(|&v| v < cfg.min_safe_mv);
    let over = cells.iter().any(|&v| v > cfg.overvolt_inhibit_mv);

    if under {
        delta.set(Faults::CELL_VOLTAGE);
    } else {
        delta.clear(Faults::CELL_VOLTAGE);
    }
    state.cell_over_voltage = over;
}

/// Spread-based balancing with a hysteresis latch and a voltage-adaptive
/// window. The window widens (scalar up to `balance_scalar_max`) while a
/// charge source is attached and the pack is far from full, so bulk
/// charging is not throttled by early discharging; it narrows back to 1 as
/// the highest cell approaches the charge-enable voltage.
fn balance_step(
    state: &mut BatteryState,
    readings: &PackReadings,
    effective: Faults,
    cfg: &MonitorConfig,
) {
    if !state.balance_port_connected || effective.any() {
        state.discharge_bits = 0;
        state.balancing_active = false;
        return;
    }

    let cells = &readings.cell_mv[..state.cell_count as usize];
    let min_v = *cells.iter().min().unwrap_or(&0);
    let max_v = *cells.iter().max().unwrap_or(&0);
    let spread = (max_v - min_v) as f32;

    let scalar = if state.source_connected {
        let span = (cfg.charge_enable_mv - cfg.min_balance_mv) as f32;
        let progress = (max_v as f32 - cfg.min_balance_mv as f32) / span;
        let s = cfg.balance_scalar_max * (1.0 - progress);
        if s < 1.0 {
            1.0
        } else {
            s
        }
    } else {
        1.0
    };

    if !state.balancing_active
        && spread >= cfg.enable_delta_mv as f32 * scalar
        && min_v > cfg.min_balance_mv
    {
        state.balancing_active = true;
    } else if (state.balancing_active && spread < cfg.hysteresis_delta_mv as f32 * scalar)
        || min_v < cfg.min_balance_mv
    {
        state.balancing_active = false;
    }

    for (i, &cell) in cells.iter().enumerate() {
        let discharging = state.balancing_active
            && (cell - min_v) as f32 >= cfg.hysteresis_delta_mv as f32 * scalar;
        // The absolute over-voltage clause is a standalone safety
        // discharge; it fires with the bulk latch off.
        if discharging || cell >= cfg.overvolt_discharge_mv {
            state.discharge_bits |= 1 << i;
        } else {
            state.discharge_bits &= !(1 << i);
        }
    }
    // Slots beyond the detected pack never discharge.
    state.discharge_bits &= (1u8 << state.cell_count) - 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> MonitorConfig {
        MonitorConfig::default()
    }

    fn readings(cell_mv: [u16; 4]) -> PackReadings {
        // Healthy default: all taps mirror the cells, pack at the sum,
        // room temperature.
        PackReadings {
            cell_mv,
            tap_mv: cell_mv,
            pack_mv: cell_mv.iter().map(|&v| v as u32).sum(),
            mcu_temp_c: 25.0,
        }
    }

    fn run(
        state: &mut BatteryState,
        r: &PackReadings,
        registry: Faults,
        charging: bool,
    ) -> MonitorOutput {
        run_cycle(state, r, registry, charging, &cfg())
    }

    #[test]
    fn topology_full_pack() {
        let mut state = BatteryState::default();
        let r = readings([3_700; 4]);
        let out = run(&mut state, &r, Faults::none(), false);
        assert_eq!(state.cell_count, 4);
        assert!(state.balance_port_connected);
        assert!(out.faults.clear.contains(Faults::CELL_CONNECTION));
        assert!(!out.faults.set.contains(Faults::CELL_CONNECTION));
    }

    #[test]
    fn topology_gap_is_a_fault() {
        let mut state = BatteryState::default();
        // Taps 1, 3, 4 live, tap 2 floating: pattern 0b1101.
        let mut r = readings([3_700, 0, 3_700, 3_700]);
        r.pack_mv = 14_800;
        let out = run(&mut state, &r, Faults::none(), false);
        assert_eq!(state.cell_count, 0);
        assert!(!state.balance_port_connected);
        assert!(out.faults.set.contains(Faults::CELL_CONNECTION));
    }

    #[test]
    fn topology_absent_port_is_not_a_fault() {
        let mut state = BatteryState::default();
        let out = run(&mut state, &readings([0; 4]), Faults::none(), false);
        assert_eq!(state.cell_count, 0);
        assert!(out.faults.clear.contains(Faults::CELL_CONNECTION));
    }

    #[test]
    fn topology_first_tap_alone_is_not_a_pack() {
        let mut state = BatteryState::default();
        let out = run(&mut state, &readings([3_700, 0, 0, 0]), Faults::none(), false);
        assert_eq!(state.cell_count, 0);
        assert!(!state.balance_port_connected);
        assert!(out.faults.clear.contains(Faults::CELL_CONNECTION));
    }

    #[test]
    fn topology_three_cell_pack() {
        let mut state = BatteryState::default();
        let out = run(&mut state, &readings([3_700, 3_710, 3_690, 0]), Faults::none(), false);
        assert_eq!(state.cell_count, 3);
        assert!(state.balance_port_connected);
        assert!(out.faults.clear.contains(Faults::CELL_CONNECTION));
    }

    #[test]
    fn fixed_mode_forces_topology() {
        let mut state = BatteryState::default();
        let mut config = cfg();
        config.mode = BalanceMode::Fixed { cell_count: 4 };
        let r = readings([0; 4]);
        let out = run_cycle(&mut state, &r, Faults::none(), false, &config);
        assert_eq!(state.cell_count, 4);
        assert!(state.balance_port_connected);
        assert_eq!(out.discharge_bits, 0);
        assert!(out.faults.clear.contains(Faults::CELL_CONNECTION));
    }

    #[test]
    fn balancing_latch_dead_band() {
        // Disconnected source keeps the scalar at exactly 1.
        let mut state = BatteryState::default();
        let mut r = readings([3_300, 3_310, 3_320, 3_345]);
        r.pack_mv = cfg().connected_thresh_mv as u32; // not above: no source
        run(&mut state, &r, Faults::none(), false);
        assert!(!state.source_connected);
        // 45 mV spread, min above the floor: latches on. Every cell at
        // least 10 mV over the minimum discharges.
        assert!(state.balancing_active);
        assert_eq!(state.discharge_bits, 0b1110);

        // Spread shrinks to 15 mV: inside the dead band, stays latched.
        r.cell_mv = [3_300, 3_305, 3_310, 3_315];
        r.tap_mv = r.cell_mv;
        run(&mut state, &r, Faults::none(), false);
        assert!(state.balancing_active);

        // 5 mV: under the hysteresis threshold, unlatches.
        r.cell_mv = [3_300, 3_301, 3_303, 3_305];
        r.tap_mv = r.cell_mv;
        run(&mut state, &r, Faults::none(), false);
        assert!(!state.balancing_active);
        assert_eq!(state.discharge_bits, 0);
    }

    #[test]
    fn balancing_needs_min_cell_voltage() {
        let mut state = BatteryState::default();
        let mut r = readings([2_900, 2_960, 2_960, 2_960]);
        r.pack_mv = 1_000;
        run(&mut state, &r, Faults::none(), false);
        assert!(!state.balancing_active);
        assert_eq!(state.discharge_bits, 0);
    }

    #[test]
    fn overvoltage_discharge_fires_without_the_latch() {
        let mut state = BatteryState::default();
        let mut r = readings([4_180, 4_185, 4_260, 4_182]);
        r.pack_mv = 1_000; // no source, scalar 1; spread 80 would latch, so
        run(&mut state, &r, Faults::none(), false);
        // force the latch off and re-run the same voltages: the absolute
        // clause must still hold cell 3's resistor on.
        state.balancing_active = false;
        r.cell_mv = [4_258, 4_259, 4_260, 4_259];
        r.tap_mv = r.cell_mv;
        run(&mut state, &r, Faults::none(), false);
        assert!(!state.balancing_active);
        assert_eq!(state.discharge_bits & 0b0100, 0b0100);
    }

    #[test]
    fn source_connected_widens_the_window() {
        let mut state = BatteryState::default();
        // Source present, pack low: scalar ~3.3, enable needs ~132 mV.
        let mut r = readings([3_100, 3_120, 3_140, 3_190]);
        r.pack_mv = 12_550;
        run(&mut state, &r, Faults::none(), false);
        assert!(state.source_connected);
        assert!(!state.balancing_active, "90 mV spread must not latch at scalar 4");

        // Same spread with the pack near full: scalar floors at 1.
        r.cell_mv = [4_000, 4_020, 4_040, 4_090];
        r.tap_mv = r.cell_mv;
        r.pack_mv = 16_150;
        run(&mut state, &r, Faults::none(), false);
        assert!(state.balancing_active);
    }

    #[test]
    fn global_fault_forces_balancing_off() {
        let mut state = BatteryState::default();
        let mut r = readings([3_300, 3_310, 3_320, 3_380]);
        r.pack_mv = 1_000; // no source, scalar 1
        run(&mut state, &r, Faults::none(), false);
        assert!(state.balancing_active);
        run(&mut state, &r, Faults::COMMUNICATION, false);
        assert!(!state.balancing_active);
        assert_eq!(state.discharge_bits, 0);
    }

    #[test]
    fn balancer_holds_while_charging() {
        let mut state = BatteryState::default();
        let mut r = readings([3_300, 3_310, 3_320, 3_380]);
        r.pack_mv = 1_000; // no source, scalar 1
        run(&mut state, &r, Faults::none(), true);
        assert!(!state.balancing_active, "no latch movement while charging");
        run(&mut state, &r, Faults::none(), false);
        assert!(state.balancing_active);
        // The latch state survives charging cycles untouched.
        run(&mut state, &r, Faults::none(), true);
        assert!(state.balancing_active);
    }

    #[test]
    fn discharge_bits_masked_to_cell_count() {
        let mut state = BatteryState {
            discharge_bits: 0b1111,
            ..Default::default()
        };
        let out = run(&mut state, &readings([3_700, 3_710, 3_690, 0]), Faults::none(), false);
        assert_eq!(state.cell_count, 3);
        assert_eq!(out.discharge_bits & 0b1000, 0);
    }

    #[test]
    fn under_voltage_sets_hard_fault() {
        let mut state = BatteryState::default();
        let out = run(&mut state, &readings([2_400, 3_700, 3_700, 3_700]), Faults::none(), false);
        assert!(out.faults.set.contains(Faults::CELL_VOLTAGE));

        let out = run(&mut state, &readings([3_600, 3_700, 3_700, 3_700]), Faults::CELL_VOLTAGE, false);
        assert!(out.faults.clear.contains(Faults::CELL_VOLTAGE));
    }

    #[test]
    fn over_voltage_flag_is_soft_and_self_clearing() {
        let mut state = BatteryState::default();
        let out = run(&mut state, &readings([4_230, 3_700, 3_700, 3_700]), Faults::none(), false);
        assert!(state.cell_over_voltage);
        assert!(!out.faults.set.any(), "soft flag never reaches the registry");

        run(&mut state, &readings([4_100, 3_700, 3_700, 3_700]), Faults::none(), false);
        assert!(!state.cell_over_voltage);
    }

    #[test]
    fn temperature_hysteresis_is_asymmetric() {
        let mut state = BatteryState::default();
        let mut r = readings([3_700; 4]);
        r.mcu_temp_c = 80.0;
        let out = run(&mut state, &r, Faults::none(), false);
        assert!(out.faults.set.contains(Faults::MCU_OVER_TEMP));

        // Back under the operating limit but above recovery: no clear.
        r.mcu_temp_c = 70.0;
        let out = run(&mut state, &r, Faults::MCU_OVER_TEMP, false);
        assert!(!out.faults.set.contains(Faults::MCU_OVER_TEMP));
        assert!(!out.faults.clear.contains(Faults::MCU_OVER_TEMP));

        r.mcu_temp_c = 60.0;
        let out = run(&mut state, &r, Faults::MCU_OVER_TEMP, false);
        assert!(out.faults.clear.contains(Faults::MCU_OVER_TEMP));
    }

    #[test]
    fn requires_charging_tracks_pack_voltage() {
        let mut state = BatteryState::default();
        let mut r = readings([3_700; 4]);
        run(&mut state, &r, Faults::none(), false);
        assert!(state.requires_charging, "14.8 V < 4 * 4.1 V");

        r.cell_mv = [4_150; 4];
        r.tap_mv = r.cell_mv;
        r.pack_mv = 16_600;
        run(&mut state, &r, Faults::none(), false);
        assert!(!state.requires_charging);

        // No source, no charging request regardless of voltage.
        r.cell_mv = [3_700; 4];
        r.tap_mv = r.cell_mv;
        r.pack_mv = 1_000;
        run(&mut state, &r, Faults::none(), false);
        assert!(!state.requires_charging);
    }
}
