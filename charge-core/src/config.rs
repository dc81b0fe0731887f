//! Tunable thresholds and strategy selection.
//!
//! All behavior switches are plain values chosen at initialization, so
//! both balancing modes and both charge profiles stay testable in one
//! binary.

/// How the monitor decides the pack topology.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BalanceMode {
    /// Detect cell count from the balance-port taps and run the balancer.
    Detect,
    /// No balance port fitted: assume a fixed series count, never balance.
    Fixed { cell_count: u8 },
}

/// How the charge-voltage setpoint is derived.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargeProfile {
    /// Per-cell-count setpoint tables (4.192 V/cell class profile).
    PerCell,
    /// Fixed target, e.g. for chemistries charged below 4.2 V/cell.
    /// `precharge_mv` doubles as the fast-charge threshold programmed into
    /// the minimum-system-voltage register.
    Fixed { target_mv: u16, precharge_mv: u16 },
}

/// Battery Monitor thresholds. Voltages in millivolts.
#[derive(Clone, Copy)]
pub struct MonitorConfig {
    pub mode: BalanceMode,
    /// A tap or cell above this reads as "connected".
    pub connected_thresh_mv: u16,
    /// Balancing never discharges below this cell voltage.
    pub min_balance_mv: u16,
    /// Per-cell voltage under which the pack still wants charge.
    pub charge_enable_mv: u16,
    /// Spread that latches the balancer on (at scalar 1).
    pub enable_delta_mv: u16,
    /// Spread under which the balancer unlatches; also the per-cell
    /// discharge threshold above the pack minimum.
    pub hysteresis_delta_mv: u16,
    /// Widest multiplier applied to the deltas while the source is
    /// connected and the pack is far from full.
    pub balance_scalar_max: f32,
    /// Cell voltage that forces its discharge resistor on unconditionally.
    pub overvolt_discharge_mv: u16,
    /// Cell voltage that raises the soft charge-inhibit flag.
    pub overvolt_inhibit_mv: u16,
    /// Cell voltage under which the hard under-voltage fault is raised.
    pub min_safe_mv: u16,
    pub max_op_temp_c: f32,
    pub recovery_temp_c: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mode: BalanceMode::Detect,
            connected_thresh_mv: 2_000,
            min_balance_mv: 3_000,
            charge_enable_mv: 4_100,
            enable_delta_mv: 40,
            hysteresis_delta_mv: 10,
            balance_scalar_max: 4.0,
            overvolt_discharge_mv: 4_250,
            overvolt_inhibit_mv: 4_225,
            min_safe_mv: 2_500,
            max_op_temp_c: 75.0,
            recovery_temp_c: 65.0,
        }
    }
}

/// Charge Controller tuning.
#[derive(Clone, Copy)]
pub struct ChargerConfig {
    pub profile: ChargeProfile,
    /// Hard ceiling on the programmed charge current.
    pub max_charge_current_ma: u32,
    /// Hard ceiling on the computed charge power.
    pub max_charging_power_mw: u32,
    /// Converter efficiency assumed when budgeting against the source.
    pub efficiency: f32,
    /// Die temperature above which the power budget derates linearly.
    pub throttle_temp_c: f32,
    /// Measured charge current under this counts toward termination.
    pub term_current_ma: u32,
    /// Consecutive low samples required to terminate.
    pub term_sample_limit: u8,
    /// Per-cell voltage implying the pack terminals were pulled (the
    /// regulator is regulating into an open circuit).
    pub disconnect_thresh_mv: u16,
    pub precharge: PrechargeConfig,
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            profile: ChargeProfile::PerCell,
            max_charge_current_ma: 6_400,
            max_charging_power_mw: 100_000,
            efficiency: 0.92,
            throttle_temp_c: 50.0,
            term_current_ma: 100,
            term_sample_limit: 3,
            disconnect_thresh_mv: 4_400,
            precharge: PrechargeConfig::default(),
        }
    }
}

/// Under-voltage recovery precharge tuning.
#[derive(Clone, Copy)]
pub struct PrechargeConfig {
    /// Per-cell voltage at which the pack counts as awake.
    pub wake_mv_per_cell: u16,
    /// Fixed low current applied during recovery bursts.
    pub current_ma: u32,
    /// Bounded number of burst attempts before giving up.
    pub attempt_budget: u16,
    /// Cycles in the very first burst; a deeply discharged regulator
    /// sometimes needs the longer pulse to wake at all.
    pub first_burst_cycles: u8,
    pub burst_cycles: u8,
    /// Measurement-only cycles after a timed-out recovery.
    pub cooldown_cycles: u8,
}

impl Default for PrechargeConfig {
    fn default() -> Self {
        Self {
            wake_mv_per_cell: 3_100,
            current_ma: 256,
            attempt_budget: 300,
            first_burst_cycles: 20,
            burst_cycles: 12,
            cooldown_cycles: 4,
        }
    }
}
