//! Compile-time knobs for the charger firmware.
//! Edit these constants and rebuild.

use charge_core::config::{BalanceMode, ChargeProfile, ChargerConfig, MonitorConfig};
use embassy_time::Duration;

/// Topology handling: detect from the balance taps, or assume a fixed
/// series count on boards without a balance port.
pub const BALANCE_MODE: BalanceMode = BalanceMode::Detect;

/// Charge-voltage strategy. `Fixed` bypasses the per-cell-count tables.
pub const CHARGE_PROFILE: ChargeProfile = ChargeProfile::PerCell;

/// Series count assumed before the monitor has produced a topology
/// (precharge recovery at boot) and in `Fixed` balance mode.
pub const NOMINAL_SERIES_CELLS: u8 = 4;

/// Battery monitor / safety cycle.
pub const MONITOR_PERIOD: Duration = Duration::from_millis(1_000);
/// Regulator / charge controller cycle.
pub const CHARGER_PERIOD: Duration = Duration::from_millis(250);

/// Bounded wait for the register bus mutex; losing the race skips the
/// transfer for this cycle.
pub const BUS_MUTEX_WAIT: Duration = Duration::from_millis(300);
/// Overall per-transfer budget, independent of the retry count.
pub const BUS_TRANSFER_BUDGET: Duration = Duration::from_millis(200);

/// ADC conversion polling: fixed inter-poll delay, bounded iterations.
pub const ADC_POLL_INTERVAL: Duration = Duration::from_millis(80);
pub const ADC_POLL_LIMIT: u8 = 25;

/// Settle time with the output held off (termination, init).
pub const OUTPUT_SETTLE: Duration = Duration::from_millis(500);
/// Longer pulse used by the stale-disconnect guard.
pub const DISCONNECT_SETTLE: Duration = Duration::from_millis(1_000);
pub const INIT_SETTLE: Duration = Duration::from_millis(250);

/// Re-probe backoff while the regulator is unreachable.
pub const PROBE_BACKOFF_MIN: Duration = Duration::from_millis(250);
pub const PROBE_BACKOFF_MAX: Duration = Duration::from_millis(4_000);

/// Input-source assumptions until the PD negotiation task publishes a
/// contract: 20 V / 3 A class supply.
pub const INPUT_MAX_CURRENT_MA: u32 = 3_000;
pub const INPUT_MAX_POWER_MW: u32 = 60_000;

pub fn monitor_config() -> MonitorConfig {
    MonitorConfig {
        mode: BALANCE_MODE,
        ..Default::default()
    }
}

pub fn charger_config() -> ChargerConfig {
    ChargerConfig {
        profile: CHARGE_PROFILE,
        ..Default::default()
    }
}
