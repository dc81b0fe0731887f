//! Cross-task state: the fault registry plus published snapshots of the
//! battery, the regulator, and the negotiated input source.
//!
//! Snapshots are `Copy` records behind critical-section mutexes; each is
//! written by exactly one task and read by the others. The fault registry
//! is a single atomic byte so readers never see a torn view.

use core::cell::Cell;
use core::sync::atomic::{AtomicU8, Ordering};

use charge_core::battery::BatteryState;
use charge_core::fault::{FaultDelta, Faults};
use charge_core::regulator::RegulatorState;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::config;

/// Negotiated input-source contract, published by the USB-PD task.
/// `power_ready` stays false until a contract is in place.
#[derive(Clone, Copy, defmt::Format)]
pub struct InputSource {
    pub power_ready: bool,
    pub max_current_ma: u32,
    pub max_power_mw: u32,
}

static FAULTS: AtomicU8 = AtomicU8::new(0);

static BATTERY: Mutex<CriticalSectionRawMutex, Cell<BatteryState>> =
    Mutex::new(Cell::new(BatteryState::new()));

static REGULATOR: Mutex<CriticalSectionRawMutex, Cell<RegulatorState>> =
    Mutex::new(Cell::new(RegulatorState::new()));

static INPUT_SOURCE: Mutex<CriticalSectionRawMutex, Cell<InputSource>> =
    Mutex::new(Cell::new(InputSource {
        power_ready: false,
        max_current_ma: config::INPUT_MAX_CURRENT_MA,
        max_power_mw: config::INPUT_MAX_POWER_MW,
    }));

// Auxiliary monitor readings the charger needs for its power budget.
static PACK_MV: Mutex<CriticalSectionRawMutex, Cell<u32>> = Mutex::new(Cell::new(0));
static MCU_TEMP_C: Mutex<CriticalSectionRawMutex, Cell<f32>> = Mutex::new(Cell::new(25.0));

pub fn faults() -> Faults {
    Faults::from_bits(FAULTS.load(Ordering::Relaxed))
}

pub fn set_fault(fault: Faults) {
    let prev = FAULTS.fetch_or(fault.bits(), Ordering::Relaxed);
    if prev & fault.bits() != fault.bits() {
        defmt::warn!("fault raised: {:#b}", fault.bits());
    }
}

pub fn clear_fault(fault: Faults) {
    let prev = FAULTS.fetch_and(!fault.bits(), Ordering::Relaxed);
    if prev & fault.bits() != 0 {
        defmt::info!("fault cleared: {:#b}", fault.bits());
    }
}

/// Apply one cycle's set/clear decisions. Set wins if a bit appears on
/// both sides, which cannot happen for deltas built by the monitor.
pub fn apply_fault_delta(delta: FaultDelta) {
    if delta.clear.any() {
        clear_fault(delta.clear);
    }
    if delta.set.any() {
        set_fault(delta.set);
    }
}

pub fn battery_snapshot() -> BatteryState {
    BATTERY.lock(|cell| cell.get())
}

pub fn publish_battery(state: BatteryState) {
    BATTERY.lock(|cell| cell.set(state));
}

pub fn regulator_snapshot() -> RegulatorState {
    REGULATOR.lock(|cell| cell.get())
}

pub fn publish_regulator(state: RegulatorState) {
    REGULATOR.lock(|cell| cell.set(state));
}

pub fn input_source() -> InputSource {
    INPUT_SOURCE.lock(|cell| cell.get())
}

pub fn publish_input_source(source: InputSource) {
    INPUT_SOURCE.lock(|cell| cell.set(source));
}

pub fn pack_voltage_mv() -> u32 {
    PACK_MV.lock(|cell| cell.get())
}

pub fn publish_pack_voltage(mv: u32) {
    PACK_MV.lock(|cell| cell.set(mv));
}

pub fn mcu_temp_c() -> f32 {
    MCU_TEMP_C.lock(|cell| cell.get())
}

pub fn publish_mcu_temp(temp_c: f32) {
    MCU_TEMP_C.lock(|cell| cell.set(temp_c));
}
