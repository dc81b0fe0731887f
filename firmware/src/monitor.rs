//! Battery monitor task: samples the pack, runs the per-cycle monitor
//! logic, drives the discharge resistors, and publishes the snapshot.

use charge_core::battery::{self, BatteryState, MAX_CELLS};
use embassy_stm32::gpio::Output;
use embassy_time::Ticker;

use crate::config;
use crate::sense::PackSense;
use crate::shared_state;

pub struct BalanceOutputs {
    pins: [Output<'static>; MAX_CELLS],
}

impl BalanceOutputs {
    pub fn new(pins: [Output<'static>; MAX_CELLS]) -> Self {
        BalanceOutputs { pins }
    }

    fn apply(&mut self, bits: u8) {
        for (i, pin) in self.pins.iter_mut().enumerate() {
            if bits & (1 << i) != 0 {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
    }
}

#[embassy_executor::task]
pub async fn battery_monitor_task(mut sense: PackSense, mut outputs: BalanceOutputs) {
    let cfg = config::monitor_config();
    let mut state = BatteryState::new();
    let mut ticker = Ticker::every(config::MONITOR_PERIOD);

    loop {
        let readings = sense.sample();
        let registry = shared_state::faults();
        let regulator_charging = shared_state::regulator_snapshot().charging;

        let out = battery::run_cycle(&mut state, &readings, registry, regulator_charging, &cfg);

        shared_state::apply_fault_delta(out.faults);
        outputs.apply(out.discharge_bits);
        shared_state::publish_battery(state);
        shared_state::publish_pack_voltage(readings.pack_mv);
        shared_state::publish_mcu_temp(readings.mcu_temp_c);

        defmt::debug!(
            "monitor: cells={} pack={}mV discharge={:#b} balancing={} needs-charge={}",
            state.cell_count,
            readings.pack_mv,
            out.discharge_bits,
            state.balancing_active,
            state.requires_charging,
        );

        ticker.next().await;
    }
}
