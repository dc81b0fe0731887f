//! Charge controller task: regulator bring-up, under-voltage precharge
//! recovery, then the steady control loop that budgets power, programs
//! the regulator, and gates the output.

use charge_core::charger::{
    charge_current_target_ma, charge_power_budget_mw, ChargeDutyGate, GateDecision,
    PrechargeRecovery, PrechargeState, PrechargeStep, TerminationDetector,
};
use charge_core::config::{BalanceMode, ChargerConfig};
use charge_core::fault::Faults;
use embassy_stm32::gpio::Input;
use embassy_time::{Duration, Ticker, Timer};

use crate::bq25703::Bq25703a;
use crate::config;
use crate::shared_state;
use crate::I2cBus;

#[embassy_executor::task]
pub async fn charge_control_task(mut dev: Bq25703a<I2cBus>, chrg_ok: Input<'static>) {
    let cfg = config::charger_config();

    // Power path off and boost mode disabled before touching anything.
    dev.set_output_enable(false);
    dev.set_otg_enable(false);

    dev.probe().await;
    let _ = dev.write_charge_option().await;
    let _ = dev.enable_adc().await;
    Timer::after(config::INIT_SETTLE).await;

    precharge_recovery(&mut dev, &cfg).await;

    let mut term = TerminationDetector::default();
    let mut gate = ChargeDutyGate::default();
    let mut backoff = config::PROBE_BACKOFF_MIN;
    let mut ticker = Ticker::every(config::CHARGER_PERIOD);

    loop {
        // CHRG_OK follows the regulator's input-voltage comparator.
        if chrg_ok.is_high() {
            shared_state::clear_fault(Faults::INPUT_VOLTAGE);
        } else {
            shared_state::set_fault(Faults::INPUT_VOLTAGE);
        }

        // A communication fault raised anywhere invalidates the link.
        if shared_state::faults().contains(Faults::COMMUNICATION) {
            dev.mark_disconnected();
        }
        if !dev.state.connected {
            dev.set_output_enable(false);
            if dev.probe().await {
                defmt::info!("regulator reconnected");
                backoff = config::PROBE_BACKOFF_MIN;
                let _ = dev.write_charge_option().await;
                let _ = dev.enable_adc().await;
            } else {
                Timer::after(backoff).await;
                backoff = (backoff * 2).min(config::PROBE_BACKOFF_MAX);
                continue;
            }
        }

        let _ = dev.read_charge_status().await;
        let _ = dev.refresh_measurements().await;
        shared_state::publish_regulator(dev.state);

        // In detect mode the output is blanked periodically so the
        // balancer measures quiet cells.
        let decision = match config::BALANCE_MODE {
            BalanceMode::Detect => gate.advance(),
            BalanceMode::Fixed { .. } => GateDecision::Run,
        };
        match decision {
            GateDecision::Run => control_output(&mut dev, &cfg, &mut term).await,
            GateDecision::ForceOff => dev.set_output_enable(false),
            GateDecision::Skip => {}
        }

        ticker.next().await;
    }
}

/// One steady-state control cycle: either program the regulator for the
/// computed budget and enable the output, or hold everything off.
async fn control_output(
    dev: &mut Bq25703a<I2cBus>,
    cfg: &ChargerConfig,
    term: &mut TerminationDetector,
) {
    let battery = shared_state::battery_snapshot();
    let input = shared_state::input_source();
    let faults = shared_state::faults();

    let charge_allowed = battery.source_connected
        && battery.balance_port_connected
        && !faults.any()
        && input.power_ready
        && !battery.cell_over_voltage;

    if !charge_allowed {
        dev.set_output_enable(false);
        let _ = dev.set_charge_voltage(0).await;
        let _ = dev.set_charge_current(0).await;
        term.reset();
        return;
    }

    let _ = dev.set_charge_voltage(battery.cell_count).await;

    let budget_mw = charge_power_budget_mw(
        dev.state.vbus_mv,
        input.max_current_ma,
        input.max_power_mw,
        shared_state::mcu_temp_c(),
        cfg,
    );
    let target_ma = charge_current_target_ma(budget_mw, shared_state::pack_voltage_mv());
    let _ = dev.set_charge_current(target_ma).await;
    dev.set_output_enable(true);

    // A regulated battery voltage far above the per-cell ceiling means the
    // pack terminals were pulled mid-charge; pulse the output off so the
    // regulator re-detects.
    let disconnect_mv = battery.cell_count as u32 * cfg.disconnect_thresh_mv as u32;
    if dev.state.vbat_mv > disconnect_mv {
        defmt::warn!("battery looks disconnected (vbat {}mV), pulsing output", dev.state.vbat_mv);
        dev.set_output_enable(false);
        Timer::after(config::DISCONNECT_SETTLE).await;
        dev.set_output_enable(true);
    }

    if term.sample(battery.requires_charging, dev.state.charge_current_ma, cfg) {
        defmt::info!("charge terminated at {}mA", dev.state.charge_current_ma);
        dev.set_output_enable(false);
        Timer::after(config::OUTPUT_SETTLE).await;
        term.reset();
    }
}

/// Series count to assume for precharge before the monitor has settled
/// on a topology.
fn nominal_cell_count() -> u8 {
    match config::BALANCE_MODE {
        BalanceMode::Fixed { cell_count } => cell_count,
        BalanceMode::Detect => {
            let detected = shared_state::battery_snapshot().cell_count;
            if detected == 0 {
                config::NOMINAL_SERIES_CELLS
            } else {
                detected
            }
        }
    }
}

/// Drive the under-voltage recovery state machine: apply low-current
/// bursts at the nominal voltage until the pack wakes or the attempt
/// budget runs out. Runs once per power-on, before normal control.
async fn precharge_recovery(dev: &mut Bq25703a<I2cBus>, cfg: &ChargerConfig) {
    let mut recovery = PrechargeRecovery::new(cfg.precharge);
    let cycle = config::CHARGER_PERIOD;

    loop {
        let _ = dev.refresh_measurements().await;
        let cells = nominal_cell_count();

        match recovery.evaluate(dev.state.vbat_mv, cells) {
            PrechargeStep::Apply { cycles } => {
                let _ = dev.set_charge_voltage(cells).await;
                let _ = dev.set_charge_current(cfg.precharge.current_ma).await;
                dev.set_output_enable(true);
                burst(dev, cycles, cycle).await;
            }
            PrechargeStep::CoolDown { cycles } => {
                dev.set_output_enable(false);
                let _ = dev.set_charge_current(0).await;
                burst(dev, cycles, cycle).await;
            }
            PrechargeStep::Done => break,
        }
    }

    match recovery.state() {
        PrechargeState::Recovered => {
            defmt::info!("precharge: pack awake at {}mV", dev.state.vbat_mv)
        }
        PrechargeState::TimedOut => {
            defmt::warn!("precharge: gave up at {}mV", dev.state.vbat_mv)
        }
        _ => {}
    }
    dev.set_output_enable(false);
}

/// Hold the current output setting for `cycles` control periods while
/// keeping the measurements fresh.
async fn burst(dev: &mut Bq25703a<I2cBus>, cycles: u8, period: Duration) {
    for _ in 0..cycles {
        Timer::after(period).await;
        let _ = dev.read_charge_status().await;
        let _ = dev.refresh_measurements().await;
        shared_state::publish_regulator(dev.state);
    }
}
