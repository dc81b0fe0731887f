#![no_std]
#![no_main]

mod bq25703;
mod charger;
mod config;
mod monitor;
mod sense;
mod shared_state;
mod transport;

use embassy_executor::Spawner;
use embassy_stm32::adc::{Adc, AdcChannel};
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_stm32::i2c::{Config as I2cConfig, I2c};
use embassy_stm32::mode::Async;
use embassy_stm32::peripherals::*;
use embassy_stm32::time::Hertz;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use crate::bq25703::{regs, Bq25703a};
use crate::monitor::BalanceOutputs;
use crate::sense::PackSense;
use crate::transport::RegulatorBus;

pub type I2cBus = I2c<'static, Async>;
type I2cBusMutex = Mutex<CriticalSectionRawMutex, I2cBus>;

static I2C_BUS: StaticCell<I2cBusMutex> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct Irqs {
    I2C1 => embassy_stm32::i2c::EventInterruptHandler<I2C1>,
            embassy_stm32::i2c::ErrorInterruptHandler<I2C1>;
});

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    use embassy_stm32::rcc::{Pll, PllMul, PllPreDiv, PllRDiv, PllSource, Sysclk};

    let mut config = embassy_stm32::Config::default();
    // HSI 16 MHz * 8 / 2 = 64 MHz sysclk.
    config.rcc.pll = Some(Pll {
        source: PllSource::HSI,
        prediv: PllPreDiv::DIV1,
        mul: PllMul::MUL8,
        divp: None,
        divq: None,
        divr: Some(PllRDiv::DIV2),
    });
    config.rcc.sys = Sysclk::PLL1_R;

    let p = embassy_stm32::init(config);
    defmt::info!("balance charger up");

    // Pack-side analog front end.
    let mut adc = Adc::new(p.ADC1);
    let temp = adc.enable_temperature().degrade_adc();
    let sense = PackSense::new(
        adc,
        [
            p.PA0.degrade_adc(),
            p.PA1.degrade_adc(),
            p.PA2.degrade_adc(),
            p.PA3.degrade_adc(),
        ],
        p.PA4.degrade_adc(),
        temp,
    );

    // Discharge resistor drivers, one per cell slot.
    let outputs = BalanceOutputs::new([
        Output::new(p.PB12, Level::Low, Speed::Low),
        Output::new(p.PB13, Level::Low, Speed::Low),
        Output::new(p.PB14, Level::Low, Speed::Low),
        Output::new(p.PB15, Level::Low, Speed::Low),
    ]);

    // Regulator I2C bus and control lines.
    let i2c = I2c::new(
        p.I2C1,
        p.PB6,
        p.PB7,
        Irqs,
        p.DMA1_CH1,
        p.DMA1_CH2,
        Hertz(100_000),
        I2cConfig::default(),
    );
    let bus_mutex: &'static I2cBusMutex = I2C_BUS.init(Mutex::new(i2c));

    let regulator = Bq25703a::new(
        RegulatorBus::new(bus_mutex, regs::I2C_ADDR),
        config::charger_config(),
        Output::new(p.PA8, Level::Low, Speed::Low), // ILIM_HIZ, low = path off
        Output::new(p.PA9, Level::High, Speed::Low), // FAN_EN, active low
        Output::new(p.PA10, Level::Low, Speed::Low), // EN_OTG
    );
    let chrg_ok = Input::new(p.PB0, Pull::None);

    // Bench default until a PD controller task publishes a real contract.
    shared_state::publish_input_source(shared_state::InputSource {
        power_ready: true,
        max_current_ma: config::INPUT_MAX_CURRENT_MA,
        max_power_mw: config::INPUT_MAX_POWER_MW,
    });

    spawner
        .spawn(monitor::battery_monitor_task(sense, outputs))
        .unwrap();
    spawner
        .spawn(charger::charge_control_task(regulator, chrg_ok))
        .unwrap();
}
