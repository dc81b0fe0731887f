//! High-level BQ25703A operations on top of the register transport. Owns
//! the cached [`RegulatorState`] and the three control lines tied to the
//! regulator's power path.

use charge_core::config::ChargerConfig;
use charge_core::fault::Faults;
use charge_core::regulator::{self, RegulatorState};
use embassy_stm32::gpio::Output;
use embassy_time::Timer;
use embedded_hal_async::i2c::{Error as I2cError, I2c};

use super::regs;
use crate::config;
use crate::shared_state;
use crate::transport::{Error, RegulatorBus};

pub struct Bq25703a<BUS: 'static> {
    bus: RegulatorBus<BUS>,
    pub state: RegulatorState,
    cfg: ChargerConfig,
    /// ILIM_HIZ: high enables the power path.
    hiz_pin: Output<'static>,
    /// FAN_EN, active low; the fan runs whenever the output does.
    fan_pin: Output<'static>,
    /// EN_OTG: reverse (boost) mode, held off by this firmware.
    otg_pin: Output<'static>,
}

impl<BUS, E> Bq25703a<BUS>
where
    BUS: I2c<Error = E>,
    E: I2cError,
{
    pub fn new(
        bus: RegulatorBus<BUS>,
        cfg: ChargerConfig,
        hiz_pin: Output<'static>,
        fan_pin: Output<'static>,
        otg_pin: Output<'static>,
    ) -> Self {
        Bq25703a {
            bus,
            state: RegulatorState::new(),
            cfg,
            hiz_pin,
            fan_pin,
            otg_pin,
        }
    }

    /// Identify the IC by its manufacturer and device ids. Updates the
    /// connected flag and the communication fault on a definitive answer;
    /// losing the bus mutex changes nothing.
    pub async fn probe(&mut self) -> bool {
        let ids = async {
            let mfr = self.bus.read_reg(regs::REG_MANUFACTURER_ID).await?;
            let dev = self.bus.read_reg(regs::REG_DEVICE_ID).await?;
            Ok::<_, Error<E>>((mfr, dev))
        }
        .await;

        match ids {
            Ok((regs::MANUFACTURER_ID, regs::DEVICE_ID)) => {
                self.state.connected = true;
                shared_state::clear_fault(Faults::COMMUNICATION);
                true
            }
            Ok((mfr, dev)) => {
                defmt::warn!("regulator id mismatch: {:#x}/{:#x}", mfr, dev);
                self.state.connected = false;
                shared_state::set_fault(Faults::COMMUNICATION);
                false
            }
            Err(Error::Busy) => self.state.connected,
            Err(_) => {
                self.state.connected = false;
                shared_state::set_fault(Faults::COMMUNICATION);
                false
            }
        }
    }

    pub fn mark_disconnected(&mut self) {
        self.state.connected = false;
    }

    /// Program the fixed ChargeOption0 bytes (watchdog disabled).
    pub async fn write_charge_option(&self) -> Result<(), Error<E>> {
        self.bus
            .write_reg16(
                regs::REG_CHARGE_OPTION_0,
                regs::CHARGE_OPTION_0_LSB,
                regs::CHARGE_OPTION_0_MSB,
            )
            .await
    }

    /// Enable the ADC channels this firmware reads.
    pub async fn enable_adc(&self) -> Result<(), Error<E>> {
        self.bus
            .write_reg(regs::REG_ADC_OPTION, regs::ADC_CHANNELS_LSB)
            .await
    }

    /// Refresh the charging flag from ChargerStatus.
    pub async fn read_charge_status(&mut self) -> Result<(), Error<E>> {
        let status = self.bus.read_reg16(regs::REG_CHARGE_STATUS).await?;
        self.state.charging = status[1] & regs::CHARGE_STATUS_CHARGING_MSB != 0;
        Ok(())
    }

    /// One-shot ADC conversion, then read back all five result registers.
    /// On any failure the cached measurements keep their last good values.
    pub async fn refresh_measurements(&mut self) -> Result<(), Error<E>> {
        self.bus
            .write_reg(regs::REG_ADC_OPTION_MSB, regs::ADC_START_MSB)
            .await?;

        let mut polls = 0u8;
        loop {
            Timer::after(config::ADC_POLL_INTERVAL).await;
            let ctrl = self.bus.read_reg(regs::REG_ADC_OPTION_MSB).await?;
            if ctrl & regs::ADC_START_MSB == 0 {
                break;
            }
            polls += 1;
            if polls >= config::ADC_POLL_LIMIT {
                // Conversion stalled; keep the previous readings.
                defmt::warn!("regulator ADC conversion did not complete");
                return Ok(());
            }
        }

        let vbat = self.bus.read_reg(regs::REG_ADC_VBAT).await?;
        let vsys = self.bus.read_reg(regs::REG_ADC_VSYS).await?;
        let ichg = self.bus.read_reg(regs::REG_ADC_ICHG).await?;
        let iin = self.bus.read_reg(regs::REG_ADC_IIN).await?;
        let vbus = self.bus.read_reg(regs::REG_ADC_VBUS).await?;

        self.state.vbat_mv = regulator::decode_vbat_mv(vbat);
        self.state.vsys_mv = regulator::decode_vsys_mv(vsys);
        self.state.charge_current_ma = regulator::decode_ichg_ma(ichg);
        self.state.input_current_ma = regulator::decode_iin_ma(iin);
        self.state.vbus_mv = regulator::decode_vbus_mv(vbus);
        Ok(())
    }

    /// Program the max-charge-voltage and minimum-system-voltage registers
    /// for the detected cell count.
    pub async fn set_charge_voltage(&self, cell_count: u8) -> Result<(), Error<E>> {
        let sp = regulator::setpoints(self.cfg.profile, cell_count);
        self.bus
            .write_reg(
                regs::REG_MIN_SYSTEM_VOLTAGE,
                regulator::min_system_byte(sp.min_system_mv),
            )
            .await?;
        let (msb, lsb) = regulator::charge_voltage_bytes(sp.charge_mv);
        self.bus
            .write_reg16(regs::REG_MAX_CHARGE_VOLTAGE, lsb, msb)
            .await
    }

    /// Program the charge-current limit, quantized to the 64 mA register
    /// step and clamped to the configured hardware ceiling.
    pub async fn set_charge_current(&mut self, limit_ma: u32) -> Result<(), Error<E>> {
        let code = regulator::charge_current_code(limit_ma, self.cfg.max_charge_current_ma);
        let (msb, lsb) = regulator::charge_current_bytes(code);
        self.bus
            .write_reg16(regs::REG_CHARGE_CURRENT, lsb, msb)
            .await?;
        self.state.max_charge_current_ma = regulator::charge_current_ma(code);
        Ok(())
    }

    /// Gate the power path. The fan line tracks it.
    pub fn set_output_enable(&mut self, enable: bool) {
        if enable {
            self.hiz_pin.set_high();
            self.fan_pin.set_low();
        } else {
            self.hiz_pin.set_low();
            self.fan_pin.set_high();
        }
    }

    pub fn set_otg_enable(&mut self, enable: bool) {
        if enable {
            self.otg_pin.set_high();
        } else {
            self.otg_pin.set_low();
        }
    }
}
