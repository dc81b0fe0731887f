//! BQ25703A register map, as far as this firmware touches it.
//! 16-bit registers are addressed by their low byte and written LSB first.

pub const I2C_ADDR: u8 = 0x6B;

pub const REG_CHARGE_OPTION_0: u8 = 0x00;
/// Fixed ChargeOption0 bytes: watchdog off, IDPM on, 8s PWM off-comparator
/// deglitch, out-of-audio switching.
pub const CHARGE_OPTION_0_LSB: u8 = 0b0000_1110;
pub const CHARGE_OPTION_0_MSB: u8 = 0b0010_0110;

pub const REG_CHARGE_CURRENT: u8 = 0x02;
pub const REG_MAX_CHARGE_VOLTAGE: u8 = 0x04;
pub const REG_MIN_SYSTEM_VOLTAGE: u8 = 0x0D;

pub const REG_CHARGE_STATUS: u8 = 0x20;
/// IN_FCHRG flag in the ChargerStatus high byte: the regulator is
/// actively fast-charging.
pub const CHARGE_STATUS_CHARGING_MSB: u8 = 1 << 2;

// ADC result registers, one byte each.
pub const REG_ADC_VBUS: u8 = 0x27;
pub const REG_ADC_ICHG: u8 = 0x29;
pub const REG_ADC_IIN: u8 = 0x2B;
pub const REG_ADC_VBAT: u8 = 0x2C;
pub const REG_ADC_VSYS: u8 = 0x2D;

pub const REG_MANUFACTURER_ID: u8 = 0x2E;
pub const REG_DEVICE_ID: u8 = 0x2F;
pub const MANUFACTURER_ID: u8 = 0x40;
pub const DEVICE_ID: u8 = 0x78;

pub const REG_ADC_OPTION: u8 = 0x3A;
pub const REG_ADC_OPTION_MSB: u8 = 0x3B;
/// Channel enables, ADCOption low byte: VBAT, VSYS, ICHG, IIN, VBUS.
pub const ADC_CHANNELS_LSB: u8 = 0b0101_0111;
/// One-shot conversion start, ADCOption high byte. Self-clears when the
/// conversion completes.
pub const ADC_START_MSB: u8 = 1 << 6;
