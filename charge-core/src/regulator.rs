//! Cached regulator state and the bit-exact register codecs for the
//! BQ25703A-class charge regulator.
//!
//! The codecs are pure so the exact bit layouts the IC accepts can be
//! pinned down by host tests; the firmware driver only shuttles the bytes.

use crate::config::ChargeProfile;

/// Regulator record. Owned by the charger task; measured fields always
/// hold the last successful ADC readback and are never implicitly zeroed.
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegulatorState {
    pub connected: bool,
    pub charging: bool,
    pub vbus_mv: u32,
    pub vbat_mv: u32,
    pub vsys_mv: u32,
    pub charge_current_ma: u32,
    pub input_current_ma: u32,
    /// Ceiling recorded by the last `set_charge_current` call.
    pub max_charge_current_ma: u32,
}

impl RegulatorState {
    pub const fn new() -> Self {
        RegulatorState {
            connected: false,
            charging: false,
            vbus_mv: 0,
            vbat_mv: 0,
            vsys_mv: 0,
            charge_current_ma: 0,
            input_current_ma: 0,
            max_charge_current_ma: 0,
        }
    }
}

/// Per-cell-count max-charge-voltage setpoints (mV), cells 1..=4.
/// The register weights are binary millivolts, so these values *are* the
/// bit patterns the original wrote.
pub const CHARGE_VOLTAGE_MV: [u16; 4] = [4_192, 8_400, 12_592, 16_800];

/// Matching minimum-system-voltage setpoints (mV), cells 1..=4.
pub const MIN_SYSTEM_MV: [u16; 4] = [2_816, 5_632, 8_448, 11_264];

/// Fallback minimum-system-voltage when no valid topology is known.
pub const MIN_SYSTEM_FLOOR_MV: u16 = 1_024;

/// Charge-current register step and code ceiling (7-bit field).
pub const CHARGE_CURRENT_STEP_MA: u32 = 64;
pub const CHARGE_CURRENT_CODE_MAX: u32 = 128;

// ADC result register scaling, one scale+offset pair per register.
pub const VBAT_ADC_SCALE_MV: u32 = 64;
pub const VBAT_ADC_OFFSET_MV: u32 = 2_880;
pub const VSYS_ADC_SCALE_MV: u32 = 64;
pub const VSYS_ADC_OFFSET_MV: u32 = 2_880;
pub const ICHG_ADC_SCALE_MA: u32 = 64;
pub const IIN_ADC_SCALE_MA: u32 = 50;
pub const VBUS_ADC_SCALE_MV: u32 = 64;
pub const VBUS_ADC_OFFSET_MV: u32 = 3_200;

/// Quantize a charge-current limit into the 7-bit 64 mA/step code.
/// Integer division floors, so the effective limit never exceeds the
/// request.
pub fn charge_current_code(limit_ma: u32, max_ma: u32) -> u8 {
    let clamped = limit_ma.min(max_ma);
    (clamped / CHARGE_CURRENT_STEP_MA).min(CHARGE_CURRENT_CODE_MAX) as u8
}

/// Split a charge-current code into the two register bytes: the low two
/// code bits land in byte 2 bits [7:6], the upper bits in byte 1 bits
/// [5:0]. The IC rejects any other layout.
pub fn charge_current_bytes(code: u8) -> (u8, u8) {
    (code >> 2, code << 6)
}

/// Effective limit programmed by a code (decode of the lossy floor).
pub fn charge_current_ma(code: u8) -> u32 {
    code as u32 * CHARGE_CURRENT_STEP_MA
}

/// Reassemble a code from the two register bytes.
pub fn charge_current_code_from_bytes(msb: u8, lsb: u8) -> u8 {
    (msb << 2) | (lsb >> 6)
}

/// Voltage/minimum-system setpoint pair resolved for a profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Setpoints {
    pub charge_mv: u16,
    pub min_system_mv: u16,
}

/// Resolve the charge-voltage setpoints for the given profile and
/// detected cell count. An invalid count (0 or > 4) yields the zero
/// target with the floor minimum-system voltage, which leaves the
/// regulator unable to source charge current.
pub fn setpoints(profile: ChargeProfile, cell_count: u8) -> Setpoints {
    match profile {
        ChargeProfile::Fixed {
            target_mv,
            precharge_mv,
        } => Setpoints {
            charge_mv: target_mv,
            min_system_mv: precharge_mv,
        },
        ChargeProfile::PerCell => match cell_count {
            1..=4 => Setpoints {
                charge_mv: CHARGE_VOLTAGE_MV[cell_count as usize - 1],
                min_system_mv: MIN_SYSTEM_MV[cell_count as usize - 1],
            },
            _ => Setpoints {
                charge_mv: 0,
                min_system_mv: MIN_SYSTEM_FLOOR_MV,
            },
        },
    }
}

/// Max-charge-voltage register bytes. 16 mV resolution: bits 14:8 in the
/// high byte, bits 7:4 in the low byte, low nibble always zero.
pub fn charge_voltage_bytes(mv: u16) -> (u8, u8) {
    ((mv >> 8) as u8 & 0x7F, (mv & 0xF0) as u8)
}

/// Minimum-system-voltage register byte, 256 mV resolution.
pub fn min_system_byte(mv: u16) -> u8 {
    (mv >> 8) as u8
}

pub fn decode_vbat_mv(raw: u8) -> u32 {
    raw as u32 * VBAT_ADC_SCALE_MV + VBAT_ADC_OFFSET_MV
}

pub fn decode_vsys_mv(raw: u8) -> u32 {
    raw as u32 * VSYS_ADC_SCALE_MV + VSYS_ADC_OFFSET_MV
}

pub fn decode_ichg_ma(raw: u8) -> u32 {
    raw as u32 * ICHG_ADC_SCALE_MA
}

pub fn decode_iin_ma(raw: u8) -> u32 {
    raw as u32 * IIN_ADC_SCALE_MA
}

pub fn decode_vbus_mv(raw: u8) -> u32 {
    raw as u32 * VBUS_ADC_SCALE_MV + VBUS_ADC_OFFSET_MV
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_current_encode_is_floor_lossy() {
        let code = charge_current_code(1_000, 6_400);
        assert_eq!(code, 15);
        let (msb, lsb) = charge_current_bytes(code);
        assert_eq!((msb, lsb), (0x03, 0xC0));
        assert_eq!(charge_current_code_from_bytes(msb, lsb), 15);
        assert_eq!(charge_current_ma(code), 960);
    }

    #[test]
    fn charge_current_clamps_to_configured_max() {
        assert_eq!(charge_current_code(9_000, 6_400), 100);
        // And to the 7-bit code ceiling even with a wide config.
        assert_eq!(charge_current_code(20_000, 20_000), 128);
        assert_eq!(charge_current_code(0, 6_400), 0);
    }

    #[test]
    fn charge_current_byte_layout() {
        // Code 128 = 0b100_00000: bit 7 of the code ends up at byte 1
        // bit 5, nothing in byte 2.
        assert_eq!(charge_current_bytes(128), (0x20, 0x00));
        // Code 3: both bits in byte 2 [7:6].
        assert_eq!(charge_current_bytes(3), (0x00, 0xC0));
    }

    #[test]
    fn per_cell_voltage_tables_are_bit_exact() {
        // Byte patterns the IC was validated against, cells 1..=4.
        let expected = [
            (0x10, 0x60), // 4192 = 4096 + 64 + 32
            (0x20, 0xD0), // 8400 = 8192 + 128 + 64 + 16
            (0x31, 0x30), // 12592 = 8192 + 4096 + 256 + 32 + 16
            (0x41, 0xA0), // 16800 = 16384 + 256 + 128 + 32
        ];
        let expected_min_sys = [
            0x0B, // 2816 = 2048 + 512 + 256
            0x16, // 5632 = 4096 + 1024 + 512
            0x21, // 8448 = 8192 + 256
            0x2C, // 11264 = 8192 + 2048 + 1024
        ];
        for cells in 1..=4u8 {
            let sp = setpoints(ChargeProfile::PerCell, cells);
            assert_eq!(
                charge_voltage_bytes(sp.charge_mv),
                expected[cells as usize - 1],
                "cells={cells}"
            );
            assert_eq!(
                min_system_byte(sp.min_system_mv),
                expected_min_sys[cells as usize - 1],
                "cells={cells}"
            );
        }
    }

    #[test]
    fn invalid_cell_count_floors_the_setpoint() {
        let sp = setpoints(ChargeProfile::PerCell, 0);
        assert_eq!(sp.charge_mv, 0);
        assert_eq!(min_system_byte(sp.min_system_mv), 0x04);
        assert_eq!(setpoints(ChargeProfile::PerCell, 5), sp);
    }

    #[test]
    fn fixed_profile_bypasses_the_tables() {
        let sp = setpoints(
            ChargeProfile::Fixed {
                target_mv: 16_800,
                precharge_mv: 12_800,
            },
            0,
        );
        assert_eq!(charge_voltage_bytes(sp.charge_mv), (0x41, 0xA0));
        assert_eq!(min_system_byte(sp.min_system_mv), 0x32);
    }

    #[test]
    fn adc_decode_applies_scale_and_offset() {
        assert_eq!(decode_vbat_mv(0), 2_880);
        assert_eq!(decode_vbat_mv(100), 9_280);
        assert_eq!(decode_vsys_mv(50), 6_080);
        assert_eq!(decode_ichg_ma(16), 1_024);
        assert_eq!(decode_iin_ma(20), 1_000);
        assert_eq!(decode_vbus_mv(0), 3_200);
        assert_eq!(decode_vbus_mv(200), 16_000);
    }
}
