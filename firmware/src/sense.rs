//! Pack-side analog front end: balance-tap dividers, the pack-terminal
//! divider, and the MCU die temperature sensor.

use charge_core::battery::{PackReadings, MAX_CELLS};
use embassy_stm32::adc::{Adc, AnyAdcChannel, SampleTime};
use embassy_stm32::peripherals::ADC1;

const ADC_FULL_SCALE: u32 = 4_095;
const VDDA_MV: u32 = 3_300;

/// Tap divider ratios: tap `k` (cells 1..=k+1 summed) is divided by
/// `2·(k+1)` on the board, so every tap reads ~2.1 V at full charge.
const TAP_RATIO: [u32; MAX_CELLS] = [2, 4, 6, 8];

/// Pack terminal divider (100k : 10k).
const PACK_RATIO: u32 = 11;

// STM32G0 temperature sensor, datasheet typicals.
const TSENSE_MV_AT_30C: f32 = 760.0;
const TSENSE_MV_PER_C: f32 = 2.5;

pub struct PackSense {
    adc: Adc<'static, ADC1>,
    taps: [AnyAdcChannel<ADC1>; MAX_CELLS],
    pack: AnyAdcChannel<ADC1>,
    temp: AnyAdcChannel<ADC1>,
}

impl PackSense {
    pub fn new(
        mut adc: Adc<'static, ADC1>,
        taps: [AnyAdcChannel<ADC1>; MAX_CELLS],
        pack: AnyAdcChannel<ADC1>,
        temp: AnyAdcChannel<ADC1>,
    ) -> Self {
        // The dividers are high impedance; take the slowest sampling.
        adc.set_sample_time(SampleTime::CYCLES160_5);
        PackSense {
            adc,
            taps,
            pack,
            temp,
        }
    }

    fn read_mv(&mut self, which: Tap) -> u32 {
        let channel = match which {
            Tap::Balance(i) => &mut self.taps[i],
            Tap::Pack => &mut self.pack,
            Tap::Temp => &mut self.temp,
        };
        let raw = self.adc.blocking_read(channel) as u32;
        raw * VDDA_MV / ADC_FULL_SCALE
    }

    /// Sample everything once. Cell voltages are adjacent tap
    /// differentials; a lower tap reading above its upper neighbor
    /// (disconnected wiring) yields a zero cell, never a wrap.
    pub fn sample(&mut self) -> PackReadings {
        let mut readings = PackReadings::default();

        let mut below_mv = 0u32;
        for i in 0..MAX_CELLS {
            let absolute_mv = self.read_mv(Tap::Balance(i)) * TAP_RATIO[i];
            readings.tap_mv[i] = (absolute_mv / (i as u32 + 1)) as u16;
            readings.cell_mv[i] = absolute_mv.saturating_sub(below_mv) as u16;
            below_mv = absolute_mv;
        }

        readings.pack_mv = self.read_mv(Tap::Pack) * PACK_RATIO;

        let tsense_mv = self.read_mv(Tap::Temp) as f32;
        readings.mcu_temp_c = 30.0 + (tsense_mv - TSENSE_MV_AT_30C) / TSENSE_MV_PER_C;

        readings
    }
}

enum Tap {
    Balance(usize),
    Pack,
    Temp,
}
