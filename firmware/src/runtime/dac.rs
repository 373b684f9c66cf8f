//! Minimal MCP4728 quad-DAC driver.
//!
//! Only the single-channel multi-write frame is needed: each laser channel
//! updates its own output at waveform rate while the others hold. The bus
//! is shared behind a `RefCell`, which is safe under the single-threaded
//! executor.

use core::cell::RefCell;

use embassy_stm32::i2c::I2c;
use embassy_stm32::mode::Blocking;

use laser_core::io::AnalogOutput;

/// Fixed device address (A0..A2 strapped low).
pub const MCP4728_ADDR: u8 = 0x60;

const DAC_FULL_SCALE: f32 = 4_095.0;

/// Owns the I2C bus to the DAC.
pub struct QuadDac {
    bus: I2c<'static, Blocking>,
}

impl QuadDac {
    pub fn new(bus: I2c<'static, Blocking>) -> Self {
        Self { bus }
    }

    /// Multi-write for one channel: VREF = VDD, gain 1, normal power-down.
    fn write_channel(&mut self, channel: u8, value: u16) {
        let value = value.min(0x0FFF);
        let frame = [
            0x40 | ((channel & 0x03) << 1),
            (value >> 8) as u8,
            value as u8,
        ];
        if self.bus.blocking_write(MCP4728_ADDR, &frame).is_err() {
            // The channel keeps its previous level; the next waveform tick
            // retries with a fresh value.
            defmt::warn!("dac write failed on channel {=u8}", channel);
        }
    }
}

/// One DAC output bound to a laser channel.
pub struct DacChannel {
    bus: &'static RefCell<QuadDac>,
    channel: u8,
    level: f32,
}

impl DacChannel {
    pub fn new(bus: &'static RefCell<QuadDac>, channel: u8) -> Self {
        let mut output = Self {
            bus,
            channel,
            level: 0.0,
        };
        output.set_level(0.0);
        output
    }
}

impl AnalogOutput for DacChannel {
    fn set_level(&mut self, level: f32) {
        let level = level.clamp(0.0, 1.0);
        self.level = level;
        let raw = (level * DAC_FULL_SCALE) as u16;
        self.bus.borrow_mut().write_channel(self.channel, raw);
    }

    fn level(&self) -> f32 {
        self.level
    }
}
