//! Per-channel waveform parameters.
//!
//! `ChannelSettings` keeps `frequency`, `duty_cycle`, `pulse_ms`, and
//! `off_ms` mutually consistent: every setter clamps its input to the legal
//! range and then recomputes the dependent fields explicitly, so the
//! invariant `pulse_ms <= 1000 / frequency` holds after any mutation order.
//! Out-of-range inputs are accepted with a logged warning rather than
//! rejected.

use core::f32::consts::{PI, TAU};

use log::warn;
use serde::{Deserialize, Serialize};

/// Hard ceiling on the per-channel pulse frequency, in Hz.
pub const MAX_FREQUENCY_HZ: f32 = 200.0;

/// Floor applied to nonsensical frequency requests, in Hz.
pub const MIN_FREQUENCY_HZ: f32 = 0.01;

const MIN_DUTY_CYCLE: f32 = 0.001;

/// Waveform shape produced on a channel output.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseShape {
    /// Digital on/off gating; the DAC (if present) holds a static level.
    #[default]
    Square,
    /// Digital gate held high, DAC modulated by a clamped sine.
    HalfSine,
    /// Digital gate held high, DAC modulated by a raised cosine.
    FullSine,
}

impl PulseShape {
    /// Sine-shaped channels hold the gate high and steer the DAC instead.
    pub const fn is_analog(self) -> bool {
        matches!(self, Self::HalfSine | Self::FullSine)
    }

    /// Raw waveform sample for a cycle fraction in `0.0..1.0`.
    ///
    /// The half-sine dips below zero in the second half cycle; callers clamp
    /// before driving hardware. The full sine starts and ends each cycle at
    /// zero and peaks mid-cycle.
    pub fn sample(self, fraction: f32) -> f32 {
        match self {
            Self::Square => 1.0,
            Self::HalfSine => libm::sinf(fraction * TAU),
            Self::FullSine => (libm::cosf(fraction * TAU + PI) + 1.0) / 2.0,
        }
    }
}

/// Validated waveform settings for one output channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelSettings {
    shape: PulseShape,
    frequency_hz: f32,
    duty_cycle: f32,
    pulse_ms: u32,
    off_ms: u32,
    pulsetrain_ms: u32,
    delay_ms: u32,
    attenuation_factor: f32,
    attenuated_wave_ms: u32,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            shape: PulseShape::Square,
            frequency_hz: 1.0,
            duty_cycle: 0.1,
            pulse_ms: 100,
            off_ms: 900,
            pulsetrain_ms: 1_000,
            delay_ms: 0,
            attenuation_factor: 0.5,
            attenuated_wave_ms: 0,
        }
    }
}

impl ChannelSettings {
    /// Waveform shape.
    pub const fn shape(&self) -> PulseShape {
        self.shape
    }

    /// Pulse frequency in Hz.
    pub const fn frequency_hz(&self) -> f32 {
        self.frequency_hz
    }

    /// Fraction of each cycle spent high, in `(0, 1]`.
    pub const fn duty_cycle(&self) -> f32 {
        self.duty_cycle
    }

    /// High phase of one square cycle, in ms.
    pub const fn pulse_ms(&self) -> u32 {
        self.pulse_ms
    }

    /// Low phase of one square cycle, in ms.
    pub const fn off_ms(&self) -> u32 {
        self.off_ms
    }

    /// Total train length, in ms.
    pub const fn pulsetrain_ms(&self) -> u32 {
        self.pulsetrain_ms
    }

    /// Offset between arming and the first pulse, in ms.
    pub const fn delay_ms(&self) -> u32 {
        self.delay_ms
    }

    /// Peak analog scale factor in `[0, 1]`.
    pub const fn attenuation_factor(&self) -> f32 {
        self.attenuation_factor
    }

    /// Fade-out window applied at graceful stop, in ms (0 = no fade).
    pub const fn attenuated_wave_ms(&self) -> u32 {
        self.attenuated_wave_ms
    }

    /// Length of one waveform cycle, in ms.
    pub fn cycle_ms(&self) -> f32 {
        1_000.0 / self.frequency_hz
    }

    /// Sets the waveform shape.
    pub fn set_shape(&mut self, shape: PulseShape) {
        self.shape = shape;
    }

    /// Sets the frequency, then recomputes the pulse width from the duty cycle.
    pub fn set_frequency(&mut self, hz: f32) {
        let clamped = if hz.is_nan() {
            warn!("frequency is not a number, keeping {} Hz", self.frequency_hz);
            self.frequency_hz
        } else if hz > MAX_FREQUENCY_HZ {
            warn!("frequency {hz} Hz above limit, clamping to {MAX_FREQUENCY_HZ} Hz");
            MAX_FREQUENCY_HZ
        } else if hz < MIN_FREQUENCY_HZ {
            warn!("frequency {hz} Hz below limit, clamping to {MIN_FREQUENCY_HZ} Hz");
            MIN_FREQUENCY_HZ
        } else {
            hz
        };
        self.frequency_hz = clamped;
        self.recompute_pulse_from_duty();
    }

    /// Sets the duty cycle, then recomputes the pulse width.
    pub fn set_duty_cycle(&mut self, duty: f32) {
        let clamped = if duty.is_nan() {
            warn!("duty cycle is not a number, keeping {}", self.duty_cycle);
            self.duty_cycle
        } else if duty > 1.0 {
            warn!("duty cycle {duty} above 1, clamping");
            1.0
        } else if duty < MIN_DUTY_CYCLE {
            warn!("duty cycle {duty} at or below 0, clamping to {MIN_DUTY_CYCLE}");
            MIN_DUTY_CYCLE
        } else {
            duty
        };
        self.duty_cycle = clamped;
        self.recompute_pulse_from_duty();
    }

    /// Sets the pulse width directly, then recomputes the duty cycle.
    pub fn set_pulse_ms(&mut self, ms: f32) {
        let cycle = self.cycle_ms();
        let clamped = if ms.is_nan() {
            warn!("pulse duration is not a number, keeping {} ms", self.pulse_ms);
            self.pulse_ms as f32
        } else if ms > cycle {
            warn!("pulse duration {ms} ms exceeds one cycle, clamping to {cycle} ms");
            cycle
        } else if ms < 1.0 {
            warn!("pulse duration {ms} ms below 1 ms, clamping");
            1.0
        } else {
            ms
        };
        self.pulse_ms = (clamped as u32).max(1);
        self.duty_cycle = self.pulse_ms as f32 / cycle;
        self.off_ms = (cycle as u32).saturating_sub(self.pulse_ms);
    }

    /// Sets the total train length.
    pub fn set_pulsetrain_ms(&mut self, ms: f32) {
        self.pulsetrain_ms = non_negative_ms(ms, "pulsetrain duration");
    }

    /// Sets the arming delay.
    pub fn set_delay_ms(&mut self, ms: f32) {
        self.delay_ms = non_negative_ms(ms, "delay time");
    }

    /// Sets the peak analog scale factor.
    pub fn set_attenuation_factor(&mut self, factor: f32) {
        let clamped = if factor.is_nan() {
            warn!(
                "attenuation factor is not a number, keeping {}",
                self.attenuation_factor
            );
            self.attenuation_factor
        } else if !(0.0..=1.0).contains(&factor) {
            warn!("attenuation factor {factor} outside [0, 1], clamping");
            factor.clamp(0.0, 1.0)
        } else {
            factor
        };
        self.attenuation_factor = clamped;
    }

    /// Sets the graceful-stop fade window.
    pub fn set_attenuated_wave_ms(&mut self, ms: f32) {
        self.attenuated_wave_ms = non_negative_ms(ms, "attenuated wave");
    }

    /// Applies a partial update in the wire field order.
    pub fn apply(&mut self, params: &ChannelParams) {
        if let Some(hz) = params.frequency {
            self.set_frequency(hz);
        }
        if let Some(duty) = params.duty_cycle {
            self.set_duty_cycle(duty);
        }
        if let Some(ms) = params.pulsetrain_duration {
            self.set_pulsetrain_ms(ms);
        }
        if let Some(ms) = params.pulse_dur {
            self.set_pulse_ms(ms);
        }
        if let Some(shape) = params.pulse_type {
            self.set_shape(shape);
        }
        if let Some(factor) = params.attenuation_factor {
            self.set_attenuation_factor(factor);
        }
        if let Some(ms) = params.attenuated_wave {
            self.set_attenuated_wave_ms(ms);
        }
        if let Some(ms) = params.delay_time {
            self.set_delay_ms(ms);
        }
    }

    fn recompute_pulse_from_duty(&mut self) {
        let cycle = self.cycle_ms();
        self.pulse_ms = ((cycle * self.duty_cycle) as u32).max(1);
        self.off_ms = (cycle as u32).saturating_sub(self.pulse_ms);
    }
}

fn non_negative_ms(ms: f32, what: &str) -> u32 {
    if ms.is_nan() || ms < 0.0 {
        warn!("{what} {ms} ms is invalid, clamping to 0");
        0
    } else {
        ms as u32
    }
}

/// Partial per-channel update as received from the host.
///
/// Absent fields leave the current value untouched; unknown JSON keys are
/// ignored by the decoder.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelParams {
    pub frequency: Option<f32>,
    pub duty_cycle: Option<f32>,
    pub pulsetrain_duration: Option<f32>,
    pub pulse_dur: Option<f32>,
    pub pulse_type: Option<PulseShape>,
    pub attenuation_factor: Option<f32>,
    pub attenuated_wave: Option<f32>,
    pub delay_time: Option<f32>,
}
