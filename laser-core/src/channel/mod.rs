//! Per-channel pulse generation.
//!
//! A [`PulseGenerator`] owns one digital gate line and, for primary laser
//! channels, one DAC channel. Its state machine advances once per scheduler
//! tick:
//!
//! ```text
//! Idle --start--> ArmedDelayed --delay elapsed--> Pulsing
//!   Pulsing --train elapsed--> GracefulStopping --cycle/fade done--> Idle
//!   any state --stop_immediately--> Idle
//! ```
//!
//! Square waveforms toggle the gate from two independent edge timers, each
//! advanced by its own duration so phase never drifts against the tick
//! clock. Sine waveforms hold the gate high and steer the DAC every tick.

pub mod mask;
pub mod settings;

pub use mask::derive_mask;
pub use settings::{ChannelParams, ChannelSettings, MAX_FREQUENCY_HZ, PulseShape};

use crate::clock::Ticks;
use crate::io::{AnalogOutput, DigitalOutput};
use crate::telemetry::PulseHistory;

/// Lifecycle phase of a channel's pulse train.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ChannelState {
    Idle,
    ArmedDelayed { armed_at: Ticks },
    Pulsing,
    GracefulStopping,
}

/// State machine producing a timed digital/analog output on one channel.
pub struct PulseGenerator<D, A> {
    name: &'static str,
    is_mask: bool,
    settings: ChannelSettings,
    state: ChannelState,
    ttl: D,
    dac: Option<A>,
    pulse_started_at: Ticks,
    cycle_anchor: Ticks,
    fade_started_at: Ticks,
    last_cycle_fraction: f32,
    history: PulseHistory,
}

impl<D, A> PulseGenerator<D, A>
where
    D: DigitalOutput,
    A: AnalogOutput,
{
    /// Creates a primary channel over a gate line and an optional DAC channel.
    pub fn new(name: &'static str, mut ttl: D, mut dac: Option<A>) -> Self {
        ttl.set_low();
        if let Some(dac) = dac.as_mut() {
            dac.set_level(0.0);
        }
        Self {
            name,
            is_mask: false,
            settings: ChannelSettings::default(),
            state: ChannelState::Idle,
            ttl,
            dac,
            pulse_started_at: Ticks::default(),
            cycle_anchor: Ticks::default(),
            fade_started_at: Ticks::default(),
            last_cycle_fraction: 0.0,
            history: PulseHistory::new(),
        }
    }

    /// Creates a digital-only sync mask channel.
    pub fn mask(name: &'static str, ttl: D) -> Self {
        let mut channel = Self::new(name, ttl, None);
        channel.is_mask = true;
        channel
    }

    /// Channel name, also the configuration key addressing it.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// `true` for sync mask channels.
    pub const fn is_mask(&self) -> bool {
        self.is_mask
    }

    /// Current waveform settings.
    pub const fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    /// Mutable waveform settings, e.g. for mask re-derivation.
    pub const fn settings_mut(&mut self) -> &mut ChannelSettings {
        &mut self.settings
    }

    /// Recorded train boundary timestamps.
    pub const fn history(&self) -> &PulseHistory {
        &self.history
    }

    /// `true` from arming until the channel returns to idle.
    pub const fn is_active(&self) -> bool {
        !matches!(self.state, ChannelState::Idle)
    }

    /// `true` while the output waveform is being driven.
    pub const fn is_pulsing(&self) -> bool {
        matches!(
            self.state,
            ChannelState::Pulsing | ChannelState::GracefulStopping
        )
    }

    /// Applies a partial parameter update; `None` means "channel not in use"
    /// and forces an immediate stop.
    pub fn apply_settings(&mut self, params: Option<&ChannelParams>, now: Ticks) {
        match params {
            None => self.stop_immediately(now),
            Some(params) => self.settings.apply(params),
        }
    }

    /// Arms the channel; the first pulse follows after the configured delay.
    ///
    /// Ignored while a train is already running so a train can never be
    /// restarted mid-flight. Re-arming during the delay window restarts the
    /// delay, matching a repeated manual fire.
    pub fn start(&mut self, now: Ticks) {
        if !self.is_pulsing() {
            self.state = ChannelState::ArmedDelayed { armed_at: now };
        }
    }

    /// Cuts both outputs synchronously and returns to idle.
    pub fn stop_immediately(&mut self, now: Ticks) {
        let ran = self.is_pulsing();
        self.state = ChannelState::Idle;
        self.ttl.set_low();
        if let Some(dac) = self.dac.as_mut() {
            dac.set_level(0.0);
        }
        if ran {
            self.history.record_end(now);
        }
    }

    /// Requests an end-of-train stop that completes the current cycle (or
    /// fade window) first. Idempotent while already stopping.
    pub fn stop_graceful(&mut self, now: Ticks) {
        match self.state {
            ChannelState::Pulsing => {
                self.state = ChannelState::GracefulStopping;
                self.fade_started_at = now;
            }
            // Nothing has been emitted yet; there is no cycle to finish.
            ChannelState::ArmedDelayed { .. } => self.stop_immediately(now),
            ChannelState::Idle | ChannelState::GracefulStopping => {}
        }
    }

    /// Advances the state machine by one scheduler tick.
    pub fn tick(&mut self, now: Ticks) {
        match self.state {
            ChannelState::Idle => {}
            ChannelState::ArmedDelayed { armed_at } => {
                if now.diff(armed_at) >= self.settings.delay_ms() as i32 {
                    self.begin_pulsing(now);
                }
            }
            ChannelState::Pulsing | ChannelState::GracefulStopping => self.advance(now),
        }
    }

    /// Raw output access for the calibration sweep; only valid while idle.
    pub fn outputs_mut(&mut self) -> (&mut D, Option<&mut A>) {
        (&mut self.ttl, self.dac.as_mut())
    }

    fn begin_pulsing(&mut self, now: Ticks) {
        self.state = ChannelState::Pulsing;
        self.pulse_started_at = now;
        self.cycle_anchor = now;
        self.last_cycle_fraction = 0.0;
        // Gated square output: the DAC holds the attenuation level statically
        // while the TTL line does the chopping.
        if !self.settings.shape().is_analog()
            && let Some(dac) = self.dac.as_mut()
        {
            dac.set_level(self.settings.attenuation_factor());
        }
        self.ttl.set_high();
        self.history.record_start(now);
    }

    fn advance(&mut self, now: Ticks) {
        if self.state == ChannelState::Pulsing
            && now.diff(self.pulse_started_at) >= self.settings.pulsetrain_ms() as i32
        {
            self.stop_graceful(now);
        }

        match self.settings.shape() {
            PulseShape::Square => self.advance_square(now),
            PulseShape::HalfSine | PulseShape::FullSine => self.advance_analog(now),
        }
    }

    fn advance_square(&mut self, now: Ticks) {
        if self.ttl.is_high() {
            if now.diff(self.cycle_anchor) >= self.settings.pulse_ms() as i32 {
                self.ttl.set_low();
                self.cycle_anchor = self.cycle_anchor.advance(self.settings.pulse_ms());
                if self.state == ChannelState::GracefulStopping {
                    self.stop_immediately(now);
                }
            }
        } else {
            if self.state == ChannelState::GracefulStopping {
                // The gate is already low; this is the clean stopping edge.
                self.stop_immediately(now);
                return;
            }
            if now.diff(self.cycle_anchor) >= self.settings.off_ms() as i32 {
                self.ttl.set_high();
                self.cycle_anchor = self.cycle_anchor.advance(self.settings.off_ms());
            }
        }
    }

    fn advance_analog(&mut self, now: Ticks) {
        let cycle_ms = self.settings.cycle_ms();
        let elapsed = now.diff(self.pulse_started_at) as f32;
        let fraction = (elapsed % cycle_ms) / cycle_ms;
        let raw = self.settings.shape().sample(fraction);
        let mut level = if raw < 0.0 { 0.0 } else { raw };

        if self.state == ChannelState::GracefulStopping {
            let fade_ms = self.settings.attenuated_wave_ms();
            if fade_ms > 0 {
                let fade_elapsed = now.diff(self.fade_started_at);
                if fade_elapsed >= fade_ms as i32 {
                    self.stop_immediately(now);
                    return;
                }
                level *= 1.0 - fade_elapsed as f32 / fade_ms as f32;
            } else if raw <= 0.0 || fraction < self.last_cycle_fraction {
                // No fade requested: end the train at the zero crossing.
                self.stop_immediately(now);
                return;
            }
        }

        self.last_cycle_fraction = fraction;
        if let Some(dac) = self.dac.as_mut() {
            dac.set_level(level * self.settings.attenuation_factor());
        }
    }
}
