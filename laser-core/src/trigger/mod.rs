//! Trigger watching and group arming for a set of channels.
//!
//! A [`TriggerCoordinator`] exclusively owns one physical trigger input
//! (plus an optional priming interlock input and an optional mirrored
//! output on the onboard trigger line) and an ordered member list of
//! channel names it is allowed to start. Physical lines are claimed and
//! released through [`TriggerSources`], so reassigning the trigger source
//! de-initializes the previous pin before the new one is attached.

use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::channel::PulseGenerator;
use crate::clock::Ticks;
use crate::debounce::EdgeDebouncer;
use crate::io::{AnalogOutput, DigitalInput, DigitalOutput};

/// Debounce window applied to the physical trigger input, in ms.
pub const TRIGGER_DEBOUNCE_MS: u32 = 5;

/// Physical line a coordinator can watch for trigger edges.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum TriggerSource {
    /// Onboard default trigger line; never mirrored.
    #[serde(rename = "IntTrigger")]
    Internal,
    /// Secondary onboard line.
    #[serde(rename = "IntTrigger2")]
    Internal2,
    #[serde(rename = "ExtTrigger0")]
    External0,
    #[serde(rename = "ExtTrigger1")]
    External1,
    #[serde(rename = "ExtTrigger2")]
    External2,
    #[serde(rename = "ExtTrigger3")]
    External3,
}

impl TriggerSource {
    /// `true` for the onboard default line, which doubles as the mirror
    /// output whenever any other source is selected.
    pub const fn is_onboard(self) -> bool {
        matches!(self, Self::Internal)
    }

    /// Stable index for table-backed line pools.
    pub const fn index(self) -> usize {
        match self {
            Self::Internal => 0,
            Self::Internal2 => 1,
            Self::External0 => 2,
            Self::External1 => 3,
            Self::External2 => 4,
            Self::External3 => 5,
        }
    }
}

/// Number of distinct [`TriggerSource`] lines.
pub const TRIGGER_SOURCE_COUNT: usize = 6;

/// Claims and releases the physical lines behind trigger sources.
///
/// Implementations enforce exclusive ownership: a claimed line is handed
/// out as an owned handle and only becomes claimable again once released.
pub trait TriggerSources {
    type Input: DigitalInput;
    type Mirror: DigitalOutput;

    /// Claims the input line for `source`.
    fn claim_input(&mut self, source: TriggerSource) -> Self::Input;

    /// Returns a previously claimed input line to the pool.
    fn release_input(&mut self, source: TriggerSource, line: Self::Input);

    /// Claims the priming interlock input.
    fn claim_priming(&mut self) -> Self::Input;

    /// Claims the mirror output on the onboard trigger line.
    fn claim_mirror(&mut self) -> Self::Mirror;

    /// Returns the mirror output to the pool.
    fn release_mirror(&mut self, line: Self::Mirror);
}

/// Partial coordinator update as received from the host.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TriggerParams {
    pub trigger_pin: Option<TriggerSource>,
    pub use_trigger_pin: Option<bool>,
    pub use_priming_pin: Option<bool>,
    pub is_primed: Option<bool>,
    pub mock: Option<bool>,
    pub laser_list: Option<Vec<String>>,
}

/// Watches a trigger line and starts its member channels together.
pub struct TriggerCoordinator<S: TriggerSources> {
    name: &'static str,
    source: TriggerSource,
    input: Option<S::Input>,
    priming: Option<S::Input>,
    mirror: Option<S::Mirror>,
    debouncer: EdgeDebouncer,
    use_trigger_pin: bool,
    use_priming_pin: bool,
    is_primed: bool,
    mock: bool,
    trigger_flag: bool,
    members: Vec<String>,
}

impl<S: TriggerSources> TriggerCoordinator<S> {
    /// Creates a coordinator on the onboard trigger line.
    ///
    /// External edges are honored only once the host primes the rig;
    /// manual fire commands work immediately.
    pub fn new(name: &'static str, sources: &mut S) -> Self {
        let input = sources.claim_input(TriggerSource::Internal);
        let priming = sources.claim_priming();
        Self {
            name,
            source: TriggerSource::Internal,
            input: Some(input),
            priming: Some(priming),
            mirror: None,
            debouncer: EdgeDebouncer::new(TRIGGER_DEBOUNCE_MS),
            use_trigger_pin: true,
            use_priming_pin: false,
            is_primed: false,
            mock: false,
            trigger_flag: false,
            members: Vec::new(),
        }
    }

    /// Coordinator name, also its configuration key.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Currently selected trigger source.
    pub const fn source(&self) -> TriggerSource {
        self.source
    }

    /// Names of the channels this coordinator starts.
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// `true` while the priming interlock is satisfied.
    pub const fn is_primed(&self) -> bool {
        self.is_primed
    }

    /// `true` while only mask channels fire on trigger.
    pub const fn is_mock(&self) -> bool {
        self.mock
    }

    fn is_member(&self, name: &str) -> bool {
        self.members.iter().any(|member| member == name)
    }

    /// Replaces the member list, stopping channels that were dropped.
    ///
    /// Listed primaries implicitly bring their `<name>_mask` companions
    /// along so the sync output is never silently detached.
    pub fn set_members<D, A>(
        &mut self,
        names: Vec<String>,
        now: Ticks,
        channels: &mut [PulseGenerator<D, A>],
    ) where
        D: DigitalOutput,
        A: AnalogOutput,
    {
        let mut expanded = names;
        for channel in channels.iter() {
            if channel.is_mask()
                && let Some(primary) = channel.name().strip_suffix("_mask")
                && expanded.iter().any(|name| name == primary)
                && !expanded.iter().any(|name| name == channel.name())
            {
                expanded.push(String::from(channel.name()));
            }
        }

        for channel in channels.iter_mut() {
            if self.is_member(channel.name()) && !expanded.iter().any(|n| n == channel.name()) {
                channel.stop_immediately(now);
            }
        }

        self.members = expanded;
    }

    /// Applies a partial coordinator update.
    pub fn apply_settings<D, A>(
        &mut self,
        params: &TriggerParams,
        now: Ticks,
        channels: &mut [PulseGenerator<D, A>],
        sources: &mut S,
    ) where
        D: DigitalOutput,
        A: AnalogOutput,
    {
        if let Some(source) = params.trigger_pin
            && source != self.source
        {
            if let Some(line) = self.input.take() {
                sources.release_input(self.source, line);
            }
            if source.is_onboard() {
                if let Some(mirror) = self.mirror.take() {
                    sources.release_mirror(mirror);
                }
            } else if self.mirror.is_none() {
                self.mirror = Some(sources.claim_mirror());
            }
            let line = sources.claim_input(source);
            self.debouncer.reset(line.is_high(), now);
            self.input = Some(line);
            self.source = source;
        }

        if let Some(enabled) = params.use_trigger_pin {
            self.use_trigger_pin = enabled;
        }
        if let Some(enabled) = params.use_priming_pin {
            self.use_priming_pin = enabled;
            if enabled && self.priming.is_none() {
                self.priming = Some(sources.claim_priming());
            }
        }
        if let Some(primed) = params.is_primed {
            self.is_primed = primed;
        }
        if let Some(mock) = params.mock {
            self.mock = mock;
        }
        if let Some(list) = &params.laser_list {
            self.set_members(list.clone(), now, channels);
        }
    }

    /// Starts every member channel, honoring mock mode.
    pub fn fire<D, A>(&self, now: Ticks, channels: &mut [PulseGenerator<D, A>])
    where
        D: DigitalOutput,
        A: AnalogOutput,
    {
        for channel in channels.iter_mut() {
            if !self.is_member(channel.name()) {
                continue;
            }
            if self.mock && !channel.is_mask() {
                continue;
            }
            channel.start(now);
        }
    }

    /// Immediately stops every member channel.
    pub fn stop_all_immediately<D, A>(&self, now: Ticks, channels: &mut [PulseGenerator<D, A>])
    where
        D: DigitalOutput,
        A: AnalogOutput,
    {
        for channel in channels.iter_mut() {
            if self.is_member(channel.name()) {
                channel.stop_immediately(now);
            }
        }
    }

    /// Requests a graceful stop on every member channel.
    pub fn stop_all_graceful<D, A>(&self, now: Ticks, channels: &mut [PulseGenerator<D, A>])
    where
        D: DigitalOutput,
        A: AnalogOutput,
    {
        for channel in channels.iter_mut() {
            if self.is_member(channel.name()) {
                channel.stop_graceful(now);
            }
        }
    }

    /// Advances every channel, then evaluates the trigger conditions.
    pub fn tick<D, A>(&mut self, now: Ticks, channels: &mut [PulseGenerator<D, A>])
    where
        D: DigitalOutput,
        A: AnalogOutput,
    {
        for channel in channels.iter_mut() {
            channel.tick(now);
        }
        self.evaluate(now, channels);
    }

    fn evaluate<D, A>(&mut self, now: Ticks, channels: &mut [PulseGenerator<D, A>])
    where
        D: DigitalOutput,
        A: AnalogOutput,
    {
        // At most one concurrent train per trigger: while any member is
        // armed or pulsing, edges are not even sampled.
        let busy = channels
            .iter()
            .any(|channel| self.is_member(channel.name()) && channel.is_active());
        if busy {
            return;
        }

        if self.use_priming_pin
            && let Some(primed) = self.priming.as_ref().map(|pin| pin.is_high())
        {
            self.is_primed = primed;
            if !primed && let Some(mirror) = self.mirror.as_mut() {
                mirror.set_low();
            }
        }

        if self.use_trigger_pin
            && !self.trigger_flag
            && let Some(raw) = self.input.as_ref().map(|pin| pin.is_high())
        {
            self.debouncer.update(raw, now);
            if self.debouncer.rose() && self.is_primed {
                self.trigger_flag = true;
                if let Some(mirror) = self.mirror.as_mut() {
                    mirror.set_high();
                }
            }
        }

        if self.trigger_flag {
            self.fire(now, channels);
            self.trigger_flag = false;
        }
    }
}
