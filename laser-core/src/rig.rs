//! Top-level cooperative scheduler.
//!
//! One [`Rig::iterate`] call performs exactly one coordinator tick (which
//! advances every channel) followed by at most one command-processing step.
//! Command processing is deferred while the external enable line is
//! asserted or while any channel is active, so a running waveform is never
//! torn by reconfiguration; waveform generation and configuration are
//! disjoint phases. Every classified failure in the command path is
//! recorded through the [`FaultSink`] and the loop simply continues — the
//! rig must never stop answering because a host payload was malformed.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use serde_json::Value;

use crate::calibration::{Sleeper, run_sweep};
use crate::channel::{ChannelParams, PulseGenerator, derive_mask};
use crate::clock::Ticks;
use crate::command::{
    CALIBRATION_KEYS, CalibrationRequest, ConfigUpdate, HostCommand, HostReply, LineAssembler,
    parse_line,
};
use crate::io::{AnalogOutput, DigitalInput, DigitalOutput};
use crate::telemetry::{FaultSink, RigFault};
use crate::trigger::{TriggerCoordinator, TriggerParams, TriggerSources};

/// How often the host line buffer is polled for new commands, in ms.
pub const COMMAND_POLL_INTERVAL_MS: u32 = 500;

/// Non-blocking byte transport to the experiment-control host.
pub trait HostLink {
    /// Reads whatever bytes are available right now; never blocks.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Queues one already-terminated reply frame.
    fn write_line(&mut self, line: &str);
}

/// The complete rig: channels, trigger coordinator, and host command loop.
pub struct Rig<S, D, A>
where
    S: TriggerSources,
{
    channels: Vec<PulseGenerator<D, A>>,
    trigger: TriggerCoordinator<S>,
    sources: S,
    enable: Option<S::Input>,
    assembler: LineAssembler,
    poll_interval_ms: u32,
    last_poll: Option<Ticks>,
}

impl<S, D, A> Rig<S, D, A>
where
    S: TriggerSources,
    D: DigitalOutput,
    A: AnalogOutput,
{
    /// Assembles a rig from already-claimed hardware.
    ///
    /// `enable`, when present, mutes command polling while high — the
    /// collaborating experiment controller holds it asserted during trials.
    pub fn new(
        channels: Vec<PulseGenerator<D, A>>,
        trigger: TriggerCoordinator<S>,
        sources: S,
        enable: Option<S::Input>,
    ) -> Self {
        Self {
            channels,
            trigger,
            sources,
            enable,
            assembler: LineAssembler::new(),
            poll_interval_ms: COMMAND_POLL_INTERVAL_MS,
            last_poll: None,
        }
    }

    /// Overrides the command poll interval (tests and UART-bridged rigs).
    pub fn set_poll_interval_ms(&mut self, interval_ms: u32) {
        self.poll_interval_ms = interval_ms;
    }

    /// All channels, masks included.
    pub fn channels(&self) -> &[PulseGenerator<D, A>] {
        &self.channels
    }

    /// Looks up one channel by name.
    pub fn channel(&self, name: &str) -> Option<&PulseGenerator<D, A>> {
        self.channels.iter().find(|channel| channel.name() == name)
    }

    /// The trigger coordinator.
    pub const fn trigger(&self) -> &TriggerCoordinator<S> {
        &self.trigger
    }

    /// `true` while any channel is armed or pulsing.
    pub fn any_active(&self) -> bool {
        self.channels.iter().any(PulseGenerator::is_active)
    }

    /// Runs one scheduler iteration.
    pub fn iterate<L, Z, F>(&mut self, now: Ticks, link: &mut L, sleeper: &mut Z, faults: &mut F)
    where
        L: HostLink,
        Z: Sleeper,
        F: FaultSink,
    {
        self.trigger.tick(now, &mut self.channels);
        if let Err(fault) = self.service_host(now, link, sleeper, faults) {
            faults.record(&fault);
        }
    }

    fn service_host<L, Z, F>(
        &mut self,
        now: Ticks,
        link: &mut L,
        sleeper: &mut Z,
        faults: &mut F,
    ) -> Result<(), RigFault>
    where
        L: HostLink,
        Z: Sleeper,
        F: FaultSink,
    {
        if let Some(last) = self.last_poll
            && now.diff(last) < self.poll_interval_ms as i32
        {
            return Ok(());
        }
        self.last_poll = Some(now);

        if let Some(enable) = self.enable.as_ref()
            && enable.is_high()
        {
            return Ok(());
        }
        if self.any_active() {
            return Ok(());
        }

        let mut buf = [0u8; 64];
        loop {
            let count = link.read(&mut buf);
            if count == 0 {
                break;
            }
            self.assembler.feed(&buf[..count]);
        }
        if let Some(dropped) = self.assembler.take_overflow() {
            return Err(RigFault::LineOverflow { dropped });
        }

        let Some(line) = self.assembler.pop_line() else {
            return Ok(());
        };
        if line.trim().is_empty() {
            return Ok(());
        }

        let command = parse_line(&line).map_err(|err| RigFault::BadCommand {
            detail: format!("{err}"),
        })?;
        self.dispatch(command, now, link, sleeper, faults)
    }

    fn dispatch<L, Z, F>(
        &mut self,
        command: HostCommand,
        now: Ticks,
        link: &mut L,
        sleeper: &mut Z,
        faults: &mut F,
    ) -> Result<(), RigFault>
    where
        L: HostLink,
        Z: Sleeper,
        F: FaultSink,
    {
        match command {
            HostCommand::Trigger => {
                self.trigger.fire(now, &mut self.channels);
                self.reply(link, &HostReply::Triggered)
            }
            HostCommand::Ping => self.reply(link, &HostReply::Pong),
            HostCommand::Clear => {
                self.trigger.set_members(Vec::new(), now, &mut self.channels);
                Ok(())
            }
            HostCommand::Calibrate(request) => self.run_calibration(&request, link, sleeper),
            HostCommand::Configure(update) => self.apply_configuration(&update, now, link, faults),
        }
    }

    fn reply<L: HostLink>(&self, link: &mut L, reply: &HostReply) -> Result<(), RigFault> {
        let line = reply.to_line().map_err(|err| RigFault::ReplyEncoding {
            detail: format!("{err}"),
        })?;
        link.write_line(&line);
        Ok(())
    }

    fn run_calibration<L, Z>(
        &mut self,
        request: &CalibrationRequest,
        link: &mut L,
        sleeper: &mut Z,
    ) -> Result<(), RigFault>
    where
        L: HostLink,
        Z: Sleeper,
    {
        let Some(index) = self
            .channels
            .iter()
            .position(|channel| channel.name() == request.channel)
        else {
            return Err(RigFault::BadCalibrationTarget {
                name: request.channel.clone(),
            });
        };

        run_sweep(
            &mut self.channels[index],
            &request.steps,
            request.step_duration_s,
            sleeper,
        )
        .map_err(|_| RigFault::BadCalibrationTarget {
            name: request.channel.clone(),
        })?;

        self.reply(
            link,
            &HostReply::CalibrationDone {
                channel: request.channel.clone(),
            },
        )
    }

    fn apply_configuration<L, F>(
        &mut self,
        update: &ConfigUpdate,
        now: Ticks,
        link: &mut L,
        faults: &mut F,
    ) -> Result<(), RigFault>
    where
        L: HostLink,
        F: FaultSink,
    {
        let mut touched: Vec<String> = Vec::new();

        for index in 0..self.channels.len() {
            let name = self.channels[index].name();
            match update.section(name) {
                None => {}
                Some(Value::Null) => {
                    self.channels[index].apply_settings(None, now);
                    touched.push(String::from(name));
                }
                Some(section) => match serde_json::from_value::<ChannelParams>(section.clone()) {
                    Ok(params) => {
                        self.channels[index].apply_settings(Some(&params), now);
                        touched.push(String::from(name));
                    }
                    Err(err) => faults.record(&RigFault::BadSection {
                        target: String::from(name),
                        detail: format!("{err}"),
                    }),
                },
            }
        }

        // Masks track their primaries regardless of which sections changed.
        for index in 0..self.channels.len() {
            if self.channels[index].is_mask() {
                continue;
            }
            let primary_name = self.channels[index].name();
            let Some(mask_index) = self.channels.iter().position(|channel| {
                channel.is_mask() && channel.name().strip_suffix("_mask") == Some(primary_name)
            }) else {
                continue;
            };
            let settings = self.channels[index].settings().clone();
            derive_mask(&settings, self.channels[mask_index].settings_mut());
        }

        match update.section(self.trigger.name()) {
            None => {}
            Some(Value::Null) => self.trigger.stop_all_immediately(now, &mut self.channels),
            Some(section) => match serde_json::from_value::<TriggerParams>(section.clone()) {
                Ok(params) => {
                    self.trigger
                        .apply_settings(&params, now, &mut self.channels, &mut self.sources);
                    touched.push(String::from(self.trigger.name()));
                }
                Err(err) => faults.record(&RigFault::BadSection {
                    target: String::from(self.trigger.name()),
                    detail: format!("{err}"),
                }),
            },
        }

        for name in update.names() {
            let known = name == self.trigger.name()
                || CALIBRATION_KEYS.contains(&name)
                || self.channels.iter().any(|channel| channel.name() == name);
            if !known {
                faults.record(&RigFault::UnknownTarget {
                    name: String::from(name),
                });
            }
        }

        self.reply(link, &HostReply::ConfigApplied { channels: touched })
    }
}
