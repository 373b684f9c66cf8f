//! Simulated rig session.
//!
//! Runs the exact firmware code paths against simulated pins, DAC levels,
//! a simulated millisecond clock, and an in-memory serial link. Digital
//! edges are rendered as a timeline so waveforms can be inspected without
//! hardware; faults land in a real append-only log file, as they would on
//! a host-attached rig.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::rc::Rc;

use laser_core::calibration::Sleeper;
use laser_core::channel::PulseGenerator;
use laser_core::clock::{TickClock, Ticks};
use laser_core::io::{AnalogOutput, DigitalInput, DigitalOutput};
use laser_core::rig::{HostLink, Rig};
use laser_core::telemetry::{FaultSink, RigFault};
use laser_core::trigger::{
    TRIGGER_SOURCE_COUNT, TriggerCoordinator, TriggerSource, TriggerSources,
};

const FAULT_LOG_PATH: &str = "laser-rig-faults.log";
const TRANSCRIPT_PATH: &str = "laser-rig-session.log";

/// Sim time auto-advanced after queueing a protocol line.
const AUTO_STEP_MS: u32 = 25;

/// Poll interval used in the simulation; short enough to feel interactive.
const POLL_INTERVAL_MS: u32 = 10;

const HELP_LINES: &[&str] = &[
    "<json> | TRIGGER | PING | null   - send a protocol line to the rig",
    "step <ms>                        - advance the simulated clock",
    "line <source> high|low           - drive a trigger input (IntTrigger, ExtTrigger0..3)",
    "prime high|low                   - drive the priming interlock input",
    "enable high|low                  - drive the trial-enable input",
    "state                            - dump channel and coordinator state",
    "history                          - per-channel train counts and timestamps",
    "exit                             - quit",
];

/// Shared-state digital line.
#[derive(Clone, Default)]
struct SimLine(Rc<Cell<bool>>);

impl SimLine {
    fn get(&self) -> bool {
        self.0.get()
    }

    fn set(&self, high: bool) {
        self.0.set(high);
    }
}

impl DigitalOutput for SimLine {
    fn set_high(&mut self) {
        self.0.set(true);
    }

    fn set_low(&mut self) {
        self.0.set(false);
    }

    fn is_high(&self) -> bool {
        self.0.get()
    }
}

impl DigitalInput for SimLine {
    fn is_high(&self) -> bool {
        self.0.get()
    }
}

/// Shared-state DAC level.
#[derive(Clone, Default)]
struct SimDac(Rc<Cell<f32>>);

impl SimDac {
    fn get(&self) -> f32 {
        self.0.get()
    }
}

impl AnalogOutput for SimDac {
    fn set_level(&mut self, level: f32) {
        self.0.set(level.clamp(0.0, 1.0));
    }

    fn level(&self) -> f32 {
        self.0.get()
    }
}

/// Pool of simulated trigger lines.
#[derive(Clone, Default)]
struct SimSources {
    inputs: [SimLine; TRIGGER_SOURCE_COUNT],
    priming: SimLine,
    mirror: SimLine,
}

impl TriggerSources for SimSources {
    type Input = SimLine;
    type Mirror = SimLine;

    fn claim_input(&mut self, source: TriggerSource) -> SimLine {
        self.inputs[source.index()].clone()
    }

    fn release_input(&mut self, _: TriggerSource, _: SimLine) {}

    fn claim_priming(&mut self) -> SimLine {
        self.priming.clone()
    }

    fn claim_mirror(&mut self) -> SimLine {
        self.mirror.clone()
    }

    fn release_mirror(&mut self, mut line: SimLine) {
        line.set_low();
    }
}

/// In-memory serial link standing in for the UART.
#[derive(Clone, Default)]
struct SimLink {
    inbox: Rc<RefCell<VecDeque<u8>>>,
    replies: Rc<RefCell<Vec<String>>>,
}

impl SimLink {
    fn push_line(&self, line: &str) {
        let mut inbox = self.inbox.borrow_mut();
        inbox.extend(line.as_bytes());
        inbox.push_back(b'\n');
    }

    fn drain_replies(&self) -> Vec<String> {
        self.replies.borrow_mut().drain(..).collect()
    }
}

impl HostLink for SimLink {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut inbox = self.inbox.borrow_mut();
        let mut count = 0;
        while count < buf.len() {
            match inbox.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    fn write_line(&mut self, line: &str) {
        self.replies
            .borrow_mut()
            .push(line.trim_end().to_string());
    }
}

/// Simulated millisecond counter standing in for the hardware tick source.
#[derive(Default)]
struct SimClock(Cell<u32>);

impl SimClock {
    fn advance(&self) {
        self.0.set(self.0.get().wrapping_add(1));
    }

    fn now_ms(&self) -> u32 {
        self.0.get()
    }
}

impl TickClock for SimClock {
    fn now(&self) -> Ticks {
        Ticks::new(self.0.get())
    }
}

/// Simulated time passes instantly.
struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep_ms(&mut self, _: u32) {}
}

/// Append-only fault log file, the persistent record a real rig keeps.
struct FileFaultLog {
    path: &'static str,
    count: usize,
}

impl FileFaultLog {
    fn new(path: &'static str) -> Self {
        Self { path, count: 0 }
    }
}

impl FaultSink for FileFaultLog {
    fn record(&mut self, fault: &RigFault) {
        self.count += 1;
        let appended = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path)
            .and_then(|mut file| writeln!(file, "{fault}"));
        if let Err(err) = appended {
            log::warn!("fault log write failed: {err}");
        }
    }
}

/// Session transcript mirroring what crossed the simulated link.
struct TranscriptLogger {
    file: std::fs::File,
}

impl TranscriptLogger {
    fn new() -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(TRANSCRIPT_PATH)?;
        Ok(Self { file })
    }

    fn append(&mut self, at_ms: u32, role: &str, text: &str) -> io::Result<()> {
        writeln!(self.file, "[{at_ms:>8} ms] {role:<5} {text}")
    }
}

struct WatchedLine {
    label: &'static str,
    line: SimLine,
    last: bool,
}

struct WatchedDac {
    label: &'static str,
    dac: SimDac,
}

pub struct Session {
    rig: Rig<SimSources, SimLine, SimDac>,
    sources: SimSources,
    enable: SimLine,
    link: SimLink,
    faults: FileFaultLog,
    transcript: TranscriptLogger,
    watched: Vec<WatchedLine>,
    dacs: Vec<WatchedDac>,
    clock: SimClock,
}

impl Session {
    pub fn new() -> io::Result<Self> {
        let sources = SimSources::default();
        let enable = SimLine::default();
        let link = SimLink::default();

        let mut pool = sources.clone();
        let mut trigger = TriggerCoordinator::new("trigger1", &mut pool);

        let mut watched = Vec::new();
        let mut dacs = Vec::new();
        let mut channels = Vec::new();
        for (primary, mask) in [
            ("laser1", "laser1_mask"),
            ("laser2", "laser2_mask"),
            ("laser3", "laser3_mask"),
            ("laser4", "laser4_mask"),
        ] {
            let gate = SimLine::default();
            let dac = SimDac::default();
            let mask_gate = SimLine::default();
            watched.push(WatchedLine {
                label: primary,
                line: gate.clone(),
                last: false,
            });
            watched.push(WatchedLine {
                label: mask,
                line: mask_gate.clone(),
                last: false,
            });
            dacs.push(WatchedDac {
                label: primary,
                dac: dac.clone(),
            });
            channels.push(PulseGenerator::new(primary, gate, Some(dac)));
            channels.push(PulseGenerator::mask(mask, mask_gate));
        }
        watched.push(WatchedLine {
            label: "mirror",
            line: sources.mirror.clone(),
            last: false,
        });

        trigger.set_members(
            vec!["laser1".to_string(), "laser2".to_string()],
            Ticks::new(0),
            &mut channels,
        );

        let mut rig = Rig::new(channels, trigger, pool, Some(enable.clone()));
        rig.set_poll_interval_ms(POLL_INTERVAL_MS);

        Ok(Self {
            rig,
            sources,
            enable,
            link,
            faults: FileFaultLog::new(FAULT_LOG_PATH),
            transcript: TranscriptLogger::new()?,
            watched,
            dacs,
            clock: SimClock::default(),
        })
    }

    pub fn handle_command(&mut self, input: &str) -> io::Result<Vec<String>> {
        if input.eq_ignore_ascii_case("help") {
            return Ok(HELP_LINES.iter().map(|line| (*line).to_string()).collect());
        }
        if input.eq_ignore_ascii_case("state") {
            return Ok(self.render_state());
        }
        if input.eq_ignore_ascii_case("history") {
            return Ok(self.render_history());
        }
        if let Some(rest) = input.strip_prefix("step ") {
            return match rest.trim().parse::<u32>() {
                Ok(ms) => self.step(ms),
                Err(_) => Ok(vec![format!("ERR step wants milliseconds, got `{rest}`")]),
            };
        }
        if let Some(rest) = input.strip_prefix("line ") {
            return Ok(self.drive_trigger_line(rest.trim()));
        }
        if let Some(rest) = input.strip_prefix("prime ") {
            return Ok(match parse_level(rest.trim()) {
                Some(level) => {
                    self.sources.priming.set(level);
                    vec![format!("priming input {}", level_name(level))]
                }
                None => vec!["ERR prime wants high|low".to_string()],
            });
        }
        if let Some(rest) = input.strip_prefix("enable ") {
            return Ok(match parse_level(rest.trim()) {
                Some(level) => {
                    self.enable.set(level);
                    vec![format!("enable input {}", level_name(level))]
                }
                None => vec!["ERR enable wants high|low".to_string()],
            });
        }

        // Everything else is a protocol line for the rig.
        self.transcript.append(self.clock.now_ms(), "host", input)?;
        self.link.push_line(input);
        self.step(AUTO_STEP_MS)
    }

    fn step(&mut self, span_ms: u32) -> io::Result<Vec<String>> {
        let mut events = Vec::new();
        let mut link = self.link.clone();
        let mut sleeper = InstantSleeper;
        for _ in 0..span_ms {
            let now = self.clock.now();
            self.rig.iterate(now, &mut link, &mut sleeper, &mut self.faults);
            for watched in &mut self.watched {
                let level = watched.line.get();
                if level != watched.last {
                    watched.last = level;
                    events.push(format!(
                        "t={} ms  {} -> {}",
                        self.clock.now_ms(),
                        watched.label,
                        level_name(level)
                    ));
                }
            }
            self.clock.advance();
        }

        for reply in self.link.drain_replies() {
            self.transcript.append(self.clock.now_ms(), "rig", &reply)?;
            events.push(format!("rig: {reply}"));
        }
        for event in &events {
            self.transcript.append(self.clock.now_ms(), "sim", event)?;
        }
        Ok(events)
    }

    fn drive_trigger_line(&mut self, rest: &str) -> Vec<String> {
        let mut parts = rest.split_whitespace();
        let (Some(name), Some(level)) = (parts.next(), parts.next()) else {
            return vec!["ERR line wants `<source> high|low`".to_string()];
        };
        let Some(source) = parse_source(name) else {
            return vec![format!("ERR unknown trigger source `{name}`")];
        };
        let Some(level) = parse_level(level) else {
            return vec!["ERR line wants high|low".to_string()];
        };
        self.sources.inputs[source.index()].set(level);
        vec![format!("{name} {}", level_name(level))]
    }

    fn render_state(&self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push(format!(
            "t={} ms  primed={}  mock={}  members={:?}  faults={}",
            self.clock.now_ms(),
            self.rig.trigger().is_primed(),
            self.rig.trigger().is_mock(),
            self.rig.trigger().members(),
            self.faults.count,
        ));
        for channel in self.rig.channels() {
            let settings = channel.settings();
            let dac_level = self
                .dacs
                .iter()
                .find(|dac| dac.label == channel.name())
                .map(|dac| format!("{:.3}", dac.dac.get()))
                .unwrap_or_else(|| "-".to_string());
            lines.push(format!(
                "{:<12} active={:<5} gate={:<4} dac={:<6} {:?} {} Hz train={} ms delay={} ms",
                channel.name(),
                channel.is_active(),
                if self.gate_level(channel.name()) { "high" } else { "low" },
                dac_level,
                settings.shape(),
                settings.frequency_hz(),
                settings.pulsetrain_ms(),
                settings.delay_ms(),
            ));
        }
        lines
    }

    fn render_history(&self) -> Vec<String> {
        self.rig
            .channels()
            .iter()
            .map(|channel| {
                let history = channel.history();
                format!(
                    "{:<12} trains={} ends={} last_start={:?} last_end={:?}",
                    channel.name(),
                    history.total_starts(),
                    history.total_ends(),
                    history.last_start().map(Ticks::raw),
                    history.last_end().map(Ticks::raw),
                )
            })
            .collect()
    }

    fn gate_level(&self, name: &str) -> bool {
        self.watched
            .iter()
            .find(|watched| watched.label == name)
            .is_some_and(|watched| watched.line.get())
    }
}

fn parse_level(text: &str) -> Option<bool> {
    match text {
        "high" | "1" | "on" => Some(true),
        "low" | "0" | "off" => Some(false),
        _ => None,
    }
}

const fn level_name(level: bool) -> &'static str {
    if level { "HIGH" } else { "LOW" }
}

fn parse_source(name: &str) -> Option<TriggerSource> {
    match name {
        "IntTrigger" => Some(TriggerSource::Internal),
        "IntTrigger2" => Some(TriggerSource::Internal2),
        "ExtTrigger0" => Some(TriggerSource::External0),
        "ExtTrigger1" => Some(TriggerSource::External1),
        "ExtTrigger2" => Some(TriggerSource::External2),
        "ExtTrigger3" => Some(TriggerSource::External3),
        _ => None,
    }
}
