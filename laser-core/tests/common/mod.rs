//! Simulated hardware shared by the scenario tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use laser_core::calibration::Sleeper;
use laser_core::channel::PulseGenerator;
use laser_core::clock::Ticks;
use laser_core::io::{AnalogOutput, DigitalInput, DigitalOutput};
use laser_core::rig::{HostLink, Rig};
use laser_core::telemetry::{FaultSink, RigFault};
use laser_core::trigger::{TRIGGER_SOURCE_COUNT, TriggerCoordinator, TriggerSource, TriggerSources};

/// Shared-state digital line usable as input, output, or both.
#[derive(Clone, Default)]
pub struct SimLine(Rc<Cell<bool>>);

impl SimLine {
    pub fn get(&self) -> bool {
        self.0.get()
    }

    pub fn set(&self, high: bool) {
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

/// Shared-state DAC channel.
#[derive(Clone, Default)]
pub struct SimDac(Rc<Cell<f32>>);

impl SimDac {
    pub fn get(&self) -> f32 {
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

/// Line pool backing the trigger coordinator.
#[derive(Clone, Default)]
pub struct SimSources {
    pub inputs: [SimLine; TRIGGER_SOURCE_COUNT],
    pub priming: SimLine,
    pub mirror: SimLine,
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

/// In-memory serial link.
#[derive(Clone, Default)]
pub struct MemoryLink {
    inbox: Rc<RefCell<VecDeque<u8>>>,
    outbox: Rc<RefCell<Vec<String>>>,
}

impl MemoryLink {
    /// Queues one newline-terminated line as if the host had sent it.
    pub fn push_line(&self, line: &str) {
        let mut inbox = self.inbox.borrow_mut();
        inbox.extend(line.as_bytes());
        inbox.push_back(b'\n');
    }

    /// Reply frames written so far, terminators stripped.
    pub fn replies(&self) -> Vec<String> {
        self.outbox
            .borrow()
            .iter()
            .map(|line| line.trim_end().to_string())
            .collect()
    }
}

impl HostLink for MemoryLink {
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
        self.outbox.borrow_mut().push(line.to_string());
    }
}

/// Sink collecting rendered fault records.
#[derive(Clone, Default)]
pub struct RecordingFaults(Rc<RefCell<Vec<String>>>);

impl RecordingFaults {
    pub fn records(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

impl FaultSink for RecordingFaults {
    fn record(&mut self, fault: &RigFault) {
        self.0.borrow_mut().push(fault.to_string());
    }
}

/// Sleeper that only counts.
#[derive(Default)]
pub struct CountingSleeper {
    pub total_ms: u64,
}

impl Sleeper for CountingSleeper {
    fn sleep_ms(&mut self, ms: u32) {
        self.total_ms += u64::from(ms);
    }
}

/// External observation points into a built rig.
pub struct RigHandles {
    pub trigger_line: SimLine,
    pub ext1_line: SimLine,
    pub priming: SimLine,
    pub mirror: SimLine,
    pub enable: SimLine,
    pub laser1: SimLine,
    pub laser1_dac: SimDac,
    pub laser1_mask: SimLine,
    pub laser2: SimLine,
    pub laser2_dac: SimDac,
    pub laser2_mask: SimLine,
    pub link: MemoryLink,
    pub faults: RecordingFaults,
}

/// Builds a two-laser rig. `laser1` and its mask start out as trigger
/// members; `laser2` is present but detached so membership changes can be
/// exercised.
pub fn build_rig() -> (Rig<SimSources, SimLine, SimDac>, RigHandles) {
    let sources = SimSources::default();
    let handles = RigHandles {
        trigger_line: sources.inputs[TriggerSource::Internal.index()].clone(),
        ext1_line: sources.inputs[TriggerSource::External1.index()].clone(),
        priming: sources.priming.clone(),
        mirror: sources.mirror.clone(),
        enable: SimLine::default(),
        laser1: SimLine::default(),
        laser1_dac: SimDac::default(),
        laser1_mask: SimLine::default(),
        laser2: SimLine::default(),
        laser2_dac: SimDac::default(),
        laser2_mask: SimLine::default(),
        link: MemoryLink::default(),
        faults: RecordingFaults::default(),
    };

    let mut sources = sources;
    let mut trigger = TriggerCoordinator::new("trigger1", &mut sources);
    let mut channels = vec![
        PulseGenerator::new(
            "laser1",
            handles.laser1.clone(),
            Some(handles.laser1_dac.clone()),
        ),
        PulseGenerator::mask("laser1_mask", handles.laser1_mask.clone()),
        PulseGenerator::new(
            "laser2",
            handles.laser2.clone(),
            Some(handles.laser2_dac.clone()),
        ),
        PulseGenerator::mask("laser2_mask", handles.laser2_mask.clone()),
    ];
    trigger.set_members(vec!["laser1".to_string()], Ticks::new(0), &mut channels);

    let mut rig = Rig::new(channels, trigger, sources, Some(handles.enable.clone()));
    rig.set_poll_interval_ms(1);
    (rig, handles)
}

/// Advances the rig one millisecond at a time over `span_ms`, starting at
/// `start`, and returns the tick after the last one executed.
pub fn run_span(
    rig: &mut Rig<SimSources, SimLine, SimDac>,
    handles: &RigHandles,
    start: Ticks,
    span_ms: u32,
) -> Ticks {
    let mut link = handles.link.clone();
    let mut faults = handles.faults.clone();
    let mut sleeper = CountingSleeper::default();
    let mut now = start;
    for _ in 0..span_ms {
        rig.iterate(now, &mut link, &mut sleeper, &mut faults);
        now = now.advance(1);
    }
    now
}
