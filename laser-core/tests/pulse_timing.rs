mod common;

use common::{SimDac, SimLine};
use laser_core::channel::{ChannelParams, PulseGenerator, PulseShape};
use laser_core::clock::{TICKS_PERIOD, Ticks};
use laser_core::io::AnalogOutput;

fn square_channel(
    frequency: f32,
    duty: f32,
    train_ms: f32,
) -> (PulseGenerator<SimLine, SimDac>, SimLine) {
    let line = SimLine::default();
    let mut channel = PulseGenerator::new("laser1", line.clone(), Some(SimDac::default()));
    channel.apply_settings(
        Some(&ChannelParams {
            frequency: Some(frequency),
            duty_cycle: Some(duty),
            pulsetrain_duration: Some(train_ms),
            delay_time: Some(0.0),
            pulse_type: Some(PulseShape::Square),
            attenuation_factor: Some(1.0),
            ..ChannelParams::default()
        }),
        Ticks::new(0),
    );
    (channel, line)
}

/// Ticks the channel once per millisecond and records the gate level after
/// every tick, returning (rising edges, high-phase run lengths in ms).
fn trace_gate(
    channel: &mut PulseGenerator<SimLine, SimDac>,
    line: &SimLine,
    start: Ticks,
    span_ms: u32,
) -> (u32, Vec<u32>) {
    let mut rising = 0;
    let mut runs = Vec::new();
    let mut current_run = 0u32;
    let mut previous = line.get();
    let mut now = start;
    for _ in 0..span_ms {
        channel.tick(now);
        let level = line.get();
        if level {
            current_run += 1;
        }
        if level && !previous {
            rising += 1;
        }
        if !level && previous {
            runs.push(current_run);
            current_run = 0;
        }
        previous = level;
        now = now.advance(1);
    }
    if current_run > 0 {
        runs.push(current_run);
    }
    (rising, runs)
}

#[test]
fn ten_hertz_half_duty_train_yields_ten_clean_cycles() {
    let (mut channel, line) = square_channel(10.0, 0.5, 1_000.0);
    channel.start(Ticks::new(0));
    let (rising, runs) = trace_gate(&mut channel, &line, Ticks::new(0), 1_100);

    assert_eq!(rising, 10);
    assert_eq!(runs.len(), 10);
    for run in &runs {
        assert!((49..=51).contains(run), "high phase was {run} ms");
    }
    assert!(!channel.is_active());
    assert!(!line.get());
    assert_eq!(channel.history().total_starts(), 1);
    assert_eq!(channel.history().total_ends(), 1);
}

#[test]
fn square_timing_survives_counter_wraparound() {
    let (mut channel, line) = square_channel(10.0, 0.5, 1_000.0);
    // Arm shortly before the counter wraps so the whole train spans it.
    let start = Ticks::new(TICKS_PERIOD - 123);
    channel.start(start);
    let (rising, runs) = trace_gate(&mut channel, &line, start, 1_100);

    assert_eq!(rising, 10);
    assert_eq!(runs.len(), 10);
    for run in &runs {
        assert!((49..=51).contains(run));
    }
    assert!(!channel.is_active());
}

#[test]
fn graceful_stop_never_truncates_a_high_phase() {
    let (mut channel, line) = square_channel(10.0, 0.5, 10_000.0);
    channel.start(Ticks::new(0));
    for ms in 0..=25 {
        channel.tick(Ticks::new(ms));
    }
    assert!(line.get());
    channel.stop_graceful(Ticks::new(25));

    // The current 50 ms high phase completes before the gate drops.
    for ms in 26..50 {
        channel.tick(Ticks::new(ms));
        assert!(line.get(), "gate dropped early at {ms} ms");
    }
    channel.tick(Ticks::new(50));
    assert!(!line.get());
    assert!(!channel.is_active());
}

#[test]
fn delayed_start_waits_the_configured_offset() {
    let (mut channel, line) = square_channel(10.0, 0.5, 500.0);
    channel.settings_mut().set_delay_ms(200.0);
    channel.start(Ticks::new(1_000));
    for ms in 1_000..1_200 {
        channel.tick(Ticks::new(ms));
        assert!(!line.get());
        assert!(channel.is_active());
    }
    channel.tick(Ticks::new(1_200));
    assert!(line.get());
}

fn analog_channel(
    shape: PulseShape,
    train_ms: f32,
    fade_ms: f32,
) -> (PulseGenerator<SimLine, SimDac>, SimLine, SimDac) {
    let line = SimLine::default();
    let dac = SimDac::default();
    let mut channel = PulseGenerator::new("laser1", line.clone(), Some(dac.clone()));
    channel.apply_settings(
        Some(&ChannelParams {
            frequency: Some(10.0),
            pulse_type: Some(shape),
            pulsetrain_duration: Some(train_ms),
            attenuated_wave: Some(fade_ms),
            attenuation_factor: Some(1.0),
            delay_time: Some(0.0),
            ..ChannelParams::default()
        }),
        Ticks::new(0),
    );
    (channel, line, dac)
}

#[test]
fn full_sine_fade_decays_to_exactly_zero() {
    let (mut channel, line, dac) = analog_channel(PulseShape::FullSine, 400.0, 200.0);
    channel.start(Ticks::new(0));

    let mut peak_during_train = 0.0f32;
    let mut peak_first_fade_half = 0.0f32;
    let mut peak_second_fade_half = 0.0f32;
    for ms in 0..=700 {
        channel.tick(Ticks::new(ms));
        let level = dac.level();
        match ms {
            0..=399 => peak_during_train = peak_during_train.max(level),
            400..=499 => peak_first_fade_half = peak_first_fade_half.max(level),
            500..=599 => peak_second_fade_half = peak_second_fade_half.max(level),
            _ => {}
        }
        // The gate stays high for the whole analog train, fade included.
        if ms < 400 {
            assert!(line.get());
        }
    }

    assert!(peak_during_train > 0.9);
    assert!(peak_first_fade_half < peak_during_train);
    assert!(peak_second_fade_half < peak_first_fade_half);
    assert!(!channel.is_active());
    assert_eq!(dac.level(), 0.0);
    assert!(!line.get());

    // The fade window bounds the stop: 400 ms train + 200 ms fade.
    let end = channel.history().last_end().expect("train ended");
    assert!(end.diff(Ticks::new(400)) <= 200);
}

#[test]
fn half_sine_without_fade_stops_at_the_zero_crossing() {
    let (mut channel, line, dac) = analog_channel(PulseShape::HalfSine, 460.0, 0.0);
    channel.start(Ticks::new(0));

    for ms in 0..=470 {
        channel.tick(Ticks::new(ms));
    }

    assert!(!channel.is_active());
    assert_eq!(dac.level(), 0.0);
    assert!(!line.get());
    let end = channel.history().last_end().expect("train ended");
    // Stop lands inside the cycle that was running when the train elapsed.
    assert!(end.diff(Ticks::new(460)) <= 100);
}

#[test]
fn half_sine_clamps_its_negative_half_cycle() {
    let (mut channel, line, dac) = analog_channel(PulseShape::HalfSine, 10_000.0, 0.0);
    channel.start(Ticks::new(0));
    for ms in 0..=25 {
        channel.tick(Ticks::new(ms));
    }
    assert!(dac.level() > 0.9, "positive half cycle should peak");

    for ms in 26..=75 {
        channel.tick(Ticks::new(ms));
    }
    // Second half cycle: the sine is negative, the output clamps at zero
    // while the gate stays asserted.
    assert_eq!(dac.level(), 0.0);
    assert!(line.get());
}
