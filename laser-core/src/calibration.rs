//! Open-loop power calibration.
//!
//! The sweep raises a channel's TTL gate, steps its DAC through a list of
//! normalized levels while an external power meter samples the beam, then
//! restores both outputs. Blocking holds are acceptable here because the
//! command loop only admits a calibration request while no channel is
//! pulsing. The measured pairs and the fitted line are persisted by the
//! host, not by the firmware.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use serde::{Deserialize, Serialize};

use crate::channel::PulseGenerator;
use crate::io::{AnalogOutput, DigitalOutput};

/// Single applied-level / measured-power observation.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CalibrationSample {
    pub applied_level: f32,
    pub measured_power: f32,
}

/// Least-squares line relating measured power to applied level.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CalibrationModel {
    pub slope: f32,
    pub intercept: f32,
}

impl CalibrationModel {
    /// Fits `power = slope * level + intercept` over the samples.
    ///
    /// Returns `None` for fewer than two samples or when every applied
    /// level is identical.
    pub fn fit(samples: &[CalibrationSample]) -> Option<Self> {
        if samples.len() < 2 {
            return None;
        }

        let n = samples.len() as f32;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_xx = 0.0;
        let mut sum_xy = 0.0;
        for sample in samples {
            sum_x += sample.applied_level;
            sum_y += sample.measured_power;
            sum_xx += sample.applied_level * sample.applied_level;
            sum_xy += sample.applied_level * sample.measured_power;
        }

        let denominator = n * sum_xx - sum_x * sum_x;
        if denominator.abs() < f32::EPSILON {
            return None;
        }

        let slope = (n * sum_xy - sum_x * sum_y) / denominator;
        let intercept = (sum_y - slope * sum_x) / n;
        Some(Self { slope, intercept })
    }

    /// Predicted power at a normalized level.
    pub fn predict(&self, level: f32) -> f32 {
        self.slope * level + self.intercept
    }

    /// Level that would produce `power`, if the fit is invertible.
    pub fn level_for(&self, power: f32) -> Option<f32> {
        if self.slope.abs() < f32::EPSILON {
            None
        } else {
            Some((power - self.intercept) / self.slope)
        }
    }
}

/// Flat calibration record persisted by the host.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CalibrationRecord {
    pub channel_name: String,
    pub samples: Vec<CalibrationSample>,
    pub model: Option<CalibrationModel>,
}

/// Blocking millisecond delay capability.
pub trait Sleeper {
    /// Holds execution for `ms` milliseconds.
    fn sleep_ms(&mut self, ms: u32);
}

/// Why a sweep request was refused.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SweepError {
    /// The target channel has no DAC to sweep (sync masks).
    NoAnalogOutput,
}

impl fmt::Display for SweepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepError::NoAnalogOutput => f.write_str("channel has no analog output"),
        }
    }
}

/// Runs the open-loop sweep on one idle channel.
///
/// Levels outside `[0, 1]` are clamped. On return the TTL gate is low and
/// the DAC is at zero regardless of the requested steps.
pub fn run_sweep<D, A>(
    channel: &mut PulseGenerator<D, A>,
    steps: &[f32],
    step_duration_s: f32,
    sleeper: &mut impl Sleeper,
) -> Result<(), SweepError>
where
    D: DigitalOutput,
    A: AnalogOutput,
{
    let hold_ms = if step_duration_s.is_nan() || step_duration_s < 0.0 {
        0
    } else {
        (step_duration_s * 1_000.0) as u32
    };

    let (ttl, dac) = channel.outputs_mut();
    let Some(dac) = dac else {
        return Err(SweepError::NoAnalogOutput);
    };

    ttl.set_high();
    for &step in steps {
        dac.set_level(step.clamp(0.0, 1.0));
        sleeper.sleep_ms(hold_ms);
    }
    ttl.set_low();
    dac.set_level(0.0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use alloc::vec;
    use core::cell::{Cell, RefCell};

    #[derive(Clone, Default)]
    struct MockLine(Rc<Cell<bool>>);

    impl DigitalOutput for MockLine {
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

    #[derive(Clone, Default)]
    struct RecordingDac {
        level: Rc<Cell<f32>>,
        seen: Rc<RefCell<Vec<f32>>>,
    }

    impl AnalogOutput for RecordingDac {
        fn set_level(&mut self, level: f32) {
            self.level.set(level);
            self.seen.borrow_mut().push(level);
        }

        fn level(&self) -> f32 {
            self.level.get()
        }
    }

    #[derive(Default)]
    struct CountingSleeper {
        total_ms: u32,
    }

    impl Sleeper for CountingSleeper {
        fn sleep_ms(&mut self, ms: u32) {
            self.total_ms += ms;
        }
    }

    #[test]
    fn sweep_applies_steps_then_restores_outputs() {
        let line = MockLine::default();
        let dac = RecordingDac::default();
        let mut channel = PulseGenerator::new("laser1", line.clone(), Some(dac.clone()));
        let mut sleeper = CountingSleeper::default();

        run_sweep(&mut channel, &[0.25, 1.5, -0.5], 2.0, &mut sleeper).expect("sweep runs");

        // Construction zeroes the DAC once, then the clamped steps and the
        // final restore follow.
        assert_eq!(*dac.seen.borrow(), vec![0.0, 0.25, 1.0, 0.0, 0.0]);
        assert!(!line.is_high());
        assert_eq!(sleeper.total_ms, 6_000);
    }

    #[test]
    fn sweep_refuses_mask_channels() {
        let mut channel = PulseGenerator::<MockLine, RecordingDac>::mask(
            "laser1_mask",
            MockLine::default(),
        );
        let mut sleeper = CountingSleeper::default();
        assert_eq!(
            run_sweep(&mut channel, &[0.5], 1.0, &mut sleeper),
            Err(SweepError::NoAnalogOutput)
        );
    }

    #[test]
    fn fit_recovers_a_linear_relationship() {
        let samples: Vec<CalibrationSample> = [0.0_f32, 0.25, 0.5, 0.75, 1.0]
            .iter()
            .map(|&level| CalibrationSample {
                applied_level: level,
                measured_power: 3.0 * level + 0.5,
            })
            .collect();

        let model = CalibrationModel::fit(&samples).expect("fit succeeds");
        assert!((model.slope - 3.0).abs() < 1e-4);
        assert!((model.intercept - 0.5).abs() < 1e-4);
        assert!((model.predict(0.5) - 2.0).abs() < 1e-4);
        let level = model.level_for(2.0).expect("invertible");
        assert!((level - 0.5).abs() < 1e-4);
    }

    #[test]
    fn fit_rejects_degenerate_input() {
        assert_eq!(CalibrationModel::fit(&[]), None);
        let flat = [
            CalibrationSample {
                applied_level: 0.5,
                measured_power: 1.0,
            },
            CalibrationSample {
                applied_level: 0.5,
                measured_power: 2.0,
            },
        ];
        assert_eq!(CalibrationModel::fit(&flat), None);
    }
}
