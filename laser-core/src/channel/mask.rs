//! Sync-mask parameter derivation.

use super::settings::{ChannelSettings, PulseShape};

/// Rewrites `mask` so its square output tracks `primary`'s train timing.
///
/// Masks are always clean digital square waves regardless of the primary's
/// shape, so downstream recording hardware gets an unambiguous edge train.
/// Sine primaries map to a 50% duty mask spanning the fade-out window as
/// well; a full sine additionally shifts the mask by a quarter cycle so its
/// rising edge lines up with the analog peak's half cycle.
pub fn derive_mask(primary: &ChannelSettings, mask: &mut ChannelSettings) {
    mask.set_frequency(primary.frequency_hz());
    mask.set_shape(PulseShape::Square);

    match primary.shape() {
        PulseShape::FullSine => {
            mask.set_duty_cycle(0.5);
            mask.set_delay_ms(primary.cycle_ms() / 4.0);
            mask.set_pulsetrain_ms((primary.pulsetrain_ms() + primary.attenuated_wave_ms()) as f32);
        }
        PulseShape::HalfSine => {
            mask.set_duty_cycle(0.5);
            mask.set_delay_ms(0.0);
            mask.set_pulsetrain_ms((primary.pulsetrain_ms() + primary.attenuated_wave_ms()) as f32);
        }
        PulseShape::Square => {
            mask.set_pulse_ms(primary.pulse_ms() as f32);
            mask.set_delay_ms(primary.delay_ms() as f32);
            mask.set_pulsetrain_ms(primary.pulsetrain_ms() as f32);
        }
    }
}
