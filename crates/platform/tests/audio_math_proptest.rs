//! Property-based tests for audio domain math.
//! Verifies invariants hold for ALL valid inputs, not just fixed examples.

use platform::audio_types::{Attenuation, SampleRateHz, VolumePercent};
use platform::AudioConfig;

proptest::proptest! {
    /// VolumePercent::new never panics for any u8 input (clamps to 100).
    #[test]
    fn volume_percent_new_never_panics(pct in 0u8..=255u8) {
        let v = VolumePercent::new(pct);
        assert!(v.get() <= 100);
    }

    /// Higher volume → lower or equal attenuation (monotone inverse relationship).
    #[test]
    fn attenuation_is_monotone_inverse_of_volume(a in 0u8..=100u8, b in 0u8..=100u8) {
        let aa = Attenuation::from_volume(VolumePercent::new(a));
        let ab = Attenuation::from_volume(VolumePercent::new(b));
        if a > b {
            assert!(aa.get() <= ab.get(),
                "volume {} → attenuation {} should be <= volume {} → attenuation {}",
                a, aa.get(), b, ab.get());
        } else if a < b {
            assert!(aa.get() >= ab.get(),
                "volume {} → attenuation {} should be >= volume {} → attenuation {}",
                a, aa.get(), b, ab.get());
        }
    }

    /// Millibel value is never positive and tracks the step count.
    #[test]
    fn attenuation_millibels_never_positive(pct in 0u8..=100u8) {
        let att = Attenuation::from_volume(VolumePercent::new(pct));
        assert!(att.millibels() <= 0);
        assert_eq!(att.millibels(), -50 * i32::from(att.get()));
    }

    /// SampleRateHz::new never panics for any u32 input.
    #[test]
    fn sample_rate_hz_new_never_panics(hz in 0u32..=u32::MAX) {
        let _ = SampleRateHz::new(hz);
    }

    /// SampleRateHz valid range [8000, 768000] always succeeds.
    #[test]
    fn sample_rate_hz_valid_range_always_ok(hz in 8000u32..=768_000u32) {
        assert!(SampleRateHz::new(hz).is_ok(),
            "SampleRateHz::new({}) should be Ok within [8000, 768000]", hz);
    }

    /// AudioConfig::validate agrees with SampleRateHz for stereo 16-bit.
    #[test]
    fn audio_config_validate_matches_sample_rate(hz in 0u32..=1_000_000u32) {
        let cfg = AudioConfig { sample_rate: hz, channels: 2, bit_depth: 16 };
        assert_eq!(cfg.validate().is_ok(), SampleRateHz::new(hz).is_ok());
    }
}
