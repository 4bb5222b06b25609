//! Type system enforcement tests for audio domain newtypes.
//! These newtypes prevent common audio configuration bugs at compile time.
#![allow(clippy::unwrap_used)]

// ── VolumePercent ────────────────────────────────────────────────────────────

#[test]
fn volume_percent_new_clamps_over_100() {
    use platform::audio_types::VolumePercent;
    let v = VolumePercent::new(150);
    assert_eq!(v.get(), 100, "VolumePercent::new(150) should clamp to 100");
}

#[test]
fn volume_percent_try_new_rejects_over_100() {
    use platform::audio_types::VolumePercent;
    assert!(VolumePercent::try_new(101).is_err());
    assert!(VolumePercent::try_new(255).is_err());
    assert!(VolumePercent::try_new(100).is_ok());
}

#[test]
fn volume_percent_defaults_to_full_scale() {
    use platform::audio_types::VolumePercent;
    assert_eq!(VolumePercent::default(), VolumePercent::MAX);
}

// ── Attenuation ──────────────────────────────────────────────────────────────

#[test]
fn attenuation_from_volume_100_is_zero_db() {
    use platform::audio_types::{Attenuation, VolumePercent};
    let att = Attenuation::from_volume(VolumePercent::new(100));
    assert_eq!(att.get(), 0);
    assert_eq!(att.millibels(), 0);
}

#[test]
fn attenuation_from_volume_0_is_mute() {
    use platform::audio_types::{Attenuation, VolumePercent};
    let att = Attenuation::from_volume(VolumePercent::new(0));
    assert!(att.is_mute());
    assert_eq!(att.millibels(), -12_750);
}

#[test]
fn attenuation_from_volume_50_is_midpoint() {
    use platform::audio_types::{Attenuation, VolumePercent};
    // (100 - 50) * 255 / 100 = 127
    assert_eq!(Attenuation::from_volume(VolumePercent::new(50)).get(), 127);
}

// ── SampleRateHz ─────────────────────────────────────────────────────────────

#[test]
fn sample_rate_hz_rejects_below_minimum() {
    use platform::audio_types::SampleRateHz;
    let err = SampleRateHz::new(7_999).unwrap_err();
    assert_eq!(err.min, 8_000);
}

#[test]
fn sample_rate_hz_accepts_standard_rates() {
    use platform::audio_types::SampleRateHz;
    for hz in [8_000, 22_050, 44_100, 48_000, 96_000, 192_000, 768_000] {
        assert_eq!(SampleRateHz::new(hz).map(SampleRateHz::get), Ok(hz));
    }
}
