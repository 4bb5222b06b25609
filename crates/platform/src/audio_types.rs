//! Audio domain newtypes for compile-time safety.
//!
//! These zero-cost abstractions prevent common errors:
//! - `VolumePercent`: clamps 0–100
//! - `Attenuation`: 0.5 dB steps, derived from VolumePercent only
//! - `SampleRateHz`: validates 8000–768000 Hz range

// ── Error type ───────────────────────────────────────────────────────────────

/// Error returned when a value is out of the valid range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutOfRangeError {
    /// The value that was out of range.
    pub value: u32,
    /// The inclusive minimum allowed value.
    pub min: u32,
    /// The inclusive maximum allowed value.
    pub max: u32,
}

// ── VolumePercent ────────────────────────────────────────────────────────────

/// Volume as a percentage, clamped to 0–100.
///
/// Wraps a `u8` with the invariant `0 <= value <= 100`.
/// Construct with [`VolumePercent::new`] (clamping) or
/// [`VolumePercent::try_new`] (fallible, strict).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(transparent)]
pub struct VolumePercent(u8);

impl VolumePercent {
    /// Full scale.
    pub const MAX: Self = Self(100);

    /// Create a `VolumePercent`, clamping values above 100 to 100.
    #[must_use]
    pub fn new(value: u8) -> Self {
        Self(value.min(100))
    }

    /// Create a `VolumePercent`, returning an error if `value > 100`.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRangeError`] if `value > 100`.
    pub fn try_new(value: u8) -> Result<Self, OutOfRangeError> {
        if value > 100 {
            Err(OutOfRangeError {
                value: u32::from(value),
                min: 0,
                max: 100,
            })
        } else {
            Ok(Self(value))
        }
    }

    /// Return the inner volume value (0–100).
    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for VolumePercent {
    fn default() -> Self {
        Self::MAX
    }
}

// ── Attenuation ──────────────────────────────────────────────────────────────

/// Output attenuation in 0.5 dB steps (0 = 0 dB, 255 = mute).
///
/// Same scale as the master attenuation register of common I2S DACs, so a
/// hardware sink can program it directly while a software sink converts it
/// to a linear gain.
///
/// Formula: `steps = (100 - volume_percent) * 255 / 100`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(transparent)]
pub struct Attenuation(u8);

impl Attenuation {
    /// Attenuation treated as silence.
    pub const MUTE: Self = Self(u8::MAX);

    /// Convert a `VolumePercent` to attenuation steps.
    ///
    /// - 100% volume → 0 (0 dB)
    /// - 0% volume   → 255 (mute)
    #[must_use]
    pub fn from_volume(vol: VolumePercent) -> Self {
        // (100 - vol) * 255 / 100, max 25500 fits u16
        #[allow(clippy::arithmetic_side_effects)] // Safety: vol <= 100 by construction
        let steps = (u16::from(100 - vol.get()) * 255) / 100;
        #[allow(clippy::cast_possible_truncation)] // Safety: steps <= 255
        Self(steps as u8)
    }

    /// Return the raw step count.
    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }

    /// `true` for the mute setting.
    #[must_use]
    pub fn is_mute(self) -> bool {
        self == Self::MUTE
    }

    /// Attenuation in millibels (hundredths of a dB), always `<= 0`.
    #[must_use]
    pub fn millibels(self) -> i32 {
        i32::from(self.0).saturating_mul(-50)
    }
}

// ── SampleRateHz ─────────────────────────────────────────────────────────────

/// Sample rate in Hz, validated to the range an I2S output can clock.
///
/// Valid range: 8000–768000 Hz (8 kHz to 768 kHz PCM).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(transparent)]
pub struct SampleRateHz(u32);

impl SampleRateHz {
    /// Minimum supported sample rate: 8000 Hz (telephony).
    pub const MIN_HZ: u32 = 8_000;

    /// Maximum supported sample rate: 768000 Hz.
    pub const MAX_HZ: u32 = 768_000;

    /// Create a `SampleRateHz`, returning an error if out of 8000–768000 Hz.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRangeError`] if `hz < 8000` or `hz > 768000`.
    pub fn new(hz: u32) -> Result<Self, OutOfRangeError> {
        if hz < Self::MIN_HZ || hz > Self::MAX_HZ {
            Err(OutOfRangeError {
                value: hz,
                min: Self::MIN_HZ,
                max: Self::MAX_HZ,
            })
        } else {
            Ok(Self(hz))
        }
    }

    /// Return the sample rate in Hz.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}
