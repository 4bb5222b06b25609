//! Application configuration and constants
//!
//! Central values shared by the pipeline and the firmware. Sizes here are
//! defaults; the pipeline takes its own runtime configuration.

/// The application name
pub const APP_NAME: &str = "Soul Listener";

/// Application version (synchronized with Cargo.toml)
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// User agent sent by network sources
pub const USER_AGENT: &str = "SoulListener/0.1";

/// Default output sample rate before the first stream arrives
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Number of equalizer bands exposed to the user
pub const EQ_BAND_COUNT: usize = 10;

/// Equalizer band centre frequencies in Hz
pub const EQ_BAND_FREQS: [f32; EQ_BAND_COUNT] = [
    31.0, 62.0, 125.0, 250.0, 500.0, 1_000.0, 2_000.0, 4_000.0, 8_000.0, 16_000.0,
];

/// Equalizer band gain limits in dB
pub const EQ_GAIN_MIN_DB: f32 = -24.0;
/// Equalizer band gain limits in dB
pub const EQ_GAIN_MAX_DB: f32 = 12.0;

/// Full application title
pub const fn app_title() -> &'static str {
    APP_NAME
}
