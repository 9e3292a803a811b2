pub mod config;
pub mod dsp;
pub mod error;
pub mod melody;
pub mod sink;

pub use crate::config::EngineConfig;
pub use crate::dsp::engine::{AudioEngine, EngineState, EngineStatus};
pub use crate::dsp::mixer::{ChannelMode, SmoothingPreset};
pub use crate::dsp::oscillator::{VoiceSettings, Waveform};
pub use crate::error::{EngineError, SinkError};
pub use crate::sink::{AudioSink, SinkFormat};

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
