//! audio - Streaming decode and playback
//!
//! Pulls encoded chunks from a media source, decodes them with Symphonia and
//! writes fixed-size PCM buffers to ALSA. Speed is applied as a playback rate
//! on the sink, so tempo and pitch move together.

mod alsa_device;
mod audio_system;
mod extractor;
pub mod media_source;
pub mod output_sink;
mod play;
mod player;
mod rate;
mod session;
pub mod stream_decoder;
mod symphonia_codec;

#[cfg(test)]
pub(crate) mod testing;

pub use audio_system::{AudioConfig, EndOfStreamPolicy, SystemBackend};
pub use play::{PlayerEvent, SessionEnd, playback_rate};
pub use player::PitchPlayer;
