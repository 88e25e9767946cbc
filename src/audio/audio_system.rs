//! Playback configuration and the factory that builds session collaborators.

use std::time::Duration;

use anyhow::Result;

use super::alsa_device::{self, AlsaSink};
use super::extractor::SymphoniaExtractor;
use super::media_source::MediaSource;
use super::output_sink::{OutputSink, SampleFormat, SinkSpec};
use super::stream_decoder::StreamDecoder;
use super::symphonia_codec::SymphoniaDecoder;

/// What happens to a partially filled write buffer at natural end of stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfStreamPolicy {
    /// Write the remainder and drain the sink before releasing it.
    Flush,
    /// Drop the remainder.
    Discard,
}

/// Audio pipeline configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// ALSA playback device name (e.g. "default", "plughw:0,0")
    pub playback_device: String,
    /// Desired ALSA period size in frames (0 = let ALSA decide)
    pub playback_period_size: usize,
    /// Write buffer size as a multiple of the sink's minimum buffer size
    pub buffer_multiplier: usize,
    /// Rate the sink is opened at and the assumed source rate until the
    /// decoder reports its output format
    pub nominal_sample_rate: u32,
    /// Sink channel count
    pub channels: u16,
    /// Bound on each decoder dequeue
    pub dequeue_timeout: Duration,
    /// Decoder input slot count
    pub input_slots: usize,
    /// Decoder output slot count (grows on demand)
    pub output_slots: usize,
    pub end_of_stream: EndOfStreamPolicy,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            playback_device: "default".to_string(),
            playback_period_size: 1024,
            buffer_multiplier: 8,
            nominal_sample_rate: 44100,
            channels: 2,
            dequeue_timeout: Duration::from_micros(1000),
            input_slots: 4,
            output_slots: 4,
            end_of_stream: EndOfStreamPolicy::Flush,
        }
    }
}

impl AudioConfig {
    pub fn period_size(&self) -> Option<usize> {
        if self.playback_period_size > 0 {
            Some(self.playback_period_size)
        } else {
            None
        }
    }
}

/// Creates the collaborators of one playback session.
pub trait Backend: Send + Sync {
    fn open_source(&self, uri: &str) -> Result<Box<dyn MediaSource>>;

    fn create_decoder(&self, mime: &str) -> Result<Box<dyn StreamDecoder>>;

    /// Minimum sink buffer size in bytes for the given layout.
    fn min_buffer_size(&self, sample_rate: u32, channels: u16, format: SampleFormat) -> Result<usize>;

    fn open_sink(&self, spec: SinkSpec) -> Result<Box<dyn OutputSink>>;
}

/// Symphonia for demuxing and decoding, ALSA for output.
pub struct SystemBackend {
    config: AudioConfig,
}

impl SystemBackend {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }
}

impl Backend for SystemBackend {
    fn open_source(&self, uri: &str) -> Result<Box<dyn MediaSource>> {
        Ok(Box::new(SymphoniaExtractor::open(uri)?))
    }

    fn create_decoder(&self, mime: &str) -> Result<Box<dyn StreamDecoder>> {
        Ok(Box::new(SymphoniaDecoder::new(
            mime,
            self.config.input_slots,
            self.config.output_slots,
            self.config.channels,
        )))
    }

    fn min_buffer_size(&self, sample_rate: u32, channels: u16, format: SampleFormat) -> Result<usize> {
        match format {
            SampleFormat::S16Le => alsa_device::min_buffer_size(
                &self.config.playback_device,
                sample_rate,
                channels as u32,
                self.config.period_size(),
            ),
        }
    }

    fn open_sink(&self, spec: SinkSpec) -> Result<Box<dyn OutputSink>> {
        Ok(Box::new(AlsaSink::open(
            &self.config.playback_device,
            spec,
            self.config.period_size(),
        )?))
    }
}
