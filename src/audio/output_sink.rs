//! Output sink contract.

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    S16Le,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16Le => 2,
        }
    }
}

/// Parameters a sink is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSpec {
    /// Nominal rate of the PCM written to the sink.
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    /// Size in bytes of one blocking write.
    pub buffer_size: usize,
}

impl SinkSpec {
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }
}

/// Destination for interleaved PCM.
pub trait OutputSink: Send {
    fn play(&mut self) -> Result<()>;

    /// Blocks until `pcm` has been accepted or the device gave up on part of
    /// it. Returns the bytes accepted, which is `pcm.len()` unless frames
    /// were dropped.
    fn write(&mut self, pcm: &[u8]) -> Result<usize>;

    /// Rate, in Hz, at which the written PCM is played back. Changing it
    /// changes tempo and pitch together.
    fn set_playback_rate(&mut self, hz: u32) -> Result<()>;

    fn set_stereo_volume(&mut self, left: f32, right: f32) -> Result<()>;

    /// Blocks until queued audio has been played.
    fn drain(&mut self) -> Result<()>;

    /// Stops playback, discarding queued audio.
    fn stop(&mut self) -> Result<()>;

    fn release(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_s16_frame_is_four_bytes() {
        let spec = SinkSpec {
            sample_rate: 44100,
            channels: 2,
            format: SampleFormat::S16Le,
            buffer_size: 8192,
        };
        assert_eq!(spec.frame_bytes(), 4);
    }
}
