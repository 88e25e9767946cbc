//! Source contract: a stream of encoded audio with per-track metadata.

use anyhow::Result;
use symphonia::core::codecs::CodecParameters;

/// Metadata of one track in a [`MediaSource`].
#[derive(Debug, Clone)]
pub struct TrackFormat {
    /// MIME-style codec identifier, e.g. `audio/mpeg`.
    pub mime: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    /// Codec parameters handed to the decoder on `configure`, if the
    /// source knows them.
    pub codec_params: Option<CodecParameters>,
}

impl TrackFormat {
    pub fn new(mime: impl Into<String>) -> Self {
        Self {
            mime: mime.into(),
            sample_rate: None,
            channels: None,
            codec_params: None,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn is_audio(&self) -> bool {
        self.mime.starts_with("audio")
    }
}

/// Pull-based reader of encoded samples.
///
/// Reading follows a cursor: [`read_sample`](MediaSource::read_sample) copies
/// the sample under the cursor without moving it, [`advance`](MediaSource::advance)
/// moves to the next one.
pub trait MediaSource: Send {
    fn track_count(&self) -> usize;

    fn track_format(&self, index: usize) -> Option<TrackFormat>;

    /// Restricts reading to `index` and positions the cursor on its first sample.
    fn select_track(&mut self, index: usize) -> Result<()>;

    /// Replaces the contents of `buf` with the current sample.
    ///
    /// Returns `Ok(None)` once the selected track has no more data.
    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<Option<usize>>;

    /// Presentation time of the current sample in microseconds.
    fn sample_time_us(&self) -> Option<i64>;

    /// Moves the cursor to the next sample. Returns `false` at end of data.
    fn advance(&mut self) -> Result<bool>;

    fn release(&mut self);
}
