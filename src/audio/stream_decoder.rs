//! Slot-based decoder contract.
//!
//! Encoded chunks go in through indexed input slots, PCM comes out through
//! indexed output slots. Control outcomes (slot table changed, format changed,
//! nothing ready) are reported in place of an output slot.

use std::time::Duration;

use anyhow::Result;

use super::media_source::TrackFormat;

/// Description of a decoded chunk held in an output slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub size: usize,
    pub presentation_time_us: i64,
    pub end_of_stream: bool,
}

/// PCM layout the decoder currently produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    /// The output slot table was resized; previously cached slot counts are stale.
    BuffersChanged,
    /// [`StreamDecoder::output_format`] has a new value.
    FormatChanged,
    /// Nothing is ready yet.
    TryAgainLater,
    Buffer { index: usize, info: BufferInfo },
}

/// A decoder that converts encoded chunks into interleaved S16LE PCM.
pub trait StreamDecoder: Send {
    fn configure(&mut self, format: &TrackFormat) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Claims a free input slot, waiting at most `timeout`.
    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>>;

    fn input_buffer(&mut self, index: usize) -> Result<&mut Vec<u8>>;

    /// Hands a filled input slot to the decoder. An `end_of_stream` submission
    /// is normally empty.
    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        end_of_stream: bool,
    ) -> Result<()>;

    /// Waits at most `timeout` for decoded output or a control outcome.
    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<OutputStatus>;

    fn output_buffer(&self, index: usize) -> Result<&[u8]>;

    fn output_slot_count(&self) -> usize;

    fn output_format(&self) -> Option<OutputFormat>;

    /// Clears an output slot and returns it to the decoder.
    fn release_output_buffer(&mut self, index: usize) -> Result<()>;

    fn stop(&mut self);

    fn release(&mut self);
}
