//! Deterministic fakes for the playback collaborators. Every call lands in a
//! shared [`CallLog`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use parking_lot::Mutex;

use super::audio_system::Backend;
use super::media_source::{MediaSource, TrackFormat};
use super::output_sink::{OutputSink, SampleFormat, SinkSpec};
use super::stream_decoder::{BufferInfo, OutputFormat, OutputStatus, StreamDecoder};

#[derive(Debug, Default)]
pub struct CallLog {
    pub sources_opened: usize,
    pub source_released: usize,
    pub decoders_created: usize,
    pub decoder_started: usize,
    pub decoder_stopped: usize,
    pub decoder_released: usize,
    pub inputs_queued: usize,
    pub outputs_released: usize,
    pub sinks_opened: usize,
    pub sink_spec: Option<SinkSpec>,
    pub sink_played: usize,
    pub sink_writes: Vec<usize>,
    pub sink_bytes: Vec<u8>,
    pub rates: Vec<u32>,
    pub volumes: Vec<(f32, f32)>,
    pub sink_drained: usize,
    pub sink_stopped: usize,
    pub sink_released: usize,
}

pub type SharedLog = Arc<Mutex<CallLog>>;

fn chunk_bytes(chunk: usize, size: usize) -> Vec<u8> {
    (0..size).map(|i| ((chunk * 31 + i) % 251) as u8).collect()
}

/// The bytes a [`FakeSource`] yields, concatenated.
pub fn source_bytes(chunk_count: usize, chunk_size: usize) -> Vec<u8> {
    (0..chunk_count)
        .flat_map(|c| chunk_bytes(c, chunk_size))
        .collect()
}

pub struct FakeSource {
    log: SharedLog,
    tracks: Vec<TrackFormat>,
    chunk_size: usize,
    remaining: usize,
    produced: usize,
    selected: bool,
}

impl MediaSource for FakeSource {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Option<TrackFormat> {
        self.tracks.get(index).cloned()
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        if index >= self.tracks.len() {
            bail!("no track {}", index);
        }
        self.selected = true;
        Ok(())
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<Option<usize>> {
        if !self.selected || self.remaining == 0 {
            return Ok(None);
        }
        *buf = chunk_bytes(self.produced, self.chunk_size);
        Ok(Some(buf.len()))
    }

    fn sample_time_us(&self) -> Option<i64> {
        Some(self.produced as i64 * 1000)
    }

    fn advance(&mut self) -> Result<bool> {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.produced += 1;
        }
        Ok(self.remaining > 0)
    }

    fn release(&mut self) {
        self.log.lock().source_released += 1;
    }
}

#[derive(Default)]
struct FakeSlot {
    data: Vec<u8>,
    busy: bool,
}

/// Passes encoded bytes through unchanged. Reports `format` once the first
/// input is queued.
pub struct FakeDecoder {
    log: SharedLog,
    format: Option<OutputFormat>,
    format_reported: bool,
    buffers_changed_first: bool,
    unannounced_slot: bool,
    fail_after_outputs: Option<usize>,
    outputs: usize,
    inputs: Vec<FakeSlot>,
    output_slots: Vec<FakeSlot>,
    pending: VecDeque<(usize, i64, bool)>,
}

impl StreamDecoder for FakeDecoder {
    fn configure(&mut self, _format: &TrackFormat) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.log.lock().decoder_started += 1;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> Result<Option<usize>> {
        let index = self.inputs.iter().position(|s| !s.busy);
        if let Some(index) = index {
            self.inputs[index].busy = true;
        }
        Ok(index)
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut Vec<u8>> {
        Ok(&mut self.inputs[index].data)
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        end_of_stream: bool,
    ) -> Result<()> {
        self.inputs[index].data.truncate(size);
        self.pending.push_back((index, presentation_time_us, end_of_stream));
        self.log.lock().inputs_queued += 1;
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<OutputStatus> {
        if self.buffers_changed_first {
            self.buffers_changed_first = false;
            self.output_slots.push(FakeSlot::default());
            return Ok(OutputStatus::BuffersChanged);
        }
        if self.pending.is_empty() {
            return Ok(OutputStatus::TryAgainLater);
        }
        if self.format.is_some() && !self.format_reported {
            self.format_reported = true;
            return Ok(OutputStatus::FormatChanged);
        }
        if let Some(limit) = self.fail_after_outputs {
            if self.outputs >= limit {
                bail!("fake decoder failure");
            }
        }
        let free = if self.unannounced_slot {
            self.unannounced_slot = false;
            self.output_slots.push(FakeSlot::default());
            Some(self.output_slots.len() - 1)
        } else {
            self.output_slots.iter().position(|s| !s.busy)
        };
        let Some(out) = free else {
            return Ok(OutputStatus::TryAgainLater);
        };
        let Some((input, pts, end_of_stream)) = self.pending.pop_front() else {
            return Ok(OutputStatus::TryAgainLater);
        };

        let data = std::mem::take(&mut self.inputs[input].data);
        self.inputs[input].busy = false;
        let size = data.len();
        self.output_slots[out] = FakeSlot { data, busy: true };
        self.outputs += 1;
        Ok(OutputStatus::Buffer {
            index: out,
            info: BufferInfo {
                size,
                presentation_time_us: pts,
                end_of_stream,
            },
        })
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8]> {
        Ok(&self.output_slots[index].data)
    }

    fn output_slot_count(&self) -> usize {
        self.output_slots.len()
    }

    fn output_format(&self) -> Option<OutputFormat> {
        if self.format_reported { self.format } else { None }
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<()> {
        let slot = &mut self.output_slots[index];
        slot.data.clear();
        slot.busy = false;
        self.log.lock().outputs_released += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().decoder_stopped += 1;
    }

    fn release(&mut self) {
        self.log.lock().decoder_released += 1;
    }
}

pub struct FakeSink {
    log: SharedLog,
    write_delay: Option<Duration>,
    short_writes: bool,
}

impl OutputSink for FakeSink {
    fn play(&mut self) -> Result<()> {
        self.log.lock().sink_played += 1;
        Ok(())
    }

    fn write(&mut self, pcm: &[u8]) -> Result<usize> {
        {
            let mut log = self.log.lock();
            log.sink_writes.push(pcm.len());
            log.sink_bytes.extend_from_slice(pcm);
        }
        if let Some(delay) = self.write_delay {
            std::thread::sleep(delay);
        }
        if self.short_writes {
            return Ok(pcm.len() / 2);
        }
        Ok(pcm.len())
    }

    fn set_playback_rate(&mut self, hz: u32) -> Result<()> {
        self.log.lock().rates.push(hz);
        Ok(())
    }

    fn set_stereo_volume(&mut self, left: f32, right: f32) -> Result<()> {
        self.log.lock().volumes.push((left, right));
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.log.lock().sink_drained += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.log.lock().sink_stopped += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.log.lock().sink_released += 1;
    }
}

/// Builds fakes that share one log.
#[derive(Clone)]
pub struct FakeBackend {
    pub log: SharedLog,
    pub tracks: Vec<TrackFormat>,
    pub chunk_count: usize,
    pub chunk_size: usize,
    pub decoder_rate: Option<u32>,
    pub buffers_changed_first: bool,
    pub fail_after_outputs: Option<usize>,
    pub fail_open: bool,
    pub min_buffer: usize,
    pub write_delay: Option<Duration>,
    pub open_sink_delay: Option<Duration>,
    /// Sink reports only half of every write as accepted.
    pub short_writes: bool,
    /// Decoder hands out an output slot it never announced.
    pub unannounced_slot: bool,
}

impl FakeBackend {
    /// One stereo audio track of `chunk_count` chunks, decoded at 48 kHz.
    /// The sink's minimum buffer is 1024 bytes.
    pub fn audio(chunk_count: usize, chunk_size: usize) -> Self {
        Self {
            log: SharedLog::default(),
            tracks: vec![
                TrackFormat::new("audio/mpeg")
                    .with_sample_rate(48000)
                    .with_channels(2),
            ],
            chunk_count,
            chunk_size,
            decoder_rate: Some(48000),
            buffers_changed_first: false,
            fail_after_outputs: None,
            fail_open: false,
            min_buffer: 1024,
            write_delay: None,
            open_sink_delay: None,
            short_writes: false,
            unannounced_slot: false,
        }
    }
}

impl Backend for FakeBackend {
    fn open_source(&self, uri: &str) -> Result<Box<dyn MediaSource>> {
        if self.fail_open {
            bail!("connection refused: {}", uri);
        }
        self.log.lock().sources_opened += 1;
        Ok(Box::new(FakeSource {
            log: self.log.clone(),
            tracks: self.tracks.clone(),
            chunk_size: self.chunk_size,
            remaining: self.chunk_count,
            produced: 0,
            selected: false,
        }))
    }

    fn create_decoder(&self, _mime: &str) -> Result<Box<dyn StreamDecoder>> {
        self.log.lock().decoders_created += 1;
        Ok(Box::new(FakeDecoder {
            log: self.log.clone(),
            format: self.decoder_rate.map(|sample_rate| OutputFormat {
                sample_rate,
                channels: 2,
            }),
            format_reported: false,
            buffers_changed_first: self.buffers_changed_first,
            unannounced_slot: self.unannounced_slot,
            fail_after_outputs: self.fail_after_outputs,
            outputs: 0,
            inputs: (0..2).map(|_| FakeSlot::default()).collect(),
            output_slots: (0..2).map(|_| FakeSlot::default()).collect(),
            pending: VecDeque::new(),
        }))
    }

    fn min_buffer_size(&self, _sample_rate: u32, _channels: u16, _format: SampleFormat) -> Result<usize> {
        Ok(self.min_buffer)
    }

    fn open_sink(&self, spec: SinkSpec) -> Result<Box<dyn OutputSink>> {
        if let Some(delay) = self.open_sink_delay {
            std::thread::sleep(delay);
        }
        {
            let mut log = self.log.lock();
            log.sinks_opened += 1;
            log.sink_spec = Some(spec);
        }
        Ok(Box::new(FakeSink {
            log: self.log.clone(),
            write_delay: self.write_delay,
            short_writes: self.short_writes,
        }))
    }
}
