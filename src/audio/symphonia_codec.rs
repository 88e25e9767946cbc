//! Slot decoder backed by Symphonia codecs.
//!
//! Decoding is synchronous: a queued input chunk is decoded when output is
//! requested, so the timeouts of the slot contract never cause a wait.
//! Output is interleaved S16LE at the stream rate, converted to the
//! configured channel count.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;

use super::media_source::TrackFormat;
use super::stream_decoder::{BufferInfo, OutputFormat, OutputStatus, StreamDecoder};

#[derive(Debug, Default)]
struct Slot {
    data: Vec<u8>,
    busy: bool,
}

#[derive(Debug)]
struct QueuedInput {
    index: usize,
    presentation_time_us: i64,
    end_of_stream: bool,
}

pub struct SymphoniaDecoder {
    mime: String,
    output_channels: u16,
    decoder: Option<Box<dyn Decoder>>,
    started: bool,
    input_slots: Vec<Slot>,
    output_slots: Vec<Slot>,
    queued: VecDeque<QueuedInput>,
    ready: VecDeque<(usize, BufferInfo)>,
    format: Option<OutputFormat>,
    format_changed: bool,
    buffers_changed: bool,
}

impl SymphoniaDecoder {
    /// Create a decoder for `mime` with the given slot counts.
    ///
    /// * `output_channels` - channel count of the produced PCM (2 for a stereo sink)
    pub fn new(mime: &str, input_slots: usize, output_slots: usize, output_channels: u16) -> Self {
        Self {
            mime: mime.to_string(),
            output_channels: output_channels.max(1),
            decoder: None,
            started: false,
            input_slots: (0..input_slots.max(1)).map(|_| Slot::default()).collect(),
            output_slots: (0..output_slots.max(1)).map(|_| Slot::default()).collect(),
            queued: VecDeque::new(),
            ready: VecDeque::new(),
            format: None,
            format_changed: false,
            buffers_changed: false,
        }
    }

    /// Decode one queued input into an output slot, or drop it on a
    /// recoverable decode error.
    fn decode_queued(&mut self, input: QueuedInput) -> Result<()> {
        let QueuedInput {
            index,
            presentation_time_us,
            end_of_stream,
        } = input;

        let pcm = if self.input_slots[index].data.is_empty() {
            None
        } else {
            self.decode_packet(index, presentation_time_us)?
        };

        self.input_slots[index].data.clear();
        self.input_slots[index].busy = false;

        match pcm {
            Some((format, bytes)) => {
                if self.format != Some(format) {
                    log::info!(
                        "Decoder output format: {} Hz, {} ch ({})",
                        format.sample_rate,
                        format.channels,
                        self.mime
                    );
                    self.format = Some(format);
                    self.format_changed = true;
                }
                self.push_ready(bytes, presentation_time_us, end_of_stream);
            }
            None if end_of_stream => {
                self.push_ready(Vec::new(), presentation_time_us, true);
            }
            None => {}
        }
        Ok(())
    }

    fn decode_packet(
        &mut self,
        index: usize,
        presentation_time_us: i64,
    ) -> Result<Option<(OutputFormat, Vec<u8>)>> {
        let decoder = self.decoder.as_mut().context("decoder is not configured")?;
        let ts = presentation_time_us.max(0) as u64;
        let packet = Packet::new_from_slice(0, ts, 0, &self.input_slots[index].data);

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Decode error (skipping chunk): {}", e);
                return Ok(None);
            }
            Err(SymphoniaError::ResetRequired) => {
                log::warn!("Decoder reset required, dropping chunk");
                decoder.reset();
                return Ok(None);
            }
            Err(e) => return Err(e).context("decode failed"),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            return Ok(None);
        }

        let mut samples = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
        samples.copy_interleaved_ref(decoded);

        let input_channels = spec.channels.count().max(1) as u16;
        let converted = convert_channels(samples.samples(), input_channels, self.output_channels);
        let bytes = converted.iter().flat_map(|s| s.to_le_bytes()).collect();

        let format = OutputFormat {
            sample_rate: spec.rate,
            channels: self.output_channels,
        };
        Ok(Some((format, bytes)))
    }

    fn push_ready(&mut self, bytes: Vec<u8>, presentation_time_us: i64, end_of_stream: bool) {
        let index = match self.output_slots.iter().position(|s| !s.busy) {
            Some(index) => index,
            None => {
                // Every slot is held by the consumer or already queued.
                self.output_slots.push(Slot::default());
                self.buffers_changed = true;
                log::debug!("Output slot table grown to {}", self.output_slots.len());
                self.output_slots.len() - 1
            }
        };

        let slot = &mut self.output_slots[index];
        slot.busy = true;
        slot.data = bytes;
        let info = BufferInfo {
            size: slot.data.len(),
            presentation_time_us,
            end_of_stream,
        };
        self.ready.push_back((index, info));
    }
}

impl StreamDecoder for SymphoniaDecoder {
    fn configure(&mut self, format: &TrackFormat) -> Result<()> {
        let params = format
            .codec_params
            .as_ref()
            .with_context(|| format!("track {} has no codec parameters", format.mime))?;
        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .with_context(|| format!("Failed to create decoder for {}", format.mime))?;
        self.decoder = Some(decoder);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.decoder.is_none() {
            bail!("decoder for {} started before configure", self.mime);
        }
        self.started = true;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> Result<Option<usize>> {
        if !self.started {
            bail!("decoder is not started");
        }
        let index = self.input_slots.iter().position(|s| !s.busy);
        if let Some(index) = index {
            let slot = &mut self.input_slots[index];
            slot.busy = true;
            slot.data.clear();
        }
        Ok(index)
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut Vec<u8>> {
        match self.input_slots.get_mut(index) {
            Some(slot) if slot.busy => Ok(&mut slot.data),
            _ => bail!("input slot {} is not dequeued", index),
        }
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        end_of_stream: bool,
    ) -> Result<()> {
        let slot = match self.input_slots.get_mut(index) {
            Some(slot) if slot.busy => slot,
            _ => bail!("input slot {} is not dequeued", index),
        };
        if size > slot.data.len() {
            bail!("input size {} exceeds slot contents {}", size, slot.data.len());
        }
        slot.data.truncate(size);
        self.queued.push_back(QueuedInput {
            index,
            presentation_time_us,
            end_of_stream,
        });
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<OutputStatus> {
        if !self.started {
            bail!("decoder is not started");
        }
        loop {
            if self.buffers_changed {
                self.buffers_changed = false;
                return Ok(OutputStatus::BuffersChanged);
            }
            if self.format_changed {
                self.format_changed = false;
                return Ok(OutputStatus::FormatChanged);
            }
            if let Some((index, info)) = self.ready.pop_front() {
                return Ok(OutputStatus::Buffer { index, info });
            }
            match self.queued.pop_front() {
                Some(input) => self.decode_queued(input)?,
                None => return Ok(OutputStatus::TryAgainLater),
            }
        }
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8]> {
        match self.output_slots.get(index) {
            Some(slot) if slot.busy => Ok(&slot.data),
            _ => bail!("output slot {} is not held", index),
        }
    }

    fn output_slot_count(&self) -> usize {
        self.output_slots.len()
    }

    fn output_format(&self) -> Option<OutputFormat> {
        self.format
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<()> {
        match self.output_slots.get_mut(index) {
            Some(slot) => {
                slot.data.clear();
                slot.busy = false;
                Ok(())
            }
            None => bail!("output slot {} does not exist", index),
        }
    }

    fn stop(&mut self) {
        self.started = false;
        self.queued.clear();
        self.ready.clear();
        for slot in self.input_slots.iter_mut().chain(self.output_slots.iter_mut()) {
            slot.data.clear();
            slot.busy = false;
        }
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.reset();
        }
    }

    fn release(&mut self) {
        self.decoder = None;
        self.input_slots.clear();
        self.output_slots.clear();
    }
}

/// Convert interleaved samples from `input_channels` to `output_channels`.
pub fn convert_channels(samples: &[i16], input_channels: u16, output_channels: u16) -> Vec<i16> {
    let in_ch = input_channels.max(1) as usize;
    let out_ch = output_channels.max(1) as usize;
    let frames = samples.len() / in_ch;

    if in_ch == out_ch {
        samples[..frames * in_ch].to_vec()
    } else if out_ch == 1 {
        // Multi-channel → mono: average all channels
        samples
            .chunks_exact(in_ch)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / in_ch as i32) as i16
            })
            .collect()
    } else if in_ch > out_ch {
        // Fold extra channels onto the output channels they wrap to
        let mut out = Vec::with_capacity(frames * out_ch);
        for frame in samples.chunks_exact(in_ch) {
            for c in 0..out_ch {
                let (sum, count) = frame
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| i % out_ch == c)
                    .fold((0i32, 0i32), |(sum, n), (_, &s)| (sum + s as i32, n + 1));
                out.push((sum / count.max(1)) as i16);
            }
        }
        out
    } else {
        // Upmix (e.g. mono → stereo: duplicate)
        let mut out = Vec::with_capacity(frames * out_ch);
        for frame in samples.chunks_exact(in_ch) {
            for c in 0..out_ch {
                out.push(frame[c % in_ch]);
            }
        }
        out
    }
}
