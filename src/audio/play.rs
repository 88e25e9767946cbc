//! The streaming playback loop.
//!
//! One [`PlaybackSession`] owns a source, a decoder and a sink for the whole
//! of a session. Each iteration feeds at most one encoded chunk, takes at most
//! one decoder outcome and copies at most one slice of PCM into the write
//! buffer. The buffer is written to the sink only when it is full, so every
//! write except an end-of-stream flush has the same size.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use super::audio_system::{AudioConfig, Backend, EndOfStreamPolicy};
use super::media_source::{MediaSource, TrackFormat};
use super::output_sink::{OutputSink, SampleFormat, SinkSpec};
use super::session::SessionState;
use super::stream_decoder::{OutputStatus, StreamDecoder};
use crate::error::PlayerError;

/// Controller requests applied between iterations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerCommand {
    SetSpeed(f32),
    SetVolume(f32),
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The decoder emitted its end-of-stream chunk and it was fully consumed.
    EndOfStream,
    /// The stop flag was observed.
    Stopped,
    /// The controller went away.
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Started { buffer_size: usize },
    FormatChanged { sample_rate: u32, channels: u16 },
    PlaybackRateChanged(u32),
    Finished(SessionEnd),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    EndOfStream,
}

/// Rate handed to the sink: the source rate scaled by the relative speed.
pub fn playback_rate(source_sample_rate: u32, relative_speed: f32) -> u32 {
    (source_sample_rate as f64 * relative_speed as f64).round() as u32
}

/// Decoded output slot being copied out.
#[derive(Debug, Clone, Copy)]
struct ActiveChunk {
    index: usize,
    position: usize,
    remaining: usize,
}

pub struct PlaybackSession {
    source: Box<dyn MediaSource>,
    decoder: Box<dyn StreamDecoder>,
    sink: Box<dyn OutputSink>,
    state: Arc<SessionState>,
    events: Option<UnboundedSender<PlayerEvent>>,
    timeout: Duration,
    end_of_stream_policy: EndOfStreamPolicy,
    channels: u16,
    write_buffer: Vec<u8>,
    write_offset: usize,
    active: Option<ActiveChunk>,
    input_done: bool,
    output_done: bool,
    source_sample_rate: u32,
    relative_speed: f32,
    output_slots: usize,
}

impl PlaybackSession {
    /// Opens the source, selects its first track, starts a decoder for it and
    /// opens the sink. Whatever was acquired is released again on failure.
    pub fn open(
        uri: &str,
        backend: &dyn Backend,
        config: &AudioConfig,
        state: Arc<SessionState>,
        events: Option<UnboundedSender<PlayerEvent>>,
    ) -> Result<Self, PlayerError> {
        let mut source = backend
            .open_source(uri)
            .map_err(|cause| PlayerError::SourceOpen {
                uri: uri.to_string(),
                cause,
            })?;

        let format = match first_audio_track(source.as_ref()) {
            Ok(format) => format,
            Err(e) => {
                source.release();
                return Err(e);
            }
        };
        log::info!(
            "Selected track 0: {} ({:?} Hz, {:?} channels)",
            format.mime,
            format.sample_rate,
            format.channels
        );

        if let Err(cause) = source.select_track(0) {
            source.release();
            return Err(PlayerError::SourceOpen {
                uri: uri.to_string(),
                cause,
            });
        }

        let mut decoder = match start_decoder(backend, &format) {
            Ok(decoder) => decoder,
            Err(e) => {
                source.release();
                return Err(PlayerError::Decoder(e));
            }
        };

        let output_slots = decoder.output_slot_count();
        let volume = state.volume();
        let (sink, buffer_size) = match start_sink(backend, config, volume) {
            Ok(opened) => opened,
            Err(e) => {
                decoder.stop();
                decoder.release();
                source.release();
                return Err(PlayerError::Sink(e));
            }
        };

        state.set_source_sample_rate(config.nominal_sample_rate);
        log::info!(
            "Playback session ready: buffer={} bytes, speed={}, volume={}",
            buffer_size,
            state.relative_speed(),
            volume
        );

        let session = Self {
            source,
            decoder,
            sink,
            relative_speed: state.relative_speed(),
            state,
            events,
            timeout: config.dequeue_timeout,
            end_of_stream_policy: config.end_of_stream,
            channels: config.channels,
            write_buffer: vec![0; buffer_size],
            write_offset: 0,
            active: None,
            input_done: false,
            output_done: false,
            source_sample_rate: config.nominal_sample_rate,
            output_slots,
        };
        session.emit(PlayerEvent::Started { buffer_size });
        Ok(session)
    }

    /// Runs until end of stream, a stop request, a lost controller or an
    /// error, then tears the session down.
    pub fn run(mut self, mut commands: UnboundedReceiver<PlayerCommand>) -> SessionEnd {
        let end = loop {
            if self.state.stop_requested() {
                break SessionEnd::Stopped;
            }
            if let Err(end) = self.apply_pending(&mut commands) {
                break end;
            }
            match self.step() {
                Ok(Step::Continue) => {}
                Ok(Step::EndOfStream) => break SessionEnd::EndOfStream,
                Err(e) => {
                    log::error!("Playback failed: {:#}", e);
                    break SessionEnd::Failed(format!("{:#}", e));
                }
            }
        };

        let events = self.events.clone();
        self.teardown(&end);
        if let Some(tx) = events {
            let _ = tx.send(PlayerEvent::Finished(end.clone()));
        }
        end
    }

    fn apply_pending(
        &mut self,
        commands: &mut UnboundedReceiver<PlayerCommand>,
    ) -> Result<(), SessionEnd> {
        loop {
            match commands.try_recv() {
                Ok(command) => self
                    .apply(command)
                    .map_err(|e| SessionEnd::Failed(format!("{:#}", e)))?,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    log::info!("Controller dropped, cancelling playback");
                    return Err(SessionEnd::Cancelled);
                }
            }
        }
    }

    pub fn apply(&mut self, command: PlayerCommand) -> Result<()> {
        match command {
            PlayerCommand::SetSpeed(speed) => {
                self.relative_speed = speed;
                self.apply_playback_rate()
            }
            PlayerCommand::SetVolume(volume) => {
                self.sink.set_stereo_volume(volume, volume)?;
                log::debug!("Volume set to {}", volume);
                Ok(())
            }
        }
    }

    fn apply_playback_rate(&mut self) -> Result<()> {
        let hz = playback_rate(self.source_sample_rate, self.relative_speed);
        self.sink.set_playback_rate(hz)?;
        log::info!(
            "Playback rate {} Hz (source {} Hz x {})",
            hz,
            self.source_sample_rate,
            self.relative_speed
        );
        self.emit(PlayerEvent::PlaybackRateChanged(hz));
        Ok(())
    }

    /// One iteration: feed, drain, copy, flush, release.
    pub fn step(&mut self) -> Result<Step> {
        self.feed()?;
        if self.active.is_none() {
            self.drain()?;
        }
        self.copy()?;

        if self.write_offset == self.write_buffer.len() {
            let written = self.sink.write(&self.write_buffer)?;
            if written < self.write_buffer.len() {
                log::warn!(
                    "Sink accepted {} of {} bytes",
                    written,
                    self.write_buffer.len()
                );
            }
            self.write_offset = 0;
        }

        if let Some(chunk) = self.active {
            if chunk.remaining == 0 {
                self.decoder.release_output_buffer(chunk.index)?;
                self.active = None;
            }
        }

        if self.output_done && self.active.is_none() {
            return Ok(Step::EndOfStream);
        }
        Ok(Step::Continue)
    }

    fn feed(&mut self) -> Result<()> {
        if self.input_done {
            return Ok(());
        }
        let Some(index) = self.decoder.dequeue_input_buffer(self.timeout)? else {
            return Ok(());
        };

        let buf = self.decoder.input_buffer(index)?;
        match self.source.read_sample(buf)? {
            Some(size) => {
                let pts = self.source.sample_time_us().unwrap_or(0);
                self.decoder.queue_input_buffer(index, size, pts, false)?;
                self.source.advance()?;
            }
            None => {
                log::debug!("Source exhausted, queueing end of stream");
                self.decoder.queue_input_buffer(index, 0, 0, true)?;
                self.input_done = true;
            }
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        match self.decoder.dequeue_output_buffer(self.timeout)? {
            OutputStatus::TryAgainLater => {}
            OutputStatus::BuffersChanged => {
                self.output_slots = self.decoder.output_slot_count();
                log::debug!("Decoder output slots changed: {}", self.output_slots);
            }
            OutputStatus::FormatChanged => {
                let format = self
                    .decoder
                    .output_format()
                    .context("decoder reported a format change without a format")?;
                if format.channels != self.channels {
                    bail!(
                        "decoder produces {} channels, sink expects {}",
                        format.channels,
                        self.channels
                    );
                }
                log::info!(
                    "Decoder output format: {} Hz, {} channels",
                    format.sample_rate,
                    format.channels
                );
                self.source_sample_rate = format.sample_rate;
                self.state.set_source_sample_rate(format.sample_rate);
                self.emit(PlayerEvent::FormatChanged {
                    sample_rate: format.sample_rate,
                    channels: format.channels,
                });
                self.apply_playback_rate()?;
            }
            OutputStatus::Buffer { index, info } => {
                if index >= self.output_slots {
                    bail!(
                        "decoder returned output slot {} of an announced {}",
                        index,
                        self.output_slots
                    );
                }
                if info.end_of_stream {
                    log::debug!("Decoder reached end of stream");
                    self.output_done = true;
                }
                self.active = Some(ActiveChunk {
                    index,
                    position: 0,
                    remaining: info.size,
                });
            }
        }
        Ok(())
    }

    /// Copies as much of the active chunk as fits in the write buffer.
    fn copy(&mut self) -> Result<usize> {
        let Some(chunk) = self.active.as_mut() else {
            return Ok(0);
        };
        let space = self.write_buffer.len() - self.write_offset;
        let n = chunk.remaining.min(space);
        if n == 0 {
            return Ok(0);
        }

        let data = self.decoder.output_buffer(chunk.index)?;
        let src = data
            .get(chunk.position..chunk.position + n)
            .context("decoder output slot shorter than reported")?;
        self.write_buffer[self.write_offset..self.write_offset + n].copy_from_slice(src);
        self.write_offset += n;
        chunk.position += n;
        chunk.remaining -= n;
        Ok(n)
    }

    fn teardown(mut self, end: &SessionEnd) {
        if *end == SessionEnd::EndOfStream {
            if self.end_of_stream_policy == EndOfStreamPolicy::Flush && self.write_offset > 0 {
                if let Err(e) = self.sink.write(&self.write_buffer[..self.write_offset]) {
                    log::warn!("Failed to flush final {} bytes: {:#}", self.write_offset, e);
                }
            }
            if let Err(e) = self.sink.drain() {
                log::warn!("Failed to drain sink: {:#}", e);
            }
        }
        self.write_offset = 0;

        self.decoder.stop();
        self.decoder.release();
        self.source.release();
        if let Err(e) = self.sink.stop() {
            log::warn!("Failed to stop sink: {:#}", e);
        }
        self.sink.release();

        self.state.set_playing(false);
        self.state.clear_stop();
        log::info!("Playback session ended: {:?}", end);
    }

    fn emit(&self, event: PlayerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

fn first_audio_track(source: &dyn MediaSource) -> Result<TrackFormat, PlayerError> {
    if source.track_count() == 0 {
        return Err(PlayerError::UnsupportedTrack("source has no tracks".into()));
    }
    let format = source
        .track_format(0)
        .ok_or_else(|| PlayerError::UnsupportedTrack("track 0 has no format".into()))?;
    if !format.is_audio() {
        return Err(PlayerError::UnsupportedTrack(format!(
            "track 0 is {}, not audio",
            format.mime
        )));
    }
    Ok(format)
}

fn start_decoder(backend: &dyn Backend, format: &TrackFormat) -> Result<Box<dyn StreamDecoder>> {
    let mut decoder = backend.create_decoder(&format.mime)?;
    let started = decoder.configure(format).and_then(|_| decoder.start());
    if let Err(e) = started {
        decoder.release();
        return Err(e);
    }
    Ok(decoder)
}

fn start_sink(
    backend: &dyn Backend,
    config: &AudioConfig,
    volume: f32,
) -> Result<(Box<dyn OutputSink>, usize)> {
    let min = backend.min_buffer_size(
        config.nominal_sample_rate,
        config.channels,
        SampleFormat::S16Le,
    )?;
    if min == 0 {
        bail!("sink reported a zero minimum buffer size");
    }
    let buffer_size = min * config.buffer_multiplier.max(1);
    let spec = SinkSpec {
        sample_rate: config.nominal_sample_rate,
        channels: config.channels,
        format: SampleFormat::S16Le,
        buffer_size,
    };
    if buffer_size % spec.frame_bytes() != 0 {
        bail!(
            "buffer of {} bytes is not a whole number of {}-byte frames",
            buffer_size,
            spec.frame_bytes()
        );
    }

    let mut sink = backend.open_sink(spec)?;
    let ready = sink
        .set_stereo_volume(volume, volume)
        .and_then(|_| sink.play());
    if let Err(e) = ready {
        sink.release();
        return Err(e);
    }
    Ok((sink, buffer_size))
}
