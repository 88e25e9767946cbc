//! ALSA playback device and the [`OutputSink`] built on it.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result, bail};

use super::output_sink::{OutputSink, SinkSpec};
use super::rate::{RateConverter, apply_gain, s16le_to_samples};

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

impl AlsaParams {
    /// Bytes in one period of interleaved S16LE.
    pub fn period_bytes(&self) -> usize {
        self.period_size * self.channels as usize * 2
    }
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, Direction::Playback, false)
        .with_context(|| format!("Failed to open PCM device '{}' for Playback", device))?;

    // Configure hardware parameters
    {
        let hwp =
            HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current()?;
        let rate = hwp.get_rate()?;
        let ch = hwp.get_channels()?;
        let ps = hwp.get_period_size()? as usize;
        (rate, ch, ps)
    };

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size,
    };

    log::info!(
        "ALSA Playback: device={}, rate={}, channels={}, period_size={}",
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((pcm, params))
}

/// Smallest useful write size in bytes for the device, i.e. one period.
pub fn min_buffer_size(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<usize> {
    let (_pcm, params) = open_playback(device, sample_rate, channels, period_size)?;
    Ok(params.period_bytes())
}

const MAX_RECOVERY_RETRIES: u32 = 3;

/// Input bytes accounted for when only `written` of `total` resampled frames
/// reached the device, rounded down to whole input frames.
fn accepted_input_bytes(input_len: usize, frame_bytes: usize, written: usize, total: usize) -> usize {
    if total == 0 || written >= total {
        return input_len;
    }
    let input_frames = input_len / frame_bytes;
    input_frames * written / total * frame_bytes
}

/// ALSA output running at the device rate. The playback rate is realized by
/// resampling the written PCM from the playback rate to the device rate.
pub struct AlsaSink {
    pcm: Option<PCM>,
    params: AlsaParams,
    spec: SinkSpec,
    converter: RateConverter,
    gain: (f32, f32),
    samples: Vec<i16>,
    converted: Vec<i16>,
}

impl AlsaSink {
    pub fn open(device: &str, spec: SinkSpec, period_size: Option<usize>) -> Result<Self> {
        let (pcm, params) =
            open_playback(device, spec.sample_rate, spec.channels as u32, period_size)?;
        if params.channels != spec.channels as u32 {
            bail!(
                "device '{}' negotiated {} channels, {} requested",
                device,
                params.channels,
                spec.channels
            );
        }
        let converter =
            RateConverter::new(spec.channels as usize, spec.sample_rate, params.sample_rate);
        Ok(Self {
            pcm: Some(pcm),
            params,
            spec,
            converter,
            gain: (1.0, 1.0),
            samples: Vec::with_capacity(spec.buffer_size / 2),
            converted: Vec::with_capacity(spec.buffer_size),
        })
    }

    fn pcm(&self) -> Result<&PCM> {
        self.pcm.as_ref().context("ALSA sink already released")
    }

    /// Write interleaved frames with retry loop to handle short writes and
    /// XRUN recovery. Returns `(written, total)` frames.
    fn write_frames(&self, data: &[i16]) -> Result<(usize, usize)> {
        let pcm = self.pcm()?;
        let io = pcm.io_i16()?;
        let channels = self.params.channels as usize;
        let total_frames = data.len() / channels;
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        while frames_written < total_frames {
            let offset = frames_written * channels;
            match io.writei(&data[offset..total_frames * channels]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    pcm.prepare().context("Failed to recover PCM playback")?;

                    if retry_count >= MAX_RECOVERY_RETRIES {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            total_frames - frames_written
                        );
                        break;
                    }
                }
            }
        }
        Ok((frames_written, total_frames))
    }
}

impl OutputSink for AlsaSink {
    fn play(&mut self) -> Result<()> {
        // Playback starts on the first write once the start threshold is met.
        self.pcm()?.prepare().context("Failed to prepare PCM")?;
        log::info!(
            "ALSA sink playing: nominal {} Hz → device {} Hz, buffer {} bytes",
            self.spec.sample_rate,
            self.params.sample_rate,
            self.spec.buffer_size
        );
        Ok(())
    }

    fn write(&mut self, pcm: &[u8]) -> Result<usize> {
        let mut samples = std::mem::take(&mut self.samples);
        let mut converted = std::mem::take(&mut self.converted);
        s16le_to_samples(pcm, &mut samples);
        converted.clear();
        self.converter.process(&samples, &mut converted);
        apply_gain(
            &mut converted,
            self.params.channels as usize,
            self.gain.0,
            self.gain.1,
        );
        let result = self.write_frames(&converted);
        self.samples = samples;
        self.converted = converted;
        result.map(|(written, total)| {
            accepted_input_bytes(pcm.len(), self.spec.frame_bytes(), written, total)
        })
    }

    fn set_playback_rate(&mut self, hz: u32) -> Result<()> {
        if hz == 0 {
            bail!("playback rate must be positive");
        }
        self.converter.set_input_rate(hz);
        log::debug!("ALSA sink playback rate {} Hz", hz);
        Ok(())
    }

    fn set_stereo_volume(&mut self, left: f32, right: f32) -> Result<()> {
        self.gain = (left.clamp(0.0, 1.0), right.clamp(0.0, 1.0));
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.pcm()?.drain().context("Failed to drain PCM")
    }

    fn stop(&mut self) -> Result<()> {
        self.converter.reset();
        self.pcm()?.drop().context("Failed to stop PCM")
    }

    fn release(&mut self) {
        if self.pcm.take().is_some() {
            log::info!("ALSA sink released");
        }
    }
}
