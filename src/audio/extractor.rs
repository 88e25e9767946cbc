//! Symphonia-backed [`MediaSource`] for local files and HTTP streams.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use symphonia::core::codecs::{self, CodecType};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::{MediaSource as SymphoniaMediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;
use url::Url;

use super::media_source::{MediaSource, TrackFormat};

/// Where a URI points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Http(Url),
    File(PathBuf),
}

impl Location {
    /// `http(s)://` and `file://` URIs are recognized; anything else is a path.
    pub fn parse(uri: &str) -> Result<Self> {
        match Url::parse(uri) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Location::Http(url)),
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(Location::File)
                .map_err(|_| anyhow::anyhow!("invalid file URI: {}", uri)),
            // Drive letters parse as one-letter schemes
            Ok(url) if url.scheme().len() > 1 => bail!("unsupported URI scheme: {}", url.scheme()),
            _ => Ok(Location::File(PathBuf::from(uri))),
        }
    }
}

/// Map a Symphonia codec to a MIME-style identifier.
pub fn codec_mime(codec: CodecType) -> String {
    let mime = match codec {
        codecs::CODEC_TYPE_NULL => "application/octet-stream",
        codecs::CODEC_TYPE_MP3 => "audio/mpeg",
        codecs::CODEC_TYPE_MP2 | codecs::CODEC_TYPE_MP1 => "audio/mpeg-L2",
        codecs::CODEC_TYPE_AAC => "audio/mp4a-latm",
        codecs::CODEC_TYPE_FLAC => "audio/flac",
        codecs::CODEC_TYPE_VORBIS => "audio/vorbis",
        codecs::CODEC_TYPE_OPUS => "audio/opus",
        codecs::CODEC_TYPE_ALAC => "audio/alac",
        codecs::CODEC_TYPE_PCM_S16LE
        | codecs::CODEC_TYPE_PCM_S16BE
        | codecs::CODEC_TYPE_PCM_S24LE
        | codecs::CODEC_TYPE_PCM_S32LE
        | codecs::CODEC_TYPE_PCM_F32LE
        | codecs::CODEC_TYPE_PCM_F64LE
        | codecs::CODEC_TYPE_PCM_U8
        | codecs::CODEC_TYPE_PCM_S8 => "audio/raw",
        codecs::CODEC_TYPE_PCM_ALAW => "audio/g711-alaw",
        codecs::CODEC_TYPE_PCM_MULAW => "audio/g711-mlaw",
        other => {
            return match symphonia::default::get_codecs().get_codec(other) {
                Some(descriptor) => format!("audio/x-{}", descriptor.short_name),
                None => "audio/x-unknown".to_string(),
            };
        }
    };
    mime.to_string()
}

/// Non-seekable HTTP body. Symphonia only asks for the current position.
struct HttpStream {
    response: Mutex<reqwest::blocking::Response>,
    position: u64,
    length: Option<u64>,
}

impl Read for HttpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.response.get_mut().read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for HttpStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.position),
            SeekFrom::Start(p) if p == self.position => Ok(self.position),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "HTTP stream is not seekable",
            )),
        }
    }
}

impl SymphoniaMediaSource for HttpStream {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        self.length
    }
}

fn hint_for_path(path: &Path, hint: &mut Hint) {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
}

fn open_media(location: &Location) -> Result<(Box<dyn SymphoniaMediaSource>, Hint)> {
    let mut hint = Hint::new();
    match location {
        Location::File(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open file: {}", path.display()))?;
            hint_for_path(path, &mut hint);
            Ok((Box::new(file), hint))
        }
        Location::Http(url) => {
            let response = reqwest::blocking::get(url.as_str())
                .with_context(|| format!("GET {}", url))?
                .error_for_status()
                .with_context(|| format!("GET {}", url))?;

            hint_for_path(Path::new(url.path()), &mut hint);
            if let Some(content_type) = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
            {
                let mime = content_type.split(';').next().unwrap_or("").trim();
                if !mime.is_empty() {
                    hint.mime_type(mime);
                }
            }

            let length = response.content_length();
            log::info!("Streaming {} (content-length: {:?})", url, length);
            Ok((
                Box::new(HttpStream {
                    response: Mutex::new(response),
                    position: 0,
                    length,
                }),
                hint,
            ))
        }
    }
}

struct SelectedTrack {
    id: u32,
    time_base: Option<TimeBase>,
    sample_rate: Option<u32>,
}

pub struct SymphoniaExtractor {
    reader: Option<Box<dyn FormatReader>>,
    tracks: Vec<(u32, TrackFormat)>,
    selected: Option<SelectedTrack>,
    current: Option<Packet>,
}

impl SymphoniaExtractor {
    /// Open `uri` and probe its container.
    pub fn open(uri: &str) -> Result<Self> {
        let location = Location::parse(uri)?;
        let (media, hint) = open_media(&location)?;
        let mss = MediaSourceStream::new(media, Default::default());

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("Failed to probe stream format")?;
        let reader = probed.format;

        let tracks = reader
            .tracks()
            .iter()
            .map(|track| {
                let params = &track.codec_params;
                let format = TrackFormat {
                    mime: codec_mime(params.codec),
                    sample_rate: params.sample_rate,
                    channels: params.channels.map(|c| c.count() as u16),
                    codec_params: Some(params.clone()),
                };
                (track.id, format)
            })
            .collect::<Vec<_>>();

        log::info!(
            "Opened {}: {} track(s) [{}]",
            uri,
            tracks.len(),
            tracks
                .iter()
                .map(|(_, f)| f.mime.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            reader: Some(reader),
            tracks,
            selected: None,
            current: None,
        })
    }

    fn next_packet(&mut self) -> Result<Option<Packet>> {
        let (Some(reader), Some(selected)) = (self.reader.as_mut(), self.selected.as_ref()) else {
            return Ok(None);
        };
        loop {
            match reader.next_packet() {
                Ok(packet) if packet.track_id() == selected.id => return Ok(Some(packet)),
                Ok(_) => continue,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    log::warn!("Track list changed mid-stream, treating as end of stream");
                    return Ok(None);
                }
                Err(e) => return Err(e).context("Failed to read packet"),
            }
        }
    }
}

impl MediaSource for SymphoniaExtractor {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Option<TrackFormat> {
        self.tracks.get(index).map(|(_, format)| format.clone())
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        let (id, format) = self
            .tracks
            .get(index)
            .with_context(|| format!("track {} does not exist", index))?;
        let params = format.codec_params.as_ref();
        self.selected = Some(SelectedTrack {
            id: *id,
            time_base: params.and_then(|p| p.time_base),
            sample_rate: format.sample_rate,
        });
        self.current = self.next_packet()?;
        Ok(())
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<Option<usize>> {
        let Some(packet) = self.current.as_ref() else {
            return Ok(None);
        };
        buf.clear();
        buf.extend_from_slice(packet.buf());
        Ok(Some(buf.len()))
    }

    fn sample_time_us(&self) -> Option<i64> {
        let packet = self.current.as_ref()?;
        let selected = self.selected.as_ref()?;
        if let Some(tb) = selected.time_base {
            let time = tb.calc_time(packet.ts());
            Some(time.seconds as i64 * 1_000_000 + (time.frac * 1_000_000.0) as i64)
        } else {
            let rate = selected.sample_rate.filter(|&r| r > 0)?;
            Some((packet.ts() as u128 * 1_000_000 / rate as u128) as i64)
        }
    }

    fn advance(&mut self) -> Result<bool> {
        self.current = self.next_packet()?;
        Ok(self.current.is_some())
    }

    fn release(&mut self) {
        self.current = None;
        self.selected = None;
        self.reader = None;
    }
}
