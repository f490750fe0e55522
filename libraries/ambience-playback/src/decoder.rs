/// File loader using Symphonia
use crate::error::LoadError;
use crate::source::{AudioSource, MediaLoader, PcmSource};
use ambience_core::AudioTrack;
use async_trait::async_trait;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Resampler chunk size in frames
const RESAMPLE_CHUNK: usize = 1024;

/// Loads local files and `file://` URIs
///
/// Supports: MP3, FLAC, OGG, WAV, AAC, OPUS
///
/// Tracks are decoded fully into memory on the blocking pool, downmixed to
/// stereo and resampled to the engine rate. Remote URIs are rejected; a
/// fetching loader has to be layered in front for those.
#[derive(Debug, Clone)]
pub struct SymphoniaLoader {
    sample_rate: u32,
}

impl SymphoniaLoader {
    /// Create a loader producing audio at `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Map a source locator to a local path
    pub fn resolve_path(uri: &str) -> Result<PathBuf, LoadError> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Err(LoadError::Unsupported(format!(
                "remote source {} needs a fetching loader",
                uri
            )));
        }

        let path = PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri));
        if !path.exists() {
            return Err(LoadError::NotFound(path.display().to_string()));
        }
        Ok(path)
    }

    /// Decode a whole file into an in-memory source
    pub fn decode_file(path: &Path, target_rate: u32) -> Result<PcmSource, LoadError> {
        let file = std::fs::File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::NotFound(path.display().to_string()),
            _ => LoadError::Decode(format!("{}: {}", path.display(), e)),
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| LoadError::Unsupported(format!("Failed to probe file: {}", e)))?;

        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| LoadError::Unsupported("No audio tracks found".to_string()))?;

        let source_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let track_id = track.id;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| LoadError::Unsupported(format!("Failed to create decoder: {}", e)))?;

        let mut samples = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(e) => return Err(LoadError::Decode(format!("Error reading packet: {}", e))),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(msg)) => {
                    // Corrupt packet, keep going
                    warn!(path = %path.display(), "Skipping undecodable packet: {}", msg);
                    continue;
                }
                Err(e) => return Err(LoadError::Decode(format!("Decode error: {}", e))),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            let buf = sample_buf.get_or_insert_with(|| {
                SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
            });
            if buf.capacity() < decoded.capacity() * channels {
                *buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            }
            buf.copy_interleaved_ref(decoded);
            downmix_to_stereo(buf.samples(), channels, &mut samples);
        }

        if samples.is_empty() {
            return Err(LoadError::Decode(format!(
                "{} contains no audio",
                path.display()
            )));
        }

        let samples = resample(samples, source_rate, target_rate)?;
        debug!(
            path = %path.display(),
            source_rate,
            target_rate,
            frames = samples.len() / 2,
            "Decoded track"
        );

        Ok(PcmSource::new(samples, target_rate))
    }
}

#[async_trait]
impl MediaLoader for SymphoniaLoader {
    async fn load(&self, track: &AudioTrack) -> Result<Box<dyn AudioSource>, LoadError> {
        let path = Self::resolve_path(&track.source_uri)?;
        let rate = self.sample_rate;

        let source = tokio::task::spawn_blocking(move || Self::decode_file(&path, rate))
            .await
            .map_err(|e| LoadError::Decode(format!("Decoder task failed: {}", e)))??;

        Ok(Box::new(source))
    }
}

/// Append interleaved stereo for interleaved `channels`-channel input
///
/// Uses ITU-R BS.775-1 style coefficients: center and surround channels
/// are mixed into both sides at -3dB.
fn downmix_to_stereo(input: &[f32], channels: usize, output: &mut Vec<f32>) {
    const CENTER_MIX: f32 = 0.707;

    match channels {
        0 => {}
        1 => {
            for &s in input {
                output.push(s);
                output.push(s);
            }
        }
        2 => output.extend_from_slice(input),
        _ => {
            for frame in input.chunks_exact(channels) {
                let mut left = frame[0];
                let mut right = frame[1];
                match channels {
                    // L, R, C
                    3 => {
                        left += frame[2] * CENTER_MIX;
                        right += frame[2] * CENTER_MIX;
                    }
                    // L, R, SL, SR
                    4 => {
                        left += frame[2] * CENTER_MIX;
                        right += frame[3] * CENTER_MIX;
                    }
                    // L, R, C, SL, SR
                    5 => {
                        let c = frame[2] * CENTER_MIX;
                        left += c + frame[3] * CENTER_MIX;
                        right += c + frame[4] * CENTER_MIX;
                    }
                    // L, R, C, LFE, SL, SR, ...
                    _ => {
                        let c = (frame[2] + frame[3]) * CENTER_MIX;
                        left += c + frame[4] * CENTER_MIX;
                        right += c + frame[5] * CENTER_MIX;
                    }
                }
                output.push(left.clamp(-1.0, 1.0));
                output.push(right.clamp(-1.0, 1.0));
            }
        }
    }
}

/// Resample interleaved stereo from `from` Hz to `to` Hz
fn resample(samples: Vec<f32>, from: u32, to: u32) -> Result<Vec<f32>, LoadError> {
    if from == to || samples.is_empty() {
        return Ok(samples);
    }

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris,
    };
    let ratio = f64::from(to) / f64::from(from);
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, 2)
        .map_err(|e| LoadError::Decode(format!("Resampler creation failed: {}", e)))?;

    let frames = samples.len() / 2;
    let (left, right): (Vec<f32>, Vec<f32>) = samples
        .chunks_exact(2)
        .map(|frame| (frame[0], frame[1]))
        .unzip();

    let mut out_left = Vec::with_capacity((frames as f64 * ratio) as usize + RESAMPLE_CHUNK);
    let mut out_right = Vec::with_capacity(out_left.capacity());

    let mut pos = 0;
    while pos + resampler.input_frames_next() <= frames {
        let needed = resampler.input_frames_next();
        let input = [&left[pos..pos + needed], &right[pos..pos + needed]];
        let output = resampler
            .process(&input[..], None)
            .map_err(|e| LoadError::Decode(format!("Resampling failed: {}", e)))?;
        out_left.extend_from_slice(&output[0]);
        out_right.extend_from_slice(&output[1]);
        pos += needed;
    }

    if pos < frames {
        let input = [&left[pos..], &right[pos..]];
        let output = resampler
            .process_partial(Some(&input[..]), None)
            .map_err(|e| LoadError::Decode(format!("Resampling flush failed: {}", e)))?;
        out_left.extend_from_slice(&output[0]);
        out_right.extend_from_slice(&output[1]);
    }

    Ok(out_left
        .into_iter()
        .zip(out_right)
        .flat_map(|(l, r)| [l, r])
        .collect())
}
