use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),
    #[error("FLAC decode error: {0}")]
    Flac(#[from] claxon::Error),
    #[error("OGG decode error: {0}")]
    Ogg(#[from] lewton::VorbisError),
    #[error("MP3 decode error: {0}")]
    Mp3(String),
    #[error("Resampler error: {0}")]
    Resample(String),
    #[error("No audio frames decoded")]
    Empty,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded mono signal at a known sample rate.
#[derive(Debug, Clone)]
pub struct MonoAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl MonoAudio {
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode an audio file by extension, downmix to mono and resample to
/// `target_rate`.
pub fn load_audio(path: &Path, target_rate: u32) -> Result<MonoAudio, DecodeError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let (interleaved, channels, sample_rate) = match ext.as_str() {
        "wav" => decode_wav(path)?,
        "flac" => decode_flac(path)?,
        "ogg" => decode_ogg(path)?,
        "mp3" => decode_mp3(path)?,
        _ => return Err(DecodeError::UnsupportedFormat(ext)),
    };

    if interleaved.is_empty() || channels == 0 || sample_rate == 0 {
        return Err(DecodeError::Empty);
    }

    let mono = downmix(&interleaved, channels);
    log::debug!(
        "Decoded {}: {} frames, {} ch @ {} Hz",
        path.file_name().and_then(|f| f.to_str()).unwrap_or("?"),
        mono.len(),
        channels,
        sample_rate
    );

    let samples = if sample_rate == target_rate {
        mono
    } else {
        resample(&mono, sample_rate, target_rate)?
    };

    Ok(MonoAudio {
        samples,
        sample_rate: target_rate,
    })
}

/// Average interleaved channels into a single channel.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let scale = 1.0 / channels as f32;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

fn decode_wav(path: &Path) -> Result<(Vec<f32>, usize, u32), DecodeError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample as u32);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok((samples, spec.channels as usize, spec.sample_rate))
}

fn decode_flac(path: &Path) -> Result<(Vec<f32>, usize, u32), DecodeError> {
    let mut reader = claxon::FlacReader::open(path)?;
    let info = reader.streaminfo();
    let channels = info.channels as usize;
    let scale = int_scale(info.bits_per_sample);

    let mut samples = Vec::new();
    let mut blocks = reader.blocks();
    let mut buffer = claxon::Block::empty();
    while let Some(block) = blocks.read_next_or_eof(buffer.into_buffer())? {
        for frame in 0..block.duration() {
            for ch in 0..channels as u32 {
                samples.push(block.sample(ch, frame) as f32 / scale);
            }
        }
        buffer = block;
    }
    Ok((samples, channels, info.sample_rate))
}

fn decode_ogg(path: &Path) -> Result<(Vec<f32>, usize, u32), DecodeError> {
    let file = BufReader::new(File::open(path)?);
    let mut reader = lewton::inside_ogg::OggStreamReader::new(file)?;
    let channels = reader.ident_hdr.audio_channels as usize;
    let sample_rate = reader.ident_hdr.audio_sample_rate;

    let mut samples = Vec::new();
    // lewton returns interleaved i16 samples
    while let Some(packet) = reader.read_dec_packet_itl()? {
        samples.extend(packet.iter().map(|&s| s as f32 / i16::MAX as f32));
    }
    Ok((samples, channels, sample_rate))
}

fn decode_mp3(path: &Path) -> Result<(Vec<f32>, usize, u32), DecodeError> {
    let data = std::fs::read(path)?;
    let mut decoder = minimp3::Decoder::new(std::io::Cursor::new(data));

    let mut samples = Vec::new();
    let mut channels = 0usize;
    let mut sample_rate = 0u32;
    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if channels == 0 {
                    channels = frame.channels;
                    sample_rate = frame.sample_rate as u32;
                }
                samples.extend(frame.data.iter().map(|&s| s as f32 / i16::MAX as f32));
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => continue,
            Err(e) => return Err(DecodeError::Mp3(format!("{e:?}"))),
        }
    }
    Ok((samples, channels, sample_rate))
}

/// Full-scale divisor for integer PCM of the given bit depth.
fn int_scale(bits_per_sample: u32) -> f32 {
    match bits_per_sample {
        0 | 1 => 1.0,
        bits => ((1i64 << (bits.min(32) - 1)) - 1) as f32,
    }
}

const RESAMPLE_CHUNK: usize = 1024;

/// Band-limited resampling of a mono signal. The sinc filter's output delay
/// is trimmed so timestamps stay aligned with the source.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, DecodeError> {
    if input.is_empty() || from_rate == to_rate {
        return Ok(input.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let expected = (input.len() as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut chunks = input.chunks_exact(RESAMPLE_CHUNK);
    for chunk in chunks.by_ref() {
        let out = resampler
            .process(&[chunk][..], None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        output.extend_from_slice(&out[0]);
    }

    let rest = chunks.remainder();
    if !rest.is_empty() {
        let out = resampler
            .process_partial(Some(&[rest][..]), None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        output.extend_from_slice(&out[0]);
    }

    // Flush the filter tail until the delayed samples are out.
    while output.len() < expected + delay {
        let out = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        if out.is_empty() || out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&out[0]);
    }

    let start = delay.min(output.len());
    let end = (start + expected).min(output.len());
    Ok(output[start..end].to_vec())
}
