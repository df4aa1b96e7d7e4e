//! WAV file loading.

use candle_core::{Device, Tensor};
use hound::WavReader;
use m4t_core::{M4tError, M4tResult, Waveform};
use std::path::Path;

/// Header-level information about a WAV file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: usize,
    /// Frames per channel.
    pub num_frames: usize,
}

impl WavInfo {
    /// Duration in seconds.
    pub fn duration_secs(&self) -> f32 {
        self.num_frames as f32 / self.sample_rate as f32
    }
}

/// Read only the WAV header.
pub fn probe_wav(path: impl AsRef<Path>) -> M4tResult<WavInfo> {
    let path = path.as_ref();
    let reader = open(path)?;
    let spec = reader.spec();
    Ok(WavInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels as usize,
        num_frames: reader.duration() as usize,
    })
}

/// Load a WAV file as a `[channels, frames]` f32 tensor normalized to [-1.0, 1.0].
pub fn load_wav(path: impl AsRef<Path>) -> M4tResult<Waveform> {
    let path = path.as_ref();
    let reader = open(path)?;

    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| read_error(path, e))?,
        hound::SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            let max_val = (1u32 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| read_error(path, e))?
        }
    };

    let num_frames = samples.len() / channels;
    // Interleaved [frames, channels] -> channel-first.
    let tensor = Tensor::from_vec(samples, (num_frames, channels), &Device::Cpu)?
        .t()?
        .contiguous()?;

    Ok(Waveform::new(tensor, spec.sample_rate))
}

/// Bring a waveform tensor to channel-last `[frames, channels]` layout.
///
/// - 1-D `[frames]` gets a trailing channel of size 1;
/// - 2-D with a leading dimension <= 2 is treated as channel-first and transposed;
/// - other 2-D tensors are assumed to be channel-last already.
///
/// Any other rank is an error.
pub fn to_channel_last(wav: &Tensor) -> M4tResult<Tensor> {
    match wav.dims() {
        [_] => Ok(wav.unsqueeze(1)?),
        [c, _] if *c <= 2 => Ok(wav.t()?),
        [_, _] => Ok(wav.clone()),
        dims => Err(M4tError::Audio(format!(
            "unsupported waveform shape {dims:?}, expected mono or stereo"
        ))),
    }
}

fn open(path: &Path) -> M4tResult<WavReader<std::io::BufReader<std::fs::File>>> {
    WavReader::open(path).map_err(|e| {
        M4tError::Audio(format!("Failed to open WAV {}: {}", path.display(), e))
    })
}

fn read_error(path: &Path, e: hound::Error) -> M4tError {
    M4tError::Audio(format!("Failed to read samples from {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, sample_rate: u32, frames: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in frames {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_probe_reports_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("half.wav");
        write_wav(&path, 1, 16000, &vec![0i16; 8000]);

        let info = probe_wav(&path).unwrap();
        assert_eq!(info.sample_rate, 16000);
        assert_eq!(info.channels, 1);
        assert_eq!(info.num_frames, 8000);
        assert!((info.duration_secs() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_load_stereo_is_channel_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        // L=16384, R=-16384 interleaved
        write_wav(&path, 2, 16000, &[16384, -16384, 16384, -16384, 16384, -16384]);

        let wav = load_wav(&path).unwrap();
        assert_eq!(wav.tensor.dims(), &[2, 3]);
        let data = wav.tensor.to_vec2::<f32>().unwrap();
        assert!(data[0].iter().all(|v| (v - 0.5).abs() < 1e-6));
        assert!(data[1].iter().all(|v| (v + 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_missing_file_is_audio_error() {
        let err = load_wav("/nonexistent/file.wav").unwrap_err();
        assert!(matches!(err, M4tError::Audio(_)));
    }

    #[test]
    fn test_channel_last_layouts() {
        let dev = Device::Cpu;

        let mono = Tensor::zeros(100, candle_core::DType::F32, &dev).unwrap();
        assert_eq!(to_channel_last(&mono).unwrap().dims(), &[100, 1]);

        let stereo_first = Tensor::zeros((2, 100), candle_core::DType::F32, &dev).unwrap();
        assert_eq!(to_channel_last(&stereo_first).unwrap().dims(), &[100, 2]);

        let already_last = Tensor::zeros((100, 2), candle_core::DType::F32, &dev).unwrap();
        assert_eq!(to_channel_last(&already_last).unwrap().dims(), &[100, 2]);

        let cube = Tensor::zeros((1, 2, 100), candle_core::DType::F32, &dev).unwrap();
        assert!(matches!(to_channel_last(&cube), Err(M4tError::Audio(_))));
    }
}
