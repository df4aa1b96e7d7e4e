//! WAV on disk -> waveform -> standardized fbank.

use std::f32::consts::PI;
use std::path::Path;

use audio::{FbankExtractor, load_wav, probe_wav, to_channel_last};
use candle_core::DType;
use m4t_core::FbankConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn sine(freq: f32, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / 16_000.0).sin())
        .collect()
}

fn write_i16(path: &Path, channels: &[Vec<f32>]) {
    let spec = hound::WavSpec {
        channels: channels.len() as u16,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..channels[0].len() {
        for ch in channels {
            writer.write_sample((ch[i] * 32767.0) as i16).unwrap();
        }
    }
    writer.finalize().unwrap();
}

fn write_f32(path: &Path, samples: &[f32]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

fn features(path: &Path) -> Vec<Vec<f32>> {
    let extractor = FbankExtractor::new(FbankConfig::m4t(), DType::F32);
    extractor
        .extract(&load_wav(path).unwrap())
        .unwrap()
        .to_vec2::<f32>()
        .unwrap()
}

#[test]
fn test_sine_fbank_shape_and_statistics() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sine.wav");
    let mut samples = sine(440.0, 32_000);
    // amplitude ramp so every bin varies over time
    for (i, s) in samples.iter_mut().enumerate() {
        *s *= 0.1 + 0.9 * i as f32 / 32_000.0;
    }
    write_i16(&path, &[samples]);

    let info = probe_wav(&path).unwrap();
    assert_eq!(info.num_frames, 32_000);
    assert!((info.duration_secs() - 2.0).abs() < 1e-6);

    let feats = features(&path);
    assert_eq!(feats.len(), 1 + (32_000 - 400) / 160);
    assert!(feats.iter().all(|row| row.len() == 80));

    let n = feats.len() as f32;
    for bin in 0..80 {
        let mean: f32 = feats.iter().map(|r| r[bin]).sum::<f32>() / n;
        let var: f32 = feats.iter().map(|r| (r[bin] - mean).powi(2)).sum::<f32>() / (n - 1.0);
        assert!(mean.abs() < 1e-3, "bin {bin} mean {mean}");
        assert!((var - 1.0).abs() < 1e-2, "bin {bin} var {var}");
    }
}

#[test]
fn test_float_and_int_wav_agree() {
    let dir = tempfile::tempdir().unwrap();
    let int_path = dir.path().join("int.wav");
    let float_path = dir.path().join("float.wav");
    let mut rng = StdRng::seed_from_u64(7);
    let samples: Vec<f32> = (0..8_000)
        .map(|i| rng.gen_range(-0.4f32..0.4) * (0.2 + (i % 800) as f32 / 1_000.0))
        .collect();
    write_i16(&int_path, &[samples.clone()]);
    write_f32(&float_path, &samples);

    let a = features(&int_path);
    let b = features(&float_path);
    assert_eq!(a.len(), b.len());
    let max_diff = a
        .iter()
        .flatten()
        .zip(b.iter().flatten())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0f32, f32::max);
    assert!(max_diff < 0.05, "max diff {max_diff}");
}

#[test]
fn test_stereo_file_matches_left_channel() {
    let dir = tempfile::tempdir().unwrap();
    let left: Vec<f32> = sine(300.0, 6_400)
        .iter()
        .enumerate()
        .map(|(i, s)| s * (0.3 + (i % 1_600) as f32 / 2_000.0))
        .collect();
    let right = sine(3_000.0, 6_400);

    let mono = dir.path().join("mono.wav");
    let stereo = dir.path().join("stereo.wav");
    write_i16(&mono, &[left.clone()]);
    write_i16(&stereo, &[left, right]);

    let waveform = load_wav(&stereo).unwrap();
    assert_eq!(waveform.tensor.dims(), &[2, 6_400]);
    assert_eq!(to_channel_last(&waveform.tensor).unwrap().dims(), &[6_400, 2]);

    assert_eq!(features(&mono), features(&stereo));
}

#[test]
fn test_half_precision_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sine.wav");
    let samples: Vec<f32> = sine(500.0, 4_000)
        .iter()
        .enumerate()
        .map(|(i, s)| s * (i as f32 / 4_000.0))
        .collect();
    write_i16(&path, &[samples]);

    let extractor = FbankExtractor::new(FbankConfig::m4t(), DType::F16);
    let fbank = extractor.extract(&load_wav(&path).unwrap()).unwrap();
    assert_eq!(fbank.dtype(), DType::F16);
    assert_eq!(fbank.dims(), &[1 + (4_000 - 400) / 160, 80]);
}
