//! Kaldi-совместимые log-mel fbank признаки.
//!
//! Рецепт совпадает с `WaveformToFbankConverter` (kaldi-native-fbank):
//! - фреймы 25 мс / шаг 10 мс, `snip_edges` (неполные фреймы отбрасываются)
//! - вычитание DC, pre-emphasis 0.97, окно Povey
//! - FFT 512, power spectrum, HTK mel-шкала 20 Гц .. Nyquist
//! - ln с полом `f32::EPSILON`, затем стандартизация по каждому mel-бину

use std::f32::consts::PI;

use candle_core::{DType, Device, Tensor};
use m4t_core::{FbankConfig, M4tError, M4tResult, Waveform};
use rustfft::{FftPlanner, num_complex::Complex};
use tracing::debug;

use crate::loader::to_channel_last;

/// Экстрактор fbank-признаков для одного высказывания.
#[derive(Debug)]
pub struct FbankExtractor {
    config: FbankConfig,
    window: Vec<f32>,
    /// [n_mels][n_fft/2]
    mel_banks: Vec<Vec<f32>>,
    dtype: DType,
}

impl FbankExtractor {
    /// Создать экстрактор; `dtype` - тип выходного тензора.
    pub fn new(config: FbankConfig, dtype: DType) -> Self {
        let window = povey_window(config.frame_length());
        let mel_banks = create_kaldi_mel_banks(
            config.num_mel_bins,
            config.padded_window_size(),
            config.sample_rate as f32,
            config.low_freq,
            config.high_freq,
        );

        Self {
            config,
            window,
            mel_banks,
            dtype,
        }
    }

    pub fn config(&self) -> &FbankConfig {
        &self.config
    }

    /// Извлечь признаки из загруженной волновой формы.
    ///
    /// Частота дискретизации должна совпадать с `config.sample_rate`:
    /// ресемплинг не выполняется. Для многоканального аудио берётся первый канал.
    ///
    /// # Returns
    /// Тензор `[time, num_mel_bins]` типа `dtype`.
    pub fn extract(&self, waveform: &Waveform) -> M4tResult<Tensor> {
        if waveform.sample_rate != self.config.sample_rate {
            return Err(M4tError::Audio(format!(
                "sample rate {} != {}, please resample",
                waveform.sample_rate, self.config.sample_rate
            )));
        }

        let wav = to_channel_last(&waveform.tensor)?;
        let samples: Vec<f32> = wav
            .narrow(1, 0, 1)?
            .squeeze(1)?
            .to_dtype(DType::F32)?
            .to_vec1()?;

        let mut fbank = self.compute(&samples);
        if self.config.standardize {
            standardize(&mut fbank, self.config.num_mel_bins);
        }

        let num_frames = fbank.len();
        debug!(num_frames, num_samples = samples.len(), "fbank extracted");

        let flat: Vec<f32> = fbank.into_iter().flatten().collect();
        let tensor = Tensor::from_vec(flat, (num_frames, self.config.num_mel_bins), &Device::Cpu)?;
        Ok(tensor.to_dtype(self.dtype)?)
    }

    /// Log-mel энергии без стандартизации, `[frames][n_mels]`.
    fn compute(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let frame_length = self.config.frame_length();
        let frame_shift = self.config.frame_shift();
        let n_fft = self.config.padded_window_size();

        let num_frames = if samples.len() < frame_length {
            0
        } else {
            1 + (samples.len() - frame_length) / frame_shift
        };

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);

        let mut features = Vec::with_capacity(num_frames);
        let mut buffer = vec![Complex::new(0.0_f32, 0.0); n_fft];

        for frame_idx in 0..num_frames {
            let start = frame_idx * frame_shift;
            let mut frame: Vec<f32> = samples[start..start + frame_length]
                .iter()
                .map(|s| s * self.config.waveform_scale)
                .collect();

            if self.config.remove_dc_offset {
                let mean = frame.iter().sum::<f32>() / frame_length as f32;
                frame.iter_mut().for_each(|v| *v -= mean);
            }

            let preemph = self.config.preemphasis;
            if preemph != 0.0 {
                for i in (1..frame_length).rev() {
                    frame[i] -= preemph * frame[i - 1];
                }
                frame[0] -= preemph * frame[0];
            }

            for (i, slot) in buffer.iter_mut().enumerate() {
                let v = if i < frame_length {
                    frame[i] * self.window[i]
                } else {
                    0.0
                };
                *slot = Complex::new(v, 0.0);
            }

            fft.process(&mut buffer);

            let power: Vec<f32> = buffer
                .iter()
                .take(n_fft / 2)
                .map(|c| c.re * c.re + c.im * c.im)
                .collect();

            let log_mel: Vec<f32> = self
                .mel_banks
                .iter()
                .map(|bank| {
                    let energy: f32 = bank.iter().zip(power.iter()).map(|(w, p)| w * p).sum();
                    energy.max(f32::EPSILON).ln()
                })
                .collect();

            features.push(log_mel);
        }

        features
    }
}

/// Стандартизация по каждому mel-бину вдоль времени (несмещённое std).
///
/// Эпсилона в знаменателе нет: константный бин даёт NaN, и такой сэмпл
/// отсеивается фильтром признаков.
fn standardize(features: &mut [Vec<f32>], n_mels: usize) {
    let n = features.len();
    if n == 0 {
        return;
    }
    for bin in 0..n_mels {
        let mean = features.iter().map(|f| f[bin] as f64).sum::<f64>() / n as f64;
        let sum_sq: f64 = features
            .iter()
            .map(|f| {
                let d = f[bin] as f64 - mean;
                d * d
            })
            .sum();
        let std = (sum_sq / (n as f64 - 1.0)).sqrt();
        for frame in features.iter_mut() {
            frame[bin] = ((frame[bin] as f64 - mean) / std) as f32;
        }
    }
}

/// Окно Povey: Hann в степени 0.85.
fn povey_window(length: usize) -> Vec<f32> {
    let denom = (length.max(2) - 1) as f32;
    (0..length)
        .map(|n| (0.5 - 0.5 * (2.0 * PI * n as f32 / denom).cos()).powf(0.85))
        .collect()
}

/// Kaldi mel: 1127 · ln(1 + f / 700).
fn hz_to_mel(hz: f32) -> f32 {
    1127.0 * (1.0 + hz / 700.0).ln()
}

/// Треугольные mel-фильтры Kaldi над первыми `n_fft / 2` бинами FFT.
fn create_kaldi_mel_banks(
    n_mels: usize,
    n_fft: usize,
    sample_rate: f32,
    low_freq: f32,
    high_freq: f32,
) -> Vec<Vec<f32>> {
    let num_fft_bins = n_fft / 2;
    let nyquist = 0.5 * sample_rate;
    let high_freq = if high_freq > 0.0 {
        high_freq
    } else {
        nyquist + high_freq
    };
    let fft_bin_width = sample_rate / n_fft as f32;

    let mel_low = hz_to_mel(low_freq);
    let mel_high = hz_to_mel(high_freq);
    let mel_delta = (mel_high - mel_low) / (n_mels + 1) as f32;

    let mut banks = vec![vec![0.0_f32; num_fft_bins]; n_mels];
    for (m, bank) in banks.iter_mut().enumerate() {
        let left = mel_low + m as f32 * mel_delta;
        let center = left + mel_delta;
        let right = center + mel_delta;

        for (k, weight) in bank.iter_mut().enumerate() {
            let mel = hz_to_mel(fft_bin_width * k as f32);
            if mel > left && mel < right {
                *weight = if mel <= center {
                    (mel - left) / (center - left)
                } else {
                    (right - mel) / (right - center)
                };
            }
        }
    }

    banks
}
