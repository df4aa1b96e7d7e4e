//! Конфигурационные структуры пайплайна подготовки батчей.

use std::path::Path;

use candle_core::DType;
use serde::{Deserialize, Serialize};

use crate::error::{M4tError, M4tResult};

/// Частота дискретизации, которую ожидает пайплайн. Ресемплинг не выполняется.
pub const SAMPLE_RATE: u32 = 16_000;

/// Точность тензоров с плавающей точкой в батчах.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FloatDType {
    /// fp16 - значение по умолчанию для обучения на GPU.
    F16,
    /// bf16 - используется при обучении на CPU.
    Bf16,
    /// fp32.
    F32,
}

impl FloatDType {
    /// Соответствующий тип candle.
    pub fn to_dtype(self) -> DType {
        match self {
            FloatDType::F16 => DType::F16,
            FloatDType::Bf16 => DType::BF16,
            FloatDType::F32 => DType::F32,
        }
    }
}

impl Default for FloatDType {
    fn default() -> Self {
        FloatDType::F16
    }
}

impl std::fmt::Display for FloatDType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FloatDType::F16 => write!(f, "fp16"),
            FloatDType::Bf16 => write!(f, "bf16"),
            FloatDType::F32 => write!(f, "fp32"),
        }
    }
}

/// Настройки батчинга. Задаются один раз при создании загрузчика.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Значение паддинга для fbank-признаков.
    pub fbank_feats_pad_idx: i64,

    /// Фиксированный размер батча.
    pub batch_size: usize,

    /// Сэмплы с аудио длиннее порога (в секундах) отбрасываются.
    pub max_audio_length_sec: f32,

    /// Ранг текущего воркера в группе процессов.
    pub rank: usize,

    /// Размер группы процессов.
    pub world_size: usize,

    /// Количество потоков подготовки батчей (0 - в вызывающем потоке).
    pub num_workers: usize,

    /// Точность float-тензоров.
    pub float_dtype: FloatDType,

    /// Глобальный seed для перемешивания и воркеров.
    pub seed: u64,

    /// Перемешивать ли порядок сэмплов в каждой эпохе.
    pub shuffle: bool,

    /// Сколько готовых батчей буферизуется на один воркер.
    pub prefetch_factor: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            fbank_feats_pad_idx: 0,
            batch_size: 2,
            max_audio_length_sec: 15.0,
            rank: 0,
            world_size: 1,
            num_workers: 2,
            float_dtype: FloatDType::F16,
            seed: 2343,
            shuffle: true,
            prefetch_factor: 2,
        }
    }
}

impl BatchingConfig {
    /// Загрузить конфигурацию из JSON-файла. Отсутствующие поля берутся по умолчанию.
    pub fn from_json_file(path: impl AsRef<Path>) -> M4tResult<Self> {
        let data = std::fs::read(path.as_ref())?;
        let config: Self = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Проверить согласованность параметров.
    pub fn validate(&self) -> M4tResult<()> {
        if self.batch_size == 0 {
            return Err(M4tError::Config("batch_size должен быть >= 1".into()));
        }
        if self.world_size == 0 {
            return Err(M4tError::Config("world_size должен быть >= 1".into()));
        }
        if self.rank >= self.world_size {
            return Err(M4tError::Config(format!(
                "rank {} вне диапазона [0, {})",
                self.rank, self.world_size
            )));
        }
        if !(self.max_audio_length_sec > 0.0) {
            return Err(M4tError::Config(format!(
                "max_audio_length_sec должен быть > 0, получено {}",
                self.max_audio_length_sec
            )));
        }
        Ok(())
    }
}

/// Параметры извлечения fbank-признаков (Kaldi-совместимые).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FbankConfig {
    /// Частота дискретизации в Гц.
    pub sample_rate: u32,

    /// Количество mel-бинов.
    pub num_mel_bins: usize,

    /// Длина фрейма в миллисекундах.
    pub frame_length_ms: f32,

    /// Шаг фрейма в миллисекундах.
    pub frame_shift_ms: f32,

    /// Множитель амплитуды: сэмплы в [-1, 1] переводятся в диапазон 16-bit PCM.
    pub waveform_scale: f32,

    /// Коэффициент pre-emphasis.
    pub preemphasis: f32,

    /// Нижняя граница mel-фильтров в Гц.
    pub low_freq: f32,

    /// Верхняя граница mel-фильтров в Гц (<= 0 - относительно Nyquist).
    pub high_freq: f32,

    /// Вычитать ли постоянную составляющую в каждом фрейме.
    pub remove_dc_offset: bool,

    /// Нормализация: нулевое среднее и единичная дисперсия по каждому бину.
    pub standardize: bool,
}

impl Default for FbankConfig {
    fn default() -> Self {
        Self::m4t()
    }
}

impl FbankConfig {
    /// Конфигурация UnitY / SeamlessM4T: 80 mel bins, scale 32768, standardize.
    pub fn m4t() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            num_mel_bins: 80,
            frame_length_ms: 25.0,
            frame_shift_ms: 10.0,
            waveform_scale: 32768.0,
            preemphasis: 0.97,
            low_freq: 20.0,
            high_freq: 0.0,
            remove_dc_offset: true,
            standardize: true,
        }
    }

    /// Длина фрейма в сэмплах.
    pub fn frame_length(&self) -> usize {
        (self.sample_rate as f32 * self.frame_length_ms / 1000.0) as usize
    }

    /// Шаг фрейма в сэмплах.
    pub fn frame_shift(&self) -> usize {
        (self.sample_rate as f32 * self.frame_shift_ms / 1000.0) as usize
    }

    /// Размер FFT: длина фрейма, округлённая вверх до степени двойки.
    pub fn padded_window_size(&self) -> usize {
        self.frame_length().next_power_of_two()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_batching_config() {
        let config = BatchingConfig::default();
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.max_audio_length_sec, 15.0);
        assert_eq!(config.world_size, 1);
        assert_eq!(config.float_dtype, FloatDType::F16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_rank() {
        let config = BatchingConfig {
            rank: 2,
            world_size: 2,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(M4tError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = BatchingConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batching.json");
        std::fs::write(&path, r#"{"batch_size": 8, "float_dtype": "bf16"}"#).unwrap();

        let config = BatchingConfig::from_json_file(&path).unwrap();
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.float_dtype, FloatDType::Bf16);
        assert_eq!(config.seed, 2343);
        assert_eq!(config.num_workers, 2);
    }

    #[test]
    fn test_fbank_frame_geometry() {
        let config = FbankConfig::m4t();
        assert_eq!(config.frame_length(), 400);
        assert_eq!(config.frame_shift(), 160);
        assert_eq!(config.padded_window_size(), 512);
        assert_eq!(config.num_mel_bins, 80);
    }

    #[test]
    fn test_float_dtype_mapping() {
        assert_eq!(FloatDType::F16.to_dtype(), DType::F16);
        assert_eq!(FloatDType::Bf16.to_dtype(), DType::BF16);
        assert_eq!(FloatDType::F32.to_dtype(), DType::F32);
    }
}
