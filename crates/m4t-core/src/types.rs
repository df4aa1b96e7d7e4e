//! Общие типы пайплайна.
//!
//! Записи манифеста, загруженные волновые формы и выходной контракт
//! для цикла обучения: [`SeqsBatch`] и [`MultimodalSeqsBatch`].

use std::path::PathBuf;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::{M4tError, M4tResult};

// ---------------------------------------------------------------------------
// Записи манифеста
// ---------------------------------------------------------------------------

/// Исходная сторона пары: аудио на диске и его язык.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSample {
    /// Путь к WAV-файлу (mono/stereo, 16 кГц).
    pub audio_local_path: PathBuf,

    /// Код языка аудио.
    pub lang: String,

    /// Идентификатор сэмпла в исходном датасете.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Транскрипция исходного аудио, если есть.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Частота дискретизации, заявленная в манифесте (не проверяется).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_rate: Option<u32>,
}

/// Целевая сторона пары: текст и опциональные дискретные юниты.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSample {
    /// Целевой текст.
    pub text: String,

    /// Код целевого языка.
    pub lang: String,

    /// Последовательность дискретных юнитов речи.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Vec<u32>>,

    /// Идентификатор сэмпла в исходном датасете.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Путь к целевому аудио, если есть.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_local_path: Option<PathBuf>,
}

/// Один обучающий пример: одна строка манифеста.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub source: SourceSample,
    pub target: TargetSample,
}

impl SampleRecord {
    /// Есть ли у примера последовательность юнитов.
    pub fn has_units(&self) -> bool {
        self.target.units.is_some()
    }
}

// ---------------------------------------------------------------------------
// Волновая форма
// ---------------------------------------------------------------------------

/// Загруженное аудио.
#[derive(Debug, Clone)]
pub struct Waveform {
    /// Тензор f32 формы [channels, frames] (как отдаёт декодер WAV).
    pub tensor: Tensor,

    /// Частота дискретизации в Гц.
    pub sample_rate: u32,
}

impl Waveform {
    /// Создать волновую форму.
    pub fn new(tensor: Tensor, sample_rate: u32) -> Self {
        Self {
            tensor,
            sample_rate,
        }
    }
}

// ---------------------------------------------------------------------------
// Батчи
// ---------------------------------------------------------------------------

/// Группа из пяти выровненных тензоров; любой из них может отсутствовать.
///
/// Тензоры токенов и длин имеют тип `i64`, признаки - настроенную float-точность.
#[derive(Debug, Clone, Default)]
pub struct SeqsBatch {
    /// [batch, time, ...] - fbank-признаки или токены источника.
    pub src_tokens: Option<Tensor>,
    /// [batch]
    pub src_lengths: Option<Tensor>,
    /// [batch, len] - цель, сдвинутая на одну позицию влево.
    pub target_tokens: Option<Tensor>,
    /// [batch, len] - вход декодера.
    pub prev_output_tokens: Option<Tensor>,
    /// [batch]
    pub target_lengths: Option<Tensor>,
}

impl SeqsBatch {
    /// Батч, в котором модальность полностью отсутствует.
    pub fn absent() -> Self {
        Self::default()
    }

    /// Все пять тензоров отсутствуют.
    pub fn is_absent(&self) -> bool {
        self.src_tokens.is_none()
            && self.src_lengths.is_none()
            && self.target_tokens.is_none()
            && self.prev_output_tokens.is_none()
            && self.target_lengths.is_none()
    }

    /// Размер батча по первому присутствующему тензору.
    pub fn batch_size(&self) -> Option<usize> {
        [
            &self.src_tokens,
            &self.src_lengths,
            &self.target_tokens,
            &self.prev_output_tokens,
            &self.target_lengths,
        ]
        .into_iter()
        .flatten()
        .next()
        .and_then(|t| t.dims().first().copied())
    }

    /// Проверить, что все присутствующие тензоры согласованы по размеру батча.
    pub fn validate(&self) -> M4tResult<()> {
        let mut expected: Option<usize> = None;
        for (name, tensor) in [
            ("src_tokens", &self.src_tokens),
            ("src_lengths", &self.src_lengths),
            ("target_tokens", &self.target_tokens),
            ("prev_output_tokens", &self.prev_output_tokens),
            ("target_lengths", &self.target_lengths),
        ] {
            let Some(tensor) = tensor else {
                continue;
            };
            let dim0 = tensor.dims().first().copied().unwrap_or(0);
            match expected {
                None => expected = Some(dim0),
                Some(n) if n != dim0 => {
                    return Err(M4tError::Config(format!(
                        "{name}: размер батча {dim0}, ожидалось {n}"
                    )));
                }
                Some(_) => {}
            }
        }
        for (name, lengths) in [
            ("src_lengths", &self.src_lengths),
            ("target_lengths", &self.target_lengths),
        ] {
            if let Some(lengths) = lengths {
                if lengths.rank() != 1 {
                    return Err(M4tError::Config(format!(
                        "{name}: ожидается 1-D тензор, получено {:?}",
                        lengths.dims()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Выход пайплайна: speech→text и text→units, выровненные по индексу сэмпла.
#[derive(Debug, Clone)]
pub struct MultimodalSeqsBatch {
    pub speech_to_text: SeqsBatch,
    pub text_to_units: SeqsBatch,
}

impl MultimodalSeqsBatch {
    /// Количество сэмплов в батче (по speech→text).
    pub fn batch_size(&self) -> usize {
        self.speech_to_text.batch_size().unwrap_or(0)
    }

    /// Проверить инварианты обоих под-батчей и их выравнивание.
    pub fn validate(&self) -> M4tResult<()> {
        self.speech_to_text.validate()?;
        self.text_to_units.validate()?;
        if let Some(units_bs) = self.text_to_units.batch_size() {
            let bs = self.batch_size();
            if units_bs != bs {
                return Err(M4tError::Config(format!(
                    "text_to_units: размер батча {units_bs}, speech_to_text: {bs}"
                )));
            }
        }
        Ok(())
    }
}
