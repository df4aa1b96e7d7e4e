//! Фильтры сэмплов внутри батча.
//!
//! Две независимые стадии с разной политикой на пустой результат:
//! - длительность: если отброшено всё, остаётся первый исходный сэмпл;
//! - нечисловые признаки: если отброшено всё, батч - фатальная ошибка.

use std::fmt::Debug;

use candle_core::{DType, Tensor};
use m4t_core::{M4tError, M4tResult};
use tracing::debug;

/// Отбросить сэмплы длиннее `max_audio_length_sec`.
///
/// `duration` возвращает длительность аудио сэмпла в секундах.
pub fn filter_long_audio<T, F>(
    samples: Vec<T>,
    max_audio_length_sec: f32,
    mut duration: F,
) -> M4tResult<Vec<T>>
where
    T: Clone + Debug,
    F: FnMut(&T) -> M4tResult<f32>,
{
    let Some(first) = samples.first().cloned() else {
        return Err(M4tError::EmptyBatch("no samples to filter".into()));
    };

    let total = samples.len();
    let mut kept = Vec::with_capacity(total);
    for sample in samples {
        let length_s = duration(&sample)?;
        if length_s > max_audio_length_sec {
            debug!(?sample, length_s, max_audio_length_sec, "drop: audio too long");
        } else {
            kept.push(sample);
        }
    }

    if kept.is_empty() {
        debug!(total, "all samples exceed the duration limit, keeping the first one");
        kept.push(first);
    }
    Ok(kept)
}

/// Содержит ли тензор NaN или бесконечность.
pub fn has_non_finite(tensor: &Tensor) -> M4tResult<bool> {
    let values = tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
    Ok(values.iter().any(|v| !v.is_finite()))
}

/// Отбросить сэмплы, признаки которых содержат нечисловые значения.
///
/// Порядок выживших сохраняется. Пустой результат - [`M4tError::EmptyBatch`].
pub fn drop_non_finite<T: Debug>(
    samples: Vec<T>,
    features: Vec<Tensor>,
) -> M4tResult<(Vec<T>, Vec<Tensor>)> {
    if samples.len() != features.len() {
        return Err(M4tError::Config(format!(
            "{} samples but {} feature matrices",
            samples.len(),
            features.len()
        )));
    }

    let total = samples.len();
    let mut kept_samples = Vec::with_capacity(total);
    let mut kept_features = Vec::with_capacity(total);
    for (sample, fbank) in samples.into_iter().zip(features) {
        if has_non_finite(&fbank)? {
            debug!(?sample, dims = ?fbank.dims(), "drop: non-finite fbank");
            continue;
        }
        kept_samples.push(sample);
        kept_features.push(fbank);
    }

    if kept_samples.is_empty() {
        return Err(M4tError::EmptyBatch(format!(
            "all {total} samples have non-finite features"
        )));
    }
    Ok((kept_samples, kept_features))
}
