//! Трейты токенизаторов, которые потребляет пайплайн.
//!
//! Токенизатор - внешний коллаборатор: он создаёт энкодеры под конкретный
//! язык, а пайплайн кэширует их (см. `m4t_data::TokenizerCache`).
//! Все трейты object-safe и `Send + Sync`, чтобы энкодеры можно было
//! разделять между потоками-воркерами.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::M4tResult;

/// Описание словаря: размер и индексы служебных токенов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabInfo {
    pub size: usize,
    pub unk_idx: Option<i64>,
    pub bos_idx: Option<i64>,
    pub eos_idx: i64,
    pub pad_idx: i64,
}

/// Режим текстового энкодера.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncodingMode {
    /// Вход энкодера модели: `[<lang>, ..., <eos>]`.
    Source,
    /// Цель декодера: `[<eos>, <lang>, ...]`, завершающий `<eos>` добавляет пайплайн.
    Target,
}

/// Текст → 1-D тензор `i64` с id токенов.
pub trait TextTokenEncoder: Send + Sync {
    fn encode(&self, text: &str) -> M4tResult<Tensor>;
}

/// Юниты → 1-D тензор `i64` с id токенов.
pub trait UnitTokenEncoder: Send + Sync {
    fn encode(&self, units: &[u32]) -> M4tResult<Tensor>;
}

/// Текстовый токенизатор.
pub trait TextTokenizer: Send + Sync {
    /// Создать энкодер для языка `lang`.
    fn create_encoder(&self, lang: &str, mode: EncodingMode)
        -> M4tResult<Box<dyn TextTokenEncoder>>;

    fn vocab_info(&self) -> VocabInfo;
}

/// Токенизатор дискретных юнитов.
pub trait UnitTokenizer: Send + Sync {
    /// Создать энкодер для языка `lang`.
    fn create_encoder(&self, lang: &str) -> M4tResult<Box<dyn UnitTokenEncoder>>;

    fn vocab_info(&self) -> VocabInfo;
}
