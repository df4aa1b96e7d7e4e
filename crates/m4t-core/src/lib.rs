//! # m4t-core
//!
//! Базовые типы, трейты и определения ошибок для пайплайна дообучения M4T.
//!
//! Этот крейт предоставляет фундаментальные абстракции для остальных
//! крейтов в workspace:
//!
//! - Записи манифеста ([`SampleRecord`]) и выходные батчи ([`MultimodalSeqsBatch`])
//! - Конфигурация батчинга и fbank-экстрактора
//! - Унифицированная обработка ошибок через [`M4tError`]
//! - Трейты токенизаторов [`TextTokenizer`] и [`UnitTokenizer`]

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{BatchingConfig, FbankConfig, FloatDType, SAMPLE_RATE};
pub use error::{M4tError, M4tResult};
pub use traits::{
    EncodingMode, TextTokenEncoder, TextTokenizer, UnitTokenEncoder, UnitTokenizer, VocabInfo,
};
pub use types::{MultimodalSeqsBatch, SampleRecord, SeqsBatch, SourceSample, TargetSample, Waveform};
