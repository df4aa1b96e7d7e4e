//! M4T Data - batching pipeline for speech-to-text and text-to-units finetuning.
//!
//! Reads a JSON-lines manifest, shards it across ranks, filters and
//! featurizes audio, tokenizes targets per language and assembles padded
//! [`MultimodalSeqsBatch`](m4t_core::MultimodalSeqsBatch) values.

mod cache;
mod collate;
mod filter;
mod loader;
mod manifest;
mod shard;
mod tokenizer;

pub use cache::TokenizerCache;
pub use collate::{ShiftedTargets, lengths_tensor, pad_and_stack, shift_targets};
pub use filter::{drop_non_finite, filter_long_audio, has_non_finite};
pub use loader::{BatchIter, BatchPreparer, UnitYDataLoader, worker_seed};
pub use manifest::Manifest;
pub use shard::shard_range;
pub use tokenizer::{NllbTokenizer, UnitYUnitTokenizer};
