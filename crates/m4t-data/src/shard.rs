//! Разбиение датасета между распределёнными воркерами.
//!
//! Схема contiguous, как у `split_dataset_by_node` для map-style датасетов:
//! первые `n % world_size` шардов на один элемент длиннее.

use std::ops::Range;

use m4t_core::{M4tError, M4tResult};

/// Диапазон индексов, который достаётся рангу `rank`.
pub fn shard_range(len: usize, rank: usize, world_size: usize) -> M4tResult<Range<usize>> {
    if world_size == 0 {
        return Err(M4tError::Config("world_size должен быть >= 1".into()));
    }
    if rank >= world_size {
        return Err(M4tError::Config(format!(
            "rank {rank} вне диапазона [0, {world_size})"
        )));
    }

    let div = len / world_size;
    let rem = len % world_size;
    let start = rank * div + rank.min(rem);
    let size = div + usize::from(rank < rem);
    Ok(start..start + size)
}
