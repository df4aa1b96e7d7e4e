//! Загрузчик данных UnitY: фильтрация, извлечение признаков и сборка батчей.
//!
//! [`UnitYDataLoader`] держит манифест и конфигурацию; каждая итерация
//! перемешивает шард заново и собирает батчи либо в вызывающем потоке
//! (`num_workers == 0`), либо в пуле потоков-воркеров.

use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use audio::{FbankExtractor, load_wav, probe_wav};
use candle_core::Tensor;
use crossbeam_channel::{Receiver, Sender};
use m4t_core::{
    BatchingConfig, FbankConfig, M4tError, M4tResult, MultimodalSeqsBatch, SampleRecord,
    SeqsBatch, TextTokenizer, UnitTokenizer,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, info_span, warn};

use crate::cache::TokenizerCache;
use crate::collate::{lengths_tensor, pad_and_stack, shift_targets};
use crate::filter::{drop_non_finite, filter_long_audio};
use crate::manifest::Manifest;
use crate::shard::shard_range;

// ---------------------------------------------------------------------------
// Сборка одного батча
// ---------------------------------------------------------------------------

/// Превращает список записей в [`MultimodalSeqsBatch`].
///
/// Не хранит состояния кроме кэша энкодеров, поэтому один экземпляр
/// разделяется всеми воркерами.
pub struct BatchPreparer {
    config: BatchingConfig,
    extractor: FbankExtractor,
    tokenizers: TokenizerCache,
}

impl BatchPreparer {
    pub fn new(
        text_tokenizer: Arc<dyn TextTokenizer>,
        unit_tokenizer: Arc<dyn UnitTokenizer>,
        config: BatchingConfig,
    ) -> Self {
        let extractor = FbankExtractor::new(FbankConfig::m4t(), config.float_dtype.to_dtype());
        Self {
            config,
            extractor,
            tokenizers: TokenizerCache::new(text_tokenizer, unit_tokenizer),
        }
    }

    pub fn config(&self) -> &BatchingConfig {
        &self.config
    }

    pub fn tokenizers(&self) -> &TokenizerCache {
        &self.tokenizers
    }

    /// Fbank-признаки исходного аудио, `[time, 80]`.
    pub fn source_fbank(&self, sample: &SampleRecord) -> M4tResult<Tensor> {
        let path = &sample.source.audio_local_path;
        let waveform = load_wav(path)?;
        self.extractor.extract(&waveform).map_err(|e| match e {
            M4tError::Audio(msg) => M4tError::Audio(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Собрать батч из сэмплов.
    ///
    /// 1. Отбросить слишком длинное аудио (если отброшено всё - оставить первый сэмпл).
    /// 2. Извлечь fbank и отбросить сэмплы с NaN/inf (пустой результат - ошибка).
    /// 3. Паддинг признаков, токенизация текста и юнитов.
    ///
    /// Под-батч text→units отсутствует целиком, если хотя бы у одного
    /// выжившего сэмпла нет юнитов.
    pub fn prepare_batch(&self, samples: &[&SampleRecord]) -> M4tResult<MultimodalSeqsBatch> {
        let requested = samples.len();
        let samples = filter_long_audio(
            samples.to_vec(),
            self.config.max_audio_length_sec,
            |s: &&SampleRecord| Ok(probe_wav(&s.source.audio_local_path)?.duration_secs()),
        )?;

        let fbanks = samples
            .iter()
            .map(|s| self.source_fbank(s))
            .collect::<M4tResult<Vec<_>>>()?;
        let (samples, fbanks) = drop_non_finite(samples, fbanks)?;

        // input speech
        let src_lengths: Vec<usize> = fbanks.iter().map(|f| f.dim(0)).collect::<Result<_, _>>()?;
        let src_tokens = pad_and_stack(&fbanks, self.config.fbank_feats_pad_idx as f64)?
            .to_dtype(self.config.float_dtype.to_dtype())?;
        drop(fbanks);

        // output text
        let text_tokens = samples
            .iter()
            .map(|s| self.tokenizers.tokenize_target_text(s))
            .collect::<M4tResult<Vec<_>>>()?;
        let text = shift_targets(&text_tokens, self.tokenizers.text_vocab().pad_idx)?;

        let speech_to_text = SeqsBatch {
            src_tokens: Some(src_tokens),
            src_lengths: Some(lengths_tensor(&src_lengths)?),
            target_tokens: Some(text.target_tokens),
            prev_output_tokens: Some(text.prev_output_tokens),
            target_lengths: Some(text.target_lengths),
        };

        // output units
        let text_to_units = if samples.iter().all(|s| s.has_units()) {
            let unit_tokens = samples
                .iter()
                .map(|s| self.tokenizers.tokenize_units(s))
                .collect::<M4tResult<Option<Vec<_>>>>()?
                .unwrap_or_default();
            shift_targets(&unit_tokens, self.tokenizers.unit_vocab().pad_idx)?.into_seqs_batch()
        } else {
            SeqsBatch::absent()
        };

        debug!(
            requested,
            kept = samples.len(),
            units = !text_to_units.is_absent(),
            "batch prepared"
        );

        Ok(MultimodalSeqsBatch {
            speech_to_text,
            text_to_units,
        })
    }
}

// ---------------------------------------------------------------------------
// Загрузчик
// ---------------------------------------------------------------------------

/// Seed воркера: глобальный seed эпохи плюс индекс воркера.
pub fn worker_seed(epoch_seed: u64, worker_id: usize) -> u64 {
    epoch_seed.wrapping_add(worker_id as u64)
}

/// Перезапускаемый источник батчей для цикла обучения.
pub struct UnitYDataLoader {
    preparer: Arc<BatchPreparer>,
    manifest: Arc<Manifest>,
    shard: Range<usize>,
    next_epoch: AtomicU64,
}

impl UnitYDataLoader {
    /// Загрузить манифест и подготовить загрузчик.
    pub fn new(
        text_tokenizer: Arc<dyn TextTokenizer>,
        unit_tokenizer: Arc<dyn UnitTokenizer>,
        manifest_path: impl AsRef<Path>,
        config: BatchingConfig,
    ) -> M4tResult<Self> {
        config.validate()?;
        let manifest = Manifest::load(manifest_path)?;
        Self::from_manifest(text_tokenizer, unit_tokenizer, manifest, config)
    }

    /// Загрузчик поверх уже прочитанного манифеста.
    pub fn from_manifest(
        text_tokenizer: Arc<dyn TextTokenizer>,
        unit_tokenizer: Arc<dyn UnitTokenizer>,
        manifest: Manifest,
        config: BatchingConfig,
    ) -> M4tResult<Self> {
        config.validate()?;
        let shard = shard_range(manifest.len(), config.rank, config.world_size)?;
        info!(
            "UnitYDataLoader: ранг {}/{}, шард {:?} из {} сэмплов, batch_size={}, workers={}, dtype={}",
            config.rank,
            config.world_size,
            shard,
            manifest.len(),
            config.batch_size,
            config.num_workers,
            config.float_dtype
        );

        Ok(Self {
            preparer: Arc::new(BatchPreparer::new(text_tokenizer, unit_tokenizer, config)),
            manifest: Arc::new(manifest),
            shard,
            next_epoch: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &BatchingConfig {
        self.preparer.config()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Индексы манифеста, принадлежащие этому рангу.
    pub fn shard(&self) -> Range<usize> {
        self.shard.clone()
    }

    /// Количество батчей за эпоху (последний может быть неполным).
    pub fn num_batches(&self) -> usize {
        self.shard.len().div_ceil(self.config().batch_size)
    }

    /// Порядок индексов шарда для эпохи `epoch`.
    pub fn epoch_order(&self, epoch: u64) -> Vec<usize> {
        let mut order: Vec<usize> = self.shard.clone().collect();
        if self.config().shuffle {
            let mut rng = StdRng::seed_from_u64(self.epoch_seed(epoch));
            order.shuffle(&mut rng);
        }
        order
    }

    /// Новая эпоха: каждый вызов перемешивает данные заново.
    pub fn iter(&self) -> BatchIter {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        self.iter_epoch(epoch)
    }

    /// Воспроизводимая итерация по конкретной эпохе.
    pub fn iter_epoch(&self, epoch: u64) -> BatchIter {
        let batches: Vec<Vec<usize>> = self
            .epoch_order(epoch)
            .chunks(self.config().batch_size)
            .map(<[usize]>::to_vec)
            .collect();
        debug!(epoch, num_batches = batches.len(), "starting epoch");

        let num_workers = self.config().num_workers;
        let inner = if num_workers == 0 {
            IterInner::Inline {
                preparer: Arc::clone(&self.preparer),
                manifest: Arc::clone(&self.manifest),
                batches: batches.into_iter(),
            }
        } else {
            match WorkerPool::spawn(
                Arc::clone(&self.preparer),
                Arc::clone(&self.manifest),
                batches,
                num_workers,
                self.epoch_seed(epoch),
            ) {
                Ok(pool) => IterInner::Workers(pool),
                Err(e) => IterInner::Failed(Some(e)),
            }
        };

        BatchIter { inner, done: false }
    }

    fn epoch_seed(&self, epoch: u64) -> u64 {
        self.config().seed.wrapping_add(epoch)
    }
}

impl<'a> IntoIterator for &'a UnitYDataLoader {
    type Item = M4tResult<MultimodalSeqsBatch>;
    type IntoIter = BatchIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ---------------------------------------------------------------------------
// Итератор
// ---------------------------------------------------------------------------

/// Батчи одной эпохи. После первой ошибки итерация завершается.
pub struct BatchIter {
    inner: IterInner,
    done: bool,
}

enum IterInner {
    Inline {
        preparer: Arc<BatchPreparer>,
        manifest: Arc<Manifest>,
        batches: std::vec::IntoIter<Vec<usize>>,
    },
    Workers(WorkerPool),
    Failed(Option<M4tError>),
}

impl Iterator for BatchIter {
    type Item = M4tResult<MultimodalSeqsBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = match &mut self.inner {
            IterInner::Inline {
                preparer,
                manifest,
                batches,
            } => batches
                .next()
                .map(|indices| preparer.prepare_batch(&resolve(manifest, &indices))),
            IterInner::Workers(pool) => pool.next(),
            IterInner::Failed(err) => err.take().map(Err),
        };
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

fn resolve<'a>(manifest: &'a Manifest, indices: &[usize]) -> Vec<&'a SampleRecord> {
    indices.iter().filter_map(|&i| manifest.get(i)).collect()
}

// ---------------------------------------------------------------------------
// Пул воркеров
// ---------------------------------------------------------------------------

struct WorkerPool {
    results: Option<Receiver<M4tResult<MultimodalSeqsBatch>>>,
    handles: Vec<JoinHandle<()>>,
    remaining: usize,
}

impl WorkerPool {
    fn spawn(
        preparer: Arc<BatchPreparer>,
        manifest: Arc<Manifest>,
        batches: Vec<Vec<usize>>,
        num_workers: usize,
        epoch_seed: u64,
    ) -> M4tResult<Self> {
        let remaining = batches.len();
        let (job_tx, job_rx) = crossbeam_channel::unbounded();
        for batch in batches {
            job_tx
                .send(batch)
                .map_err(|_| M4tError::Config("job queue closed".into()))?;
        }
        drop(job_tx);

        let capacity = num_workers * preparer.config().prefetch_factor.max(1);
        let (out_tx, out_rx) = crossbeam_channel::bounded(capacity);

        let mut handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let preparer = Arc::clone(&preparer);
            let manifest = Arc::clone(&manifest);
            let jobs = job_rx.clone();
            let out = out_tx.clone();
            let seed = worker_seed(epoch_seed, worker_id);
            let handle = std::thread::Builder::new()
                .name(format!("m4t-data-worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, seed, &preparer, &manifest, jobs, out))?;
            handles.push(handle);
        }

        Ok(Self {
            results: Some(out_rx),
            handles,
            remaining,
        })
    }

    fn next(&mut self) -> Option<M4tResult<MultimodalSeqsBatch>> {
        if self.remaining == 0 {
            return None;
        }
        let results = self.results.as_ref()?;
        match results.recv() {
            Ok(item) => {
                self.remaining -= 1;
                Some(item)
            }
            Err(_) => Some(Err(M4tError::Config(format!(
                "data workers exited with {} batches outstanding",
                self.remaining
            )))),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Disconnect first so workers blocked on send wake up.
        self.results.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("data worker panicked");
            }
        }
    }
}

fn worker_loop(
    worker_id: usize,
    seed: u64,
    preparer: &BatchPreparer,
    manifest: &Manifest,
    jobs: Receiver<Vec<usize>>,
    out: Sender<M4tResult<MultimodalSeqsBatch>>,
) {
    let span = info_span!("data_worker", worker_id, seed);
    let _enter = span.enter();

    while let Ok(indices) = jobs.recv() {
        let result = preparer.prepare_batch(&resolve(manifest, &indices));
        let failed = result.is_err();
        if out.send(result).is_err() || failed {
            break;
        }
    }
    debug!("worker finished");
}
