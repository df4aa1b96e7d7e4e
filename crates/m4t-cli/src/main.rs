//! m4t-finetune
//!
//! CLI для проверки манифестов и прогона пайплайна батчинга SeamlessM4T
//! без обучения модели.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use audio::probe_wav;
use m4t_core::{BatchingConfig, FloatDType, MultimodalSeqsBatch, SAMPLE_RATE};
use m4t_data::{Manifest, NllbTokenizer, UnitYDataLoader, UnitYUnitTokenizer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Точность float-тензоров для CLI.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum DTypeArg {
    /// float16 (по умолчанию при обучении)
    Fp16,
    /// bfloat16
    Bf16,
    /// float32
    Fp32,
}

impl From<DTypeArg> for FloatDType {
    fn from(v: DTypeArg) -> Self {
        match v {
            DTypeArg::Fp16 => FloatDType::F16,
            DTypeArg::Bf16 => FloatDType::Bf16,
            DTypeArg::Fp32 => FloatDType::F32,
        }
    }
}

#[derive(Parser)]
#[command(name = "m4t-finetune")]
#[command(author, version, about = "M4T finetuning data pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a manifest: languages, unit coverage, audio durations
    Inspect {
        /// Path to the JSON-lines manifest
        #[arg(long)]
        manifest: PathBuf,

        /// Порог длительности, сэмплы длиннее считаются отброшенными
        #[arg(long, default_value_t = 15.0)]
        max_audio_sec: f32,

        /// Не читать заголовки WAV (только статистика манифеста)
        #[arg(long, default_value_t = false)]
        skip_audio: bool,
    },

    /// Build batches for one or more epochs and print their shapes.
    ///
    /// Значения из `--config` перекрываются явно заданными флагами.
    Batches {
        /// Path to the JSON-lines manifest
        #[arg(long)]
        manifest: PathBuf,

        /// HF `tokenizer.json` текстового токенизатора NLLB
        #[arg(long)]
        text_tokenizer: PathBuf,

        /// Целевые языки словаря юнитов (через запятую, порядок важен)
        #[arg(long, value_delimiter = ',', required = true)]
        langs: Vec<String>,

        /// Размер кодбука юнитов
        #[arg(long, default_value_t = 10_000)]
        num_units: usize,

        /// JSON с BatchingConfig
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        max_audio_sec: Option<f32>,

        /// Потоки подготовки батчей (0 - в основном потоке)
        #[arg(long)]
        workers: Option<usize>,

        #[arg(long, value_enum)]
        dtype: Option<DTypeArg>,

        /// Ранг процесса (по умолчанию из $RANK)
        #[arg(long, env = "RANK")]
        rank: Option<usize>,

        /// Размер группы процессов (по умолчанию из $WORLD_SIZE)
        #[arg(long, env = "WORLD_SIZE")]
        world_size: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// Отключить перемешивание
        #[arg(long, default_value_t = false)]
        no_shuffle: bool,

        /// Сколько эпох прогнать
        #[arg(long, default_value_t = 1)]
        epochs: usize,

        /// Печатать каждый батч
        #[arg(long, default_value_t = false)]
        verbose: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect {
            manifest,
            max_audio_sec,
            skip_audio,
        } => run_inspect(&manifest, max_audio_sec, skip_audio),
        Commands::Batches {
            manifest,
            text_tokenizer,
            langs,
            num_units,
            config,
            batch_size,
            max_audio_sec,
            workers,
            dtype,
            rank,
            world_size,
            seed,
            no_shuffle,
            epochs,
            verbose,
        } => {
            let mut cfg = match config {
                Some(path) => BatchingConfig::from_json_file(&path)
                    .with_context(|| format!("Не удалось прочитать конфиг {}", path.display()))?,
                None => BatchingConfig::default(),
            };
            if let Some(v) = batch_size {
                cfg.batch_size = v;
            }
            if let Some(v) = max_audio_sec {
                cfg.max_audio_length_sec = v;
            }
            if let Some(v) = workers {
                cfg.num_workers = v;
            }
            if let Some(v) = dtype {
                cfg.float_dtype = v.into();
            }
            if let Some(v) = rank {
                cfg.rank = v;
            }
            if let Some(v) = world_size {
                cfg.world_size = v;
            }
            if let Some(v) = seed {
                cfg.seed = v;
            }
            if no_shuffle {
                cfg.shuffle = false;
            }

            run_batches(&manifest, &text_tokenizer, &langs, num_units, cfg, epochs, verbose)
        }
    }
}

fn run_inspect(path: &Path, max_audio_sec: f32, skip_audio: bool) -> Result<()> {
    let manifest = Manifest::load(path)?;

    println!("📄 Manifest: {}", path.display());
    println!("   Samples: {}", manifest.len());

    let mut pairs: BTreeMap<(String, String), usize> = BTreeMap::new();
    let mut with_units = 0usize;
    for record in manifest.iter() {
        *pairs
            .entry((record.source.lang.clone(), record.target.lang.clone()))
            .or_default() += 1;
        if record.has_units() {
            with_units += 1;
        }
    }
    println!("   With units: {} / {}", with_units, manifest.len());
    println!("   Language pairs:");
    for ((src, tgt), count) in &pairs {
        println!("     {src} -> {tgt}: {count}");
    }

    if skip_audio {
        return Ok(());
    }

    let mut total_secs = 0.0f64;
    let mut too_long = 0usize;
    let mut wrong_rate = 0usize;
    let mut unreadable = 0usize;
    for record in manifest.iter() {
        match probe_wav(&record.source.audio_local_path) {
            Ok(info) => {
                let secs = info.duration_secs();
                total_secs += f64::from(secs);
                if secs > max_audio_sec {
                    too_long += 1;
                }
                if info.sample_rate != SAMPLE_RATE {
                    wrong_rate += 1;
                }
            }
            Err(e) => {
                warn!("{e}");
                unreadable += 1;
            }
        }
    }

    println!("🔊 Audio:");
    println!("   Total duration: {:.1} h", total_secs / 3600.0);
    println!("   Longer than {max_audio_sec:.1}s: {too_long}");
    println!("   Not {SAMPLE_RATE} Hz: {wrong_rate}");
    println!("   Unreadable: {unreadable}");
    Ok(())
}

fn run_batches(
    manifest: &Path,
    text_tokenizer: &Path,
    langs: &[String],
    num_units: usize,
    config: BatchingConfig,
    epochs: usize,
    verbose: bool,
) -> Result<()> {
    if langs.is_empty() {
        bail!("--langs не может быть пустым");
    }

    let text = Arc::new(NllbTokenizer::from_file(text_tokenizer)?);
    let units = Arc::new(UnitYUnitTokenizer::new(num_units, langs));
    let loader = UnitYDataLoader::new(text, units, manifest, config)?;

    println!("🧮 M4T batching dry run");
    println!("================================");
    println!("Shard: {:?} of {} samples", loader.shard(), loader.manifest().len());
    println!("Batches per epoch: {}", loader.num_batches());
    println!();

    for epoch in 0..epochs {
        let start = Instant::now();
        let mut stats = EpochStats::default();

        for (idx, batch) in loader.iter().enumerate() {
            let batch = batch.with_context(|| format!("Эпоха {epoch}, батч {idx}"))?;
            batch.validate()?;
            if verbose {
                println!("  [{epoch}:{idx}] {}", describe(&batch));
            }
            stats.add(&batch)?;
        }

        let elapsed = start.elapsed().as_secs_f64();
        info!("Эпоха {} готова за {:.2}с", epoch, elapsed);
        println!(
            "Epoch {epoch}: {} batches, {} samples, {} with units, {} feature frames ({:.1} batches/s)",
            stats.batches,
            stats.samples,
            stats.unit_samples,
            stats.frames,
            stats.batches as f64 / elapsed.max(1e-9)
        );
    }
    Ok(())
}

#[derive(Default)]
struct EpochStats {
    batches: usize,
    samples: usize,
    unit_samples: usize,
    frames: i64,
}

impl EpochStats {
    fn add(&mut self, batch: &MultimodalSeqsBatch) -> Result<()> {
        let size = batch.batch_size();
        self.batches += 1;
        self.samples += size;
        if !batch.text_to_units.is_absent() {
            self.unit_samples += size;
        }
        if let Some(lengths) = &batch.speech_to_text.src_lengths {
            self.frames += lengths.sum_all()?.to_scalar::<i64>()?;
        }
        Ok(())
    }
}

fn describe(batch: &MultimodalSeqsBatch) -> String {
    let s2t = &batch.speech_to_text;
    let dims = |t: &Option<candle_core::Tensor>| {
        t.as_ref()
            .map(|t| format!("{:?}", t.dims()))
            .unwrap_or_else(|| "-".into())
    };
    format!(
        "src {} {:?}, text {}, units {}",
        dims(&s2t.src_tokens),
        s2t.src_tokens.as_ref().map(|t| t.dtype()),
        dims(&s2t.target_tokens),
        dims(&batch.text_to_units.target_tokens),
    )
}
