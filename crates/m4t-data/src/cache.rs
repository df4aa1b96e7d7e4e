//! Per-language encoder cache and target tokenization.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use candle_core::Tensor;
use m4t_core::{
    EncodingMode, M4tError, M4tResult, SampleRecord, TextTokenEncoder, TextTokenizer,
    UnitTokenEncoder, UnitTokenizer, VocabInfo,
};
use tracing::debug;

/// Lazily built text and unit encoders keyed by target language.
///
/// Entries are never evicted. Concurrent misses for the same language may
/// both construct an encoder; the first one stored wins.
pub struct TokenizerCache {
    text_tokenizer: Arc<dyn TextTokenizer>,
    unit_tokenizer: Arc<dyn UnitTokenizer>,
    text_encoders: RwLock<HashMap<String, Arc<dyn TextTokenEncoder>>>,
    unit_encoders: RwLock<HashMap<String, Arc<dyn UnitTokenEncoder>>>,
}

impl TokenizerCache {
    pub fn new(text_tokenizer: Arc<dyn TextTokenizer>, unit_tokenizer: Arc<dyn UnitTokenizer>) -> Self {
        Self {
            text_tokenizer,
            unit_tokenizer,
            text_encoders: RwLock::new(HashMap::new()),
            unit_encoders: RwLock::new(HashMap::new()),
        }
    }

    pub fn text_vocab(&self) -> VocabInfo {
        self.text_tokenizer.vocab_info()
    }

    pub fn unit_vocab(&self) -> VocabInfo {
        self.unit_tokenizer.vocab_info()
    }

    /// Target-mode text encoder for `lang`.
    pub fn text_encoder(&self, lang: &str) -> M4tResult<Arc<dyn TextTokenEncoder>> {
        get_or_create(&self.text_encoders, lang, || {
            debug!(lang, "creating text encoder");
            self.text_tokenizer
                .create_encoder(lang, EncodingMode::Target)
                .map(Arc::from)
        })
    }

    /// Unit encoder for `lang`.
    pub fn unit_encoder(&self, lang: &str) -> M4tResult<Arc<dyn UnitTokenEncoder>> {
        get_or_create(&self.unit_encoders, lang, || {
            debug!(lang, "creating unit encoder");
            self.unit_tokenizer.create_encoder(lang).map(Arc::from)
        })
    }

    /// `[<eos>, <lang>, text tokens.., <eos>]`
    pub fn tokenize_target_text(&self, sample: &SampleRecord) -> M4tResult<Tensor> {
        let tokens = self.text_encoder(&sample.target.lang)?.encode(&sample.target.text)?;
        append_eos(&tokens, self.text_vocab().eos_idx)
    }

    /// `[<eos>, <lang>, unit tokens.., <eos>]`, or `None` when the sample has no units.
    pub fn tokenize_units(&self, sample: &SampleRecord) -> M4tResult<Option<Tensor>> {
        let Some(units) = &sample.target.units else {
            return Ok(None);
        };
        let tokens = self.unit_encoder(&sample.target.lang)?.encode(units)?;
        append_eos(&tokens, self.unit_vocab().eos_idx).map(Some)
    }

    /// Languages with a cached text encoder.
    pub fn cached_text_langs(&self) -> Vec<String> {
        self.text_encoders
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn get_or_create<E: ?Sized>(
    map: &RwLock<HashMap<String, Arc<E>>>,
    lang: &str,
    create: impl FnOnce() -> M4tResult<Arc<E>>,
) -> M4tResult<Arc<E>> {
    if let Some(encoder) = map.read().map_err(poisoned)?.get(lang) {
        return Ok(Arc::clone(encoder));
    }
    let encoder = create()?;
    let mut guard = map.write().map_err(poisoned)?;
    Ok(Arc::clone(guard.entry(lang.to_string()).or_insert(encoder)))
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> M4tError {
    M4tError::Tokenizer("tokenizer cache lock poisoned".into())
}

fn append_eos(tokens: &Tensor, eos_idx: i64) -> M4tResult<Tensor> {
    let eos = Tensor::new(&[eos_idx], tokens.device())?;
    Ok(Tensor::cat(&[tokens, &eos], 0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use m4t_core::{SourceSample, TargetSample};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VOCAB: VocabInfo = VocabInfo {
        size: 100,
        unk_idx: Some(3),
        bos_idx: Some(0),
        eos_idx: 2,
        pad_idx: 1,
    };

    #[derive(Default)]
    struct CountingText {
        created: AtomicUsize,
    }

    struct ByteEncoder;

    impl TextTokenEncoder for ByteEncoder {
        fn encode(&self, text: &str) -> M4tResult<Tensor> {
            let mut ids = vec![2i64, 50];
            ids.extend(text.bytes().map(|b| b as i64 % 40 + 10));
            let len = ids.len();
            Ok(Tensor::from_vec(ids, len, &Device::Cpu)?)
        }
    }

    impl TextTokenizer for CountingText {
        fn create_encoder(&self, _lang: &str, mode: EncodingMode) -> M4tResult<Box<dyn TextTokenEncoder>> {
            assert_eq!(mode, EncodingMode::Target);
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ByteEncoder))
        }

        fn vocab_info(&self) -> VocabInfo {
            VOCAB
        }
    }

    #[derive(Default)]
    struct CountingUnits {
        created: AtomicUsize,
    }

    struct OffsetEncoder;

    impl UnitTokenEncoder for OffsetEncoder {
        fn encode(&self, units: &[u32]) -> M4tResult<Tensor> {
            let mut ids = vec![2i64, 60];
            ids.extend(units.iter().map(|&u| u as i64 + 4));
            let len = ids.len();
            Ok(Tensor::from_vec(ids, len, &Device::Cpu)?)
        }
    }

    impl UnitTokenizer for CountingUnits {
        fn create_encoder(&self, _lang: &str) -> M4tResult<Box<dyn UnitTokenEncoder>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(OffsetEncoder))
        }

        fn vocab_info(&self) -> VocabInfo {
            VOCAB
        }
    }

    fn sample(lang: &str, text: &str, units: Option<Vec<u32>>) -> SampleRecord {
        SampleRecord {
            source: SourceSample {
                audio_local_path: "a.wav".into(),
                lang: "eng".into(),
                id: None,
                text: None,
                sampling_rate: None,
            },
            target: TargetSample {
                text: text.into(),
                lang: lang.into(),
                units,
                id: None,
                audio_local_path: None,
            },
        }
    }

    #[test]
    fn test_encoders_built_once_per_language() {
        let text = Arc::new(CountingText::default());
        let units = Arc::new(CountingUnits::default());
        let cache = TokenizerCache::new(text.clone(), units.clone());

        for lang in ["fra", "deu", "fra", "fra", "deu", "spa"] {
            cache.tokenize_target_text(&sample(lang, "hi", None)).unwrap();
            cache.tokenize_units(&sample(lang, "hi", Some(vec![1]))).unwrap();
        }

        assert_eq!(text.created.load(Ordering::SeqCst), 3);
        assert_eq!(units.created.load(Ordering::SeqCst), 3);
        let mut langs = cache.cached_text_langs();
        langs.sort();
        assert_eq!(langs, vec!["deu", "fra", "spa"]);
    }

    #[test]
    fn test_target_text_ends_with_eos() {
        let cache = TokenizerCache::new(
            Arc::new(CountingText::default()),
            Arc::new(CountingUnits::default()),
        );
        let tokens = cache.tokenize_target_text(&sample("fra", "ab", None)).unwrap();
        let ids = tokens.to_vec1::<i64>().unwrap();
        assert_eq!(ids.first(), Some(&2));
        assert_eq!(ids.last(), Some(&2));
        assert_eq!(ids.len(), 2 + 2 + 1);
    }

    #[test]
    fn test_units_absent_without_encoder() {
        let units = Arc::new(CountingUnits::default());
        let cache = TokenizerCache::new(Arc::new(CountingText::default()), units.clone());

        assert!(cache.tokenize_units(&sample("fra", "x", None)).unwrap().is_none());
        assert_eq!(units.created.load(Ordering::SeqCst), 0);

        let tokens = cache
            .tokenize_units(&sample("fra", "x", Some(vec![0, 5])))
            .unwrap()
            .unwrap();
        assert_eq!(tokens.to_vec1::<i64>().unwrap(), vec![2, 60, 4, 9, 2]);
    }

    #[test]
    fn test_shared_between_threads() {
        let text = Arc::new(CountingText::default());
        let cache = Arc::new(TokenizerCache::new(text.clone(), Arc::new(CountingUnits::default())));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        cache.tokenize_target_text(&sample("fra", "x", None)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cache.cached_text_langs(), vec!["fra"]);
        assert!(text.created.load(Ordering::SeqCst) >= 1);
    }
}
