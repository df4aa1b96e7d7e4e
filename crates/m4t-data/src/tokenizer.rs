//! Токенизаторы текста и дискретных юнитов.
//!
//! [`NllbTokenizer`] - обёртка над HF `tokenizer.json` (SentencePiece NLLB),
//! языковые теги хранятся в словаре как `__eng__`, `__fra__`, ...
//!
//! [`UnitYUnitTokenizer`] - словарь UnitY для юнитов:
//! `[<s>, <pad>, </s>, <unk>, unit_0 .. unit_{n-1}, <lang_0> .. <lang_k>]`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use candle_core::{Device, Tensor};
use m4t_core::{
    EncodingMode, M4tError, M4tResult, TextTokenEncoder, TextTokenizer, UnitTokenEncoder,
    UnitTokenizer, VocabInfo,
};
use tracing::info;

fn id_tensor(ids: Vec<i64>) -> M4tResult<Tensor> {
    let len = ids.len();
    Ok(Tensor::from_vec(ids, len, &Device::Cpu)?)
}

// ---------------------------------------------------------------------------
// NLLB text tokenizer
// ---------------------------------------------------------------------------

/// Текстовый токенизатор NLLB поверх `tokenizers`.
pub struct NllbTokenizer {
    inner: Arc<tokenizers::Tokenizer>,
    vocab_info: VocabInfo,
}

impl NllbTokenizer {
    /// Загрузить `tokenizer.json`.
    pub fn from_file(path: impl AsRef<Path>) -> M4tResult<Self> {
        let path = path.as_ref();
        let tokenizer = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            M4tError::Tokenizer(format!("Не удалось загрузить {}: {e}", path.display()))
        })?;
        let this = Self::from_tokenizer(tokenizer)?;
        info!(
            "NLLB токенизатор {:?}: {} токенов",
            path, this.vocab_info.size
        );
        Ok(this)
    }

    /// Обернуть уже созданный токенизатор. `</s>` и `<pad>` обязаны быть в словаре.
    pub fn from_tokenizer(tokenizer: tokenizers::Tokenizer) -> M4tResult<Self> {
        let lookup = |token: &str| tokenizer.token_to_id(token).map(i64::from);
        let required = |token: &str| {
            lookup(token).ok_or_else(|| {
                M4tError::Tokenizer(format!("В словаре нет служебного токена {token}"))
            })
        };

        let vocab_info = VocabInfo {
            size: tokenizer.get_vocab_size(true),
            unk_idx: lookup("<unk>"),
            bos_idx: lookup("<s>"),
            eos_idx: required("</s>")?,
            pad_idx: required("<pad>")?,
        };

        Ok(Self {
            inner: Arc::new(tokenizer),
            vocab_info,
        })
    }

    /// Id языкового тега `__{lang}__`.
    pub fn lang_token_id(&self, lang: &str) -> M4tResult<i64> {
        self.inner
            .token_to_id(&format!("__{lang}__"))
            .map(i64::from)
            .ok_or_else(|| M4tError::Tokenizer(format!("Неподдерживаемый язык: {lang}")))
    }
}

impl TextTokenizer for NllbTokenizer {
    fn create_encoder(
        &self,
        lang: &str,
        mode: EncodingMode,
    ) -> M4tResult<Box<dyn TextTokenEncoder>> {
        let lang_tok = self.lang_token_id(lang)?;
        let eos = self.vocab_info.eos_idx;
        let (prefix, suffix) = match mode {
            EncodingMode::Source => (vec![lang_tok], vec![eos]),
            EncodingMode::Target => (vec![eos, lang_tok], Vec::new()),
        };
        Ok(Box::new(NllbEncoder {
            tokenizer: Arc::clone(&self.inner),
            prefix,
            suffix,
        }))
    }

    fn vocab_info(&self) -> VocabInfo {
        self.vocab_info
    }
}

struct NllbEncoder {
    tokenizer: Arc<tokenizers::Tokenizer>,
    prefix: Vec<i64>,
    suffix: Vec<i64>,
}

impl TextTokenEncoder for NllbEncoder {
    fn encode(&self, text: &str) -> M4tResult<Tensor> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| M4tError::Tokenizer(format!("Ошибка токенизации: {e}")))?;

        let ids = encoding.get_ids();
        let mut out = Vec::with_capacity(self.prefix.len() + ids.len() + self.suffix.len());
        out.extend_from_slice(&self.prefix);
        out.extend(ids.iter().map(|&id| i64::from(id)));
        out.extend_from_slice(&self.suffix);
        id_tensor(out)
    }
}

// ---------------------------------------------------------------------------
// UnitY unit tokenizer
// ---------------------------------------------------------------------------

const UNIT_BOS_IDX: i64 = 0;
const UNIT_PAD_IDX: i64 = 1;
const UNIT_EOS_IDX: i64 = 2;
const UNIT_UNK_IDX: i64 = 3;
/// Количество служебных символов перед юнитами.
const UNIT_NUM_SPECIAL: i64 = 4;

/// Токенизатор дискретных юнитов UnitY.
#[derive(Debug, Clone)]
pub struct UnitYUnitTokenizer {
    num_units: usize,
    langs: Vec<String>,
    lang_map: HashMap<String, usize>,
}

impl UnitYUnitTokenizer {
    /// `num_units` - размер кодбука, `langs` - поддерживаемые целевые языки.
    pub fn new(num_units: usize, langs: &[impl AsRef<str>]) -> Self {
        let langs: Vec<String> = langs.iter().map(|l| l.as_ref().to_string()).collect();
        let lang_map = langs
            .iter()
            .enumerate()
            .map(|(i, l)| (l.clone(), i))
            .collect();
        Self {
            num_units,
            langs,
            lang_map,
        }
    }

    pub fn num_units(&self) -> usize {
        self.num_units
    }

    pub fn langs(&self) -> &[String] {
        &self.langs
    }

    /// Id языкового тега.
    pub fn lang_to_index(&self, lang: &str) -> M4tResult<i64> {
        let pos = self
            .lang_map
            .get(lang)
            .ok_or_else(|| M4tError::Tokenizer(format!("Юниты: неподдерживаемый язык {lang}")))?;
        Ok(UNIT_NUM_SPECIAL + self.num_units as i64 + *pos as i64)
    }
}

impl UnitTokenizer for UnitYUnitTokenizer {
    fn create_encoder(&self, lang: &str) -> M4tResult<Box<dyn UnitTokenEncoder>> {
        Ok(Box::new(UnitYEncoder {
            prefix: [UNIT_EOS_IDX, self.lang_to_index(lang)?],
            num_units: self.num_units,
        }))
    }

    fn vocab_info(&self) -> VocabInfo {
        VocabInfo {
            size: UNIT_NUM_SPECIAL as usize + self.num_units + self.langs.len(),
            unk_idx: Some(UNIT_UNK_IDX),
            bos_idx: Some(UNIT_BOS_IDX),
            eos_idx: UNIT_EOS_IDX,
            pad_idx: UNIT_PAD_IDX,
        }
    }
}

struct UnitYEncoder {
    prefix: [i64; 2],
    num_units: usize,
}

impl UnitTokenEncoder for UnitYEncoder {
    fn encode(&self, units: &[u32]) -> M4tResult<Tensor> {
        let mut out = Vec::with_capacity(self.prefix.len() + units.len());
        out.extend_from_slice(&self.prefix);
        for &unit in units {
            if unit as usize >= self.num_units {
                return Err(M4tError::Tokenizer(format!(
                    "Юнит {unit} вне кодбука размера {}",
                    self.num_units
                )));
            }
            out.push(unit as i64 + UNIT_NUM_SPECIAL);
        }
        id_tensor(out)
    }
}
