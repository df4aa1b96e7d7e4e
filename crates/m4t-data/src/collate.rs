//! Padding and stacking of variable-length sequences.

use candle_core::{Device, Tensor};
use m4t_core::{M4tError, M4tResult, SeqsBatch};

/// Right-pad every tensor along dim 0 to the longest one and stack them
/// into a new leading batch dimension.
///
/// Trailing dimensions must agree. Used for fbank matrices `[time, mels]`
/// as well as 1-D token sequences.
pub fn pad_and_stack(seqs: &[Tensor], pad_value: f64) -> M4tResult<Tensor> {
    let max_len = seqs
        .iter()
        .map(|t| t.dims().first().copied().unwrap_or(0))
        .max()
        .ok_or_else(|| M4tError::EmptyBatch("nothing to collate".into()))?;

    let mut padded = Vec::with_capacity(seqs.len());
    for seq in seqs {
        let len = seq.dim(0)?;
        if len == max_len {
            padded.push(seq.clone());
            continue;
        }
        let mut pad_shape = seq.dims().to_vec();
        pad_shape[0] = max_len - len;
        let pad = Tensor::zeros(pad_shape, seq.dtype(), seq.device())?.affine(1.0, pad_value)?;
        if len == 0 {
            padded.push(pad);
        } else {
            padded.push(Tensor::cat(&[seq, &pad], 0)?);
        }
    }

    Ok(Tensor::stack(&padded, 0)?)
}

/// 1-D `i64` tensor of per-sample lengths.
pub fn lengths_tensor(lengths: &[usize]) -> M4tResult<Tensor> {
    let data: Vec<i64> = lengths.iter().map(|&l| l as i64).collect();
    Ok(Tensor::from_vec(data, lengths.len(), &Device::Cpu)?)
}

/// Decoder-input and target views of a batch of token sequences.
#[derive(Debug, Clone)]
pub struct ShiftedTargets {
    /// `S[..n-1]` per sample, padded.
    pub prev_output_tokens: Tensor,
    /// `S[1..]` per sample, padded.
    pub target_tokens: Tensor,
    /// `n - 1` per sample.
    pub target_lengths: Tensor,
}

impl ShiftedTargets {
    /// Target side only; source tensors absent.
    pub fn into_seqs_batch(self) -> SeqsBatch {
        SeqsBatch {
            src_tokens: None,
            src_lengths: None,
            target_tokens: Some(self.target_tokens),
            prev_output_tokens: Some(self.prev_output_tokens),
            target_lengths: Some(self.target_lengths),
        }
    }
}

/// Build `prev_output_tokens` / `target_tokens` from full tokenized sequences.
pub fn shift_targets(seqs: &[Tensor], pad_idx: i64) -> M4tResult<ShiftedTargets> {
    let mut prev = Vec::with_capacity(seqs.len());
    let mut target = Vec::with_capacity(seqs.len());
    let mut lengths = Vec::with_capacity(seqs.len());

    for seq in seqs {
        let n = seq.dim(0)?;
        if n == 0 {
            return Err(M4tError::Tokenizer("empty token sequence".into()));
        }
        prev.push(seq.narrow(0, 0, n - 1)?);
        target.push(seq.narrow(0, 1, n - 1)?);
        lengths.push(n - 1);
    }

    Ok(ShiftedTargets {
        prev_output_tokens: pad_and_stack(&prev, pad_idx as f64)?,
        target_tokens: pad_and_stack(&target, pad_idx as f64)?,
        target_lengths: lengths_tensor(&lengths)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn ids(v: &[i64]) -> Tensor {
        Tensor::new(v, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_pad_tokens_right() {
        let batch = pad_and_stack(&[ids(&[5, 6, 7]), ids(&[8])], 1.0).unwrap();
        assert_eq!(batch.dtype(), DType::I64);
        assert_eq!(
            batch.to_vec2::<i64>().unwrap(),
            vec![vec![5, 6, 7], vec![8, 1, 1]]
        );
    }

    #[test]
    fn test_pad_features_keeps_trailing_dims() {
        let dev = Device::Cpu;
        let a = Tensor::ones((4, 3), DType::F16, &dev).unwrap();
        let b = Tensor::ones((2, 3), DType::F16, &dev).unwrap();

        let batch = pad_and_stack(&[a, b], 0.0).unwrap();
        assert_eq!(batch.dims(), &[2, 4, 3]);
        assert_eq!(batch.dtype(), DType::F16);

        let rows = batch.to_dtype(DType::F32).unwrap().to_vec3::<f32>().unwrap();
        assert_eq!(rows[1][1], vec![1.0, 1.0, 1.0]);
        assert_eq!(rows[1][2], vec![0.0, 0.0, 0.0]);
        assert_eq!(rows[1][3], vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_equal_lengths_are_plain_stack() {
        let seqs = [ids(&[1, 2]), ids(&[3, 4])];
        let padded = pad_and_stack(&seqs, 99.0).unwrap();
        let stacked = Tensor::stack(&seqs, 0).unwrap();
        assert_eq!(
            padded.to_vec2::<i64>().unwrap(),
            stacked.to_vec2::<i64>().unwrap()
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            pad_and_stack(&[], 0.0),
            Err(M4tError::EmptyBatch(_))
        ));
    }

    #[test]
    fn test_shift_invariant() {
        let seqs = [ids(&[2, 7, 10, 11, 2]), ids(&[2, 7, 12, 2])];
        let shifted = shift_targets(&seqs, 1).unwrap();

        assert_eq!(
            shifted.prev_output_tokens.to_vec2::<i64>().unwrap(),
            vec![vec![2, 7, 10, 11], vec![2, 7, 12, 1]]
        );
        assert_eq!(
            shifted.target_tokens.to_vec2::<i64>().unwrap(),
            vec![vec![7, 10, 11, 2], vec![7, 12, 2, 1]]
        );
        assert_eq!(shifted.target_lengths.to_vec1::<i64>().unwrap(), vec![4, 3]);
    }

    #[test]
    fn test_into_seqs_batch_has_no_source() {
        let batch = shift_targets(&[ids(&[2, 5, 2])], 1).unwrap().into_seqs_batch();
        assert!(batch.src_tokens.is_none());
        assert!(batch.src_lengths.is_none());
        assert_eq!(batch.batch_size(), Some(1));
        assert!(batch.validate().is_ok());
    }
}
