use anyhow::{ensure, Result};
use candle_core::{DType, Tensor, D};

/// Average the token states selected by `attention_mask` and scale each row to
/// unit length. `[batch, tokens, hidden]` in, `[batch, hidden]` out.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, _, width) = hidden.dims3()?;
    let weights = attention_mask.to_device(hidden.device())?.to_dtype(DType::F32)?;
    let states = hidden.to_dtype(DType::F32)?;

    let summed = states.broadcast_mul(&weights.unsqueeze(D::Minus1)?)?.sum(1)?;
    // rows with an all-zero mask pool to zero instead of NaN
    let counts = weights.sum_keepdim(1)?.clamp(1f32, f32::MAX)?;
    let mean = summed.broadcast_div(&counts)?;

    let norms = mean.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-12f32, f32::MAX)?;
    let pooled = mean.broadcast_div(&norms)?;
    ensure!(pooled.dims() == [batch, width], "pooled shape {:?}, expected [{batch}, {width}]", pooled.dims());
    Ok(pooled)
}

