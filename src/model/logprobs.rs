use crate::error::ServiceError;

/// `log_softmax(logits)[index]`, over the whole vocabulary.
pub fn log_softmax_at(logits: &[f32], index: u32) -> Result<f64, ServiceError> {
    let chosen = *logits.get(index as usize).ok_or_else(|| {
        ServiceError::Backend(format!(
            "token id {index} outside score vector of size {}",
            logits.len()
        ))
    })? as f64;

    let max = logits
        .iter()
        .map(|&l| l as f64)
        .fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return Ok(f64::NEG_INFINITY);
    }
    let sum_exp: f64 = logits.iter().map(|&l| (l as f64 - max).exp()).sum();
    Ok(chosen - max - sum_exp.ln())
}

/// Logprobs of each prompt token given the tokens before it. The first token has
/// no context and gets 0.0.
pub fn prompt_logprobs(
    tokens: &[u32],
    distributions: &[Vec<f32>],
) -> Result<Vec<f64>, ServiceError> {
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let mut logprobs = Vec::with_capacity(tokens.len());
    logprobs.push(0.0);
    for (position, &next) in tokens.iter().enumerate().skip(1) {
        let distribution = distributions.get(position - 1).ok_or_else(|| {
            ServiceError::Backend(format!(
                "missing output distribution at prompt position {}",
                position - 1
            ))
        })?;
        logprobs.push(log_softmax_at(distribution, next)?);
    }
    Ok(logprobs)
}

/// Logprobs of the tokens generated after `input_length`, one per generated token,
/// scored against this sequence's own per-step scores.
pub fn generated_logprobs(
    sequence: &[u32],
    scores: &[Vec<f32>],
    input_length: usize,
) -> Result<Vec<f64>, ServiceError> {
    let generated = sequence.get(input_length..).unwrap_or_default();
    if scores.len() < generated.len() {
        return Err(ServiceError::Backend(format!(
            "{} tokens generated but only {} score rows returned",
            generated.len(),
            scores.len()
        )));
    }

    generated
        .iter()
        .zip(scores)
        .map(|(&token, step_scores)| log_softmax_at(step_scores, token))
        .collect()
}
