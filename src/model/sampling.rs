use std::cmp::Ordering;

use rand::Rng;

use crate::error::ServiceError;

pub fn apply_temperature(logits: &[f32], temperature: f64) -> Vec<f32> {
    let temperature = temperature as f32;
    logits.iter().map(|&l| l / temperature).collect()
}

/// Nucleus sampling: draws from the smallest set of most likely tokens whose
/// probability mass reaches `top_p`. At least one token is always kept.
pub fn sample_top_p<R: Rng + ?Sized>(
    scores: &[f32],
    top_p: f64,
    rng: &mut R,
) -> Result<u32, ServiceError> {
    if scores.is_empty() {
        return Err(ServiceError::Backend("empty score vector".to_string()));
    }

    let max = scores
        .iter()
        .map(|&s| s as f64)
        .fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return Err(ServiceError::Backend("every token is masked".to_string()));
    }

    let mut probs: Vec<(usize, f64)> = scores
        .iter()
        .enumerate()
        .map(|(id, &s)| (id, (s as f64 - max).exp()))
        .collect();
    let total: f64 = probs.iter().map(|(_, p)| p).sum();
    probs.iter_mut().for_each(|(_, p)| *p /= total);
    probs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let mut kept = 0;
    let mut mass = 0.0;
    for (_, p) in &probs {
        kept += 1;
        mass += p;
        if mass >= top_p {
            break;
        }
    }
    probs.truncate(kept);

    let mut draw = rng.gen_range(0.0..mass);
    for &(id, p) in &probs {
        if draw < p {
            return Ok(id as u32);
        }
        draw -= p;
    }
    // Rounding can leave a sliver of mass past the last kept token.
    Ok(probs[kept - 1].0 as u32)
}
