//! Token selection from logits.
//!
//! Greedy argmax unless `do_sample` is set; sampling applies temperature, top-k and
//! top-p (nucleus) filtering, then draws from a seeded xorshift64 RNG so a given seed
//! reproduces the same continuation.

use infer_engine::GenerationParams;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SamplingError {
    #[error("empty logits")]
    EmptyLogits,
    #[error("temperature must be > 0")]
    InvalidTemperature,
    #[error("no valid tokens after filtering")]
    NoValidTokens,
}

pub type SamplingResult<T> = std::result::Result<T, SamplingError>;

/// Deterministic RNG for reproducible sampling.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        // Zero state would produce all zeros.
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Next float in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        (self.state >> 40) as f32 / (1u64 << 24) as f32
    }
}

#[derive(Debug, Clone)]
enum Strategy {
    Greedy,
    Sample {
        temperature: f32,
        top_k: Option<usize>,
        top_p: Option<f32>,
    },
}

/// Picks the next token for one generation call. Mutated on each draw.
#[derive(Debug, Clone)]
pub struct Sampler {
    strategy: Strategy,
    rng: SeededRng,
}

impl Sampler {
    pub fn greedy() -> Self {
        Self {
            strategy: Strategy::Greedy,
            rng: SeededRng::new(1),
        }
    }

    pub fn from_params(params: &GenerationParams) -> Self {
        let strategy = if params.do_sample {
            Strategy::Sample {
                temperature: params.temperature,
                top_k: params.top_k,
                top_p: params.top_p,
            }
        } else {
            Strategy::Greedy
        };
        Self {
            strategy,
            rng: SeededRng::new(params.seed),
        }
    }

    pub fn is_greedy(&self) -> bool {
        matches!(self.strategy, Strategy::Greedy)
    }

    /// Sample a token index from logits.
    pub fn sample(&mut self, logits: &[f32]) -> SamplingResult<usize> {
        if logits.is_empty() {
            return Err(SamplingError::EmptyLogits);
        }

        let (temperature, top_k, top_p) = match self.strategy {
            Strategy::Greedy => return Ok(Self::argmax(logits)),
            Strategy::Sample {
                temperature,
                top_k,
                top_p,
            } => (temperature, top_k, top_p),
        };
        if temperature <= 0.0 {
            return Err(SamplingError::InvalidTemperature);
        }

        let mut work: Vec<f32> = logits.iter().map(|l| l / temperature).collect();
        if let Some(k) = top_k {
            Self::apply_top_k(&mut work, k);
        }

        let mut probs = Self::softmax(&work);
        if let Some(p) = top_p {
            probs = Self::apply_top_p(&probs, p);
        }

        self.draw(&probs)
    }

    fn apply_top_k(logits: &mut [f32], k: usize) {
        if k == 0 || k >= logits.len() {
            return;
        }

        let mut sorted = logits.to_vec();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let threshold = sorted[k - 1];
        for logit in logits.iter_mut() {
            if *logit < threshold {
                *logit = f32::NEG_INFINITY;
            }
        }
    }

    fn apply_top_p(probs: &[f32], p: f32) -> Vec<f32> {
        let mut sorted = probs.to_vec();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        let mut cumsum = 0.0;
        let mut cutoff = sorted[0];
        for prob in sorted {
            cumsum += prob;
            cutoff = prob;
            if cumsum >= p {
                break;
            }
        }

        let mut kept: Vec<f32> = probs
            .iter()
            .map(|&pr| if pr >= cutoff { pr } else { 0.0 })
            .collect();
        let sum: f32 = kept.iter().sum();
        if sum > 0.0 {
            for pr in &mut kept {
                *pr /= sum;
            }
        }
        kept
    }

    fn softmax(logits: &[f32]) -> Vec<f32> {
        let max_logit = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|&l| (l - max_logit).exp()).collect();
        let sum: f32 = exps.iter().sum();

        if sum > 0.0 {
            exps.iter().map(|&e| e / sum).collect()
        } else {
            vec![1.0 / logits.len() as f32; logits.len()]
        }
    }

    fn argmax(values: &[f32]) -> usize {
        values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }

    fn draw(&mut self, probs: &[f32]) -> SamplingResult<usize> {
        let r = self.rng.next_f32();
        let mut cumsum = 0.0;
        for (i, &prob) in probs.iter().enumerate() {
            cumsum += prob;
            if r < cumsum {
                return Ok(i);
            }
        }

        // Rounding can leave cumsum just under r.
        probs
            .iter()
            .rposition(|&prob| prob > 0.0)
            .ok_or(SamplingError::NoValidTokens)
    }
}
