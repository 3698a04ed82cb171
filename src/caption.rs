use crate::{error::CaptionError, model::CaptionModel, source::DecodedImage};

/// Tokens the tokenizer may leave behind that never belong in a caption.
pub const CONTROL_TOKENS: [&str; 6] = ["[CLS]", "[SEP]", "[PAD]", "[UNK]", "[MASK]", "[DEC]"];

/// Decoding configuration for caption generation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationConfig {
    /// Number of hypotheses kept alive at every step.
    pub num_beams: usize,
    /// Maximum sequence length, start token included.
    pub max_length: usize,
    /// Exponent applied to the length when ranking finished hypotheses.
    pub length_penalty: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            num_beams: 5,
            max_length: 50,
            length_penalty: 1.0,
        }
    }
}

#[derive(Clone, Debug)]
struct Beam {
    tokens: Vec<u32>,
    logprob: f32,
}

impl Beam {
    fn score(&self, length_penalty: f32) -> f32 {
        self.logprob / (self.tokens.len() as f32).powf(length_penalty)
    }
}

/// Generates a caption for an already decoded image.
///
/// Runs the image encoder once, searches the token sequence with beam search and decodes
/// it, dropping every control token. Any model failure is reported as an inference error.
///
/// # Arguments
///
/// * `image` - The rgb8 image to caption
/// * `model` - The loaded captioning model
/// * `config` - The decoding configuration
///
/// # Returns
///
/// * `caption` - The generated caption, never empty
pub fn generate<M: CaptionModel>(
    image: &DecodedImage,
    model: &mut M,
    config: &GenerationConfig,
) -> Result<String, CaptionError> {
    let encoded = model.encode(image).map_err(inference_error)?;
    let tokens = beam_search(model, &encoded, config)?;
    let text = model.decode(&tokens).map_err(inference_error)?;

    let caption = strip_control_tokens(&text);
    if caption.is_empty() {
        return Err(CaptionError::Inference(
            "model produced an empty caption".to_string(),
        ));
    }

    Ok(caption)
}

/// Beam search over the model's next-token distribution.
///
/// The returned sequence starts with the model's start token and never contains the end
/// token. Candidates with equal scores are ordered by token id, so the result only
/// depends on the model outputs.
pub fn beam_search<M: CaptionModel>(
    model: &mut M,
    encoded: &M::Encoded,
    config: &GenerationConfig,
) -> Result<Vec<u32>, CaptionError> {
    let num_beams = config.num_beams.max(1);
    let eos = model.eos_token_id();

    let mut alive = vec![Beam {
        tokens: vec![model.bos_token_id()],
        logprob: 0.0,
    }];
    let mut finished: Vec<Beam> = Vec::with_capacity(num_beams + 1);

    // all live beams share the same length
    while alive
        .first()
        .is_some_and(|beam| beam.tokens.len() < config.max_length)
    {
        let mut candidates: Vec<(usize, u32, f32)> = Vec::with_capacity(alive.len() * 2 * num_beams);
        for (beam_idx, beam) in alive.iter().enumerate() {
            let logprobs = model
                .next_token_logprobs(encoded, &beam.tokens)
                .map_err(inference_error)?;
            for (token, logprob) in top_k(&logprobs, 2 * num_beams) {
                candidates.push((beam_idx, token, beam.logprob + logprob));
            }
        }

        // stable sort keeps the per-beam token order for equal scores
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut next = Vec::with_capacity(num_beams);
        for (rank, (beam_idx, token, logprob)) in candidates.into_iter().enumerate() {
            let mut tokens = alive[beam_idx].tokens.clone();
            if token == eos {
                if rank < num_beams {
                    push_finished(
                        &mut finished,
                        Beam { tokens, logprob },
                        num_beams,
                        config.length_penalty,
                    );
                }
                continue;
            }

            tokens.push(token);
            next.push(Beam { tokens, logprob });
            if next.len() == num_beams {
                break;
            }
        }

        alive = next;

        if is_done(&finished, &alive, num_beams, config.length_penalty) {
            break;
        }
    }

    for beam in alive {
        push_finished(&mut finished, beam, num_beams, config.length_penalty);
    }

    finished
        .into_iter()
        .max_by(|a, b| {
            a.score(config.length_penalty)
                .total_cmp(&b.score(config.length_penalty))
        })
        .map(|beam| beam.tokens)
        .ok_or_else(|| CaptionError::Inference("beam search produced no hypothesis".to_string()))
}

/// Removes control tokens and collapses whitespace.
pub fn strip_control_tokens(text: &str) -> String {
    let mut cleaned = text.to_string();
    for token in CONTROL_TOKENS {
        cleaned = cleaned.replace(token, " ");
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn inference_error<E: std::error::Error>(err: E) -> CaptionError {
    CaptionError::Inference(err.to_string())
}

// indices of the k largest values, best first, ties broken by the lower index
fn top_k(values: &[f32], k: usize) -> Vec<(u32, f32)> {
    let k = k.min(values.len());
    if k == 0 {
        return Vec::new();
    }

    let order = |a: &usize, b: &usize| values[*b].total_cmp(&values[*a]).then(a.cmp(b));

    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.select_nth_unstable_by(k - 1, order);
    indices.truncate(k);
    indices.sort_by(order);

    indices
        .into_iter()
        .map(|idx| (idx as u32, values[idx]))
        .collect()
}

fn push_finished(finished: &mut Vec<Beam>, beam: Beam, num_beams: usize, length_penalty: f32) {
    finished.push(beam);
    if finished.len() > num_beams {
        let worst = finished
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.score(length_penalty).total_cmp(&b.score(length_penalty)))
            .map(|(idx, _)| idx);
        if let Some(worst) = worst {
            finished.remove(worst);
        }
    }
}

fn is_done(finished: &[Beam], alive: &[Beam], num_beams: usize, length_penalty: f32) -> bool {
    let Some(best_alive) = alive.first() else {
        return true;
    };
    if finished.len() < num_beams {
        return false;
    }

    let worst_finished = finished
        .iter()
        .map(|beam| beam.score(length_penalty))
        .fold(f32::INFINITY, f32::min);

    best_alive.score(length_penalty) <= worst_finished
}
