//! Confidence arbitration
//!
//! Every dispatch target answers the same utterance; exactly one answer is
//! returned to the user. Each output is scored by its best confidence, the
//! target the user talked to last gets a small bonus, and the last output in
//! dispatch order gets a small penalty.

use crate::config::ArbiterConfig;
use sdk::errors::RouterError;
use sdk::types::DialogueOutput;
use tracing::debug;

/// Bonus for the output whose origin is the last used target
pub const STICKINESS_BIAS: f64 = 0.11;

/// Penalty for the last output in dispatch order
pub const LAST_DISPATCHED_PENALTY: f64 = 0.03;

/// Score given to outputs without reply text
pub const EMPTY_OUTPUT_SCORE: f64 = -1.0;

/// Arbitration constants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arbiter {
    pub stickiness_bias: f64,
    pub last_dispatched_penalty: f64,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self {
            stickiness_bias: STICKINESS_BIAS,
            last_dispatched_penalty: LAST_DISPATCHED_PENALTY,
        }
    }
}

impl From<&ArbiterConfig> for Arbiter {
    fn from(config: &ArbiterConfig) -> Self {
        Self {
            stickiness_bias: config.stickiness_bias,
            last_dispatched_penalty: config.last_dispatched_penalty,
        }
    }
}

/// Unadjusted score of one output
pub fn raw_score(output: &DialogueOutput) -> f64 {
    if output.text.iter().all(|line| line.is_empty()) {
        return EMPTY_OUTPUT_SCORE;
    }
    output.intent_confidence.max(output.entity_confidence)
}

impl Arbiter {
    /// Adjusted scores, in dispatch order
    pub fn score_outputs(&self, outputs: &[DialogueOutput], last_used: Option<&str>) -> Vec<f64> {
        let last_index = outputs.len().saturating_sub(1);

        outputs
            .iter()
            .enumerate()
            .map(|(i, output)| {
                let mut score = raw_score(output);
                if last_used.is_some_and(|id| id == output.origin_target_id) {
                    score += self.stickiness_bias;
                }
                if i == last_index {
                    score -= self.last_dispatched_penalty;
                }
                score
            })
            .collect()
    }

    /// Index of the winning output given adjusted scores.
    ///
    /// Strictly greater wins, so the earliest output takes exact ties. A
    /// negative best score falls back to the last output.
    pub fn select(scores: &[f64]) -> Option<usize> {
        let last = scores.len().checked_sub(1)?;

        let mut best: Option<usize> = None;
        let mut best_score = EMPTY_OUTPUT_SCORE;
        for (i, &score) in scores.iter().enumerate() {
            if score > best_score {
                best_score = score;
                best = Some(i);
            }
        }

        match best {
            Some(i) if best_score >= 0.0 => Some(i),
            _ => Some(last),
        }
    }

    /// Pick one output out of the dispatch results.
    ///
    /// # Errors
    /// `RouterError::NoViableOutput` when `outputs` is empty.
    pub fn arbitrate(
        &self,
        mut outputs: Vec<DialogueOutput>,
        last_used: Option<&str>,
    ) -> Result<DialogueOutput, RouterError> {
        let scores = self.score_outputs(&outputs, last_used);
        let winner = Self::select(&scores).ok_or(RouterError::NoViableOutput)?;

        for (output, score) in outputs.iter().zip(&scores) {
            debug!(origin = %output.origin_target_id, score, "Scored output");
        }

        Ok(outputs.swap_remove(winner))
    }
}
