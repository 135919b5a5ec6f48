// Copyright (c) 2026 Ember
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Post rating: a reputation-weighted Beta posterior over up/down votes,
//! scored as the Wald lower bound on the posterior mean.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single vote direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    /// Upvote.
    Up,
    /// Downvote.
    Down,
}

/// Vote weight: `max(0.1, log10(reputation + 10))`.
pub fn vote_weight(reputation: f64) -> f64 {
    (reputation + 10.0).log10().max(0.1)
}

struct Cast {
    vote: Vote,
    weight: f64,
}

/// Sufficient statistics for a post's rating, plus per-voter bookkeeping so
/// a changed vote can subtract its old contribution before applying the new
/// one.
#[derive(Default)]
pub struct Rating {
    alpha: f64,
    beta: f64,
    total_weight: f64,
    votes: HashMap<String, Cast>,
}

impl Rating {
    /// A fresh, unvoted rating: `α = β = 1`.
    pub fn new() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            total_weight: 0.0,
            votes: HashMap::new(),
        }
    }

    /// Record (or update) `voter_handle`'s vote, given their current
    /// reputation.
    pub fn vote(&mut self, voter_handle: &str, vote: Vote, reputation: f64) {
        let weight = vote_weight(reputation);

        if let Some(prev) = self.votes.get(voter_handle) {
            match prev.vote {
                Vote::Up => self.alpha -= prev.weight,
                Vote::Down => self.beta -= prev.weight,
            }
            self.total_weight -= prev.weight;
        }

        match vote {
            Vote::Up => self.alpha += weight,
            Vote::Down => self.beta += weight,
        }
        self.total_weight += weight;
        self.votes.insert(voter_handle.to_string(), Cast { vote, weight });

        self.alpha = self.alpha.max(1.0);
        self.beta = self.beta.max(1.0);
    }

    /// The posterior score: `mean − 1.96·√(αβ / ((α+β)²(α+β+1)))`, clamped
    /// to `[0, 1]`.
    pub fn score(&self) -> f64 {
        let (a, b) = (self.alpha, self.beta);
        let sum = a + b;
        let mean = a / sum;
        let variance = (a * b) / (sum * sum * (sum + 1.0));
        (mean - 1.96 * variance.sqrt()).clamp(0.0, 1.0)
    }

    /// Total accumulated voter weight, exposed for diagnostics/UI.
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_rating_scores_at_floor() {
        let r = Rating::new();
        // mean = 0.5 but the Wald lower bound pulls an unvoted post toward 0.
        assert!(r.score() < 0.2);
    }

    #[test]
    fn upvotes_raise_score_above_downvotes() {
        let mut up = Rating::new();
        let mut down = Rating::new();
        for i in 0..20 {
            up.vote(&format!("voter{i}"), Vote::Up, 100.0);
            down.vote(&format!("voter{i}"), Vote::Down, 100.0);
        }
        assert!(up.score() > down.score());
    }

    #[test]
    fn changing_a_vote_removes_its_old_contribution() {
        let mut r = Rating::new();
        r.vote("alice", Vote::Up, 100.0);
        let after_up = r.score();
        r.vote("alice", Vote::Down, 100.0);
        let after_down = r.score();
        assert!(after_down < after_up);
    }

    #[test]
    fn vote_weight_has_floor() {
        assert_eq!(vote_weight(-9.9999), 0.1_f64.max(vote_weight(-9.9999)));
        assert!(vote_weight(0.0) > 0.0);
    }
}
