//! Streaming accumulators behind stateful operators.
//!
//! Each fit worker feeds its partitions into its own accumulators; the
//! per-worker results are merged in worker order and finished into a
//! [`Statistic`].

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tabflow_core::ColumnValues;

use super::statistic::{Statistic, Vocabulary};
use crate::ops::token_at;

/// Partial state of one statistic.
#[derive(Debug, Clone)]
pub(crate) enum Accumulator {
    Moments { count: u64, mean: f64, m2: f64 },
    MinMax { count: u64, min: f64, max: f64 },
    Vocabulary { counts: HashMap<String, u64>, freq_threshold: u64 },
    Reservoir(Reservoir),
}

impl Accumulator {
    pub fn moments() -> Self {
        Self::Moments {
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    pub fn min_max() -> Self {
        Self::MinMax {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn vocabulary(freq_threshold: u64) -> Self {
        Self::Vocabulary {
            counts: HashMap::new(),
            freq_threshold,
        }
    }

    pub fn reservoir(capacity: usize, seed: u64) -> Self {
        Self::Reservoir(Reservoir::new(capacity, seed))
    }

    /// Folds a column in. Returns a description of the accepted types when
    /// the column cannot feed this statistic.
    pub fn observe(&mut self, values: &ColumnValues) -> Result<(), &'static str> {
        match self {
            Self::Moments { count, mean, m2 } => {
                for x in numeric(values)? {
                    *count += 1;
                    let delta = x - *mean;
                    *mean += delta / *count as f64;
                    *m2 += delta * (x - *mean);
                }
            }
            Self::MinMax { count, min, max } => {
                for x in numeric(values)? {
                    *count += 1;
                    *min = min.min(x);
                    *max = max.max(x);
                }
            }
            Self::Vocabulary { counts, .. } => {
                if matches!(values, ColumnValues::Float(_)) {
                    return Err("an integer or string column");
                }
                for i in 0..values.len() {
                    if let Some(token) = token_at(values, i) {
                        *counts.entry(token).or_default() += 1;
                    }
                }
            }
            Self::Reservoir(reservoir) => {
                for x in numeric(values)? {
                    reservoir.push(x);
                }
            }
        }
        Ok(())
    }

    /// Merges another worker's accumulator of the same kind.
    pub fn merge(&mut self, other: Self) {
        match (self, other) {
            (
                Self::Moments { count, mean, m2 },
                Self::Moments {
                    count: other_count,
                    mean: other_mean,
                    m2: other_m2,
                },
            ) => {
                if other_count == 0 {
                    return;
                }
                let total = *count + other_count;
                let delta = other_mean - *mean;
                *mean += delta * other_count as f64 / total as f64;
                *m2 += other_m2 + delta * delta * (*count as f64) * (other_count as f64) / total as f64;
                *count = total;
            }
            (
                Self::MinMax { count, min, max },
                Self::MinMax {
                    count: other_count,
                    min: other_min,
                    max: other_max,
                },
            ) => {
                *count += other_count;
                *min = min.min(other_min);
                *max = max.max(other_max);
            }
            (Self::Vocabulary { counts, .. }, Self::Vocabulary { counts: other, .. }) => {
                for (token, n) in other {
                    *counts.entry(token).or_default() += n;
                }
            }
            (Self::Reservoir(reservoir), Self::Reservoir(other)) => reservoir.merge(other),
            (this, other) => {
                tracing::warn!(
                    target: crate::TRACING_TARGET_ENGINE,
                    left = ?this,
                    right = ?other,
                    "Ignoring merge of mismatched accumulators"
                );
            }
        }
    }

    /// Converts the accumulated state into a statistic.
    pub fn finish(self) -> Statistic {
        match self {
            Self::Moments { count, mean, m2 } => Statistic::Moments {
                count,
                mean: if count == 0 { 0.0 } else { mean },
                std: if count > 1 {
                    (m2 / (count - 1) as f64).sqrt()
                } else {
                    0.0
                },
            },
            Self::MinMax { count: 0, .. } => Statistic::MinMax { min: 0.0, max: 0.0 },
            Self::MinMax { min, max, .. } => Statistic::MinMax { min, max },
            Self::Vocabulary {
                counts,
                freq_threshold,
            } => {
                let mut tokens: Vec<String> = counts
                    .into_iter()
                    .filter(|(_, n)| *n >= freq_threshold.max(1))
                    .map(|(token, _)| token)
                    .collect();
                tokens.sort_unstable();
                // Tokens come from a map, so they are distinct.
                let tokens = Vocabulary::try_from_tokens(tokens).unwrap_or_default();
                Statistic::Vocabulary { tokens }
            }
            Self::Reservoir(reservoir) => Statistic::Median {
                value: reservoir.median(),
            },
        }
    }
}

fn numeric(values: &ColumnValues) -> Result<impl Iterator<Item = f64>, &'static str> {
    values
        .to_f64()
        .map(|v| v.into_iter().filter(|x| !x.is_nan()))
        .ok_or("a numeric column")
}

/// Uniform fixed-size sample of a stream.
#[derive(Debug, Clone)]
pub(crate) struct Reservoir {
    capacity: usize,
    seen: u64,
    sample: Vec<f64>,
    rng: StdRng,
}

impl Reservoir {
    fn new(capacity: usize, seed: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: 0,
            sample: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn push(&mut self, x: f64) {
        self.seen += 1;
        if self.sample.len() < self.capacity {
            self.sample.push(x);
        } else {
            let slot = self.rng.random_range(0..self.seen);
            if slot < self.capacity as u64 {
                self.sample[slot as usize] = x;
            }
        }
    }

    fn merge(&mut self, mut other: Self) {
        let total = self.seen + other.seen;
        if self.sample.len() + other.sample.len() <= self.capacity {
            self.sample.append(&mut other.sample);
            self.seen = total;
            return;
        }

        // Draw from each side in proportion to the rows it has seen.
        let share = self.seen as f64 / total as f64;
        let mut from_self = 0;
        for _ in 0..self.capacity {
            if self.rng.random_bool(share) {
                from_self += 1;
            }
        }
        let from_self = from_self.min(self.sample.len());
        let from_other = (self.capacity - from_self).min(other.sample.len());

        self.sample.shuffle(&mut self.rng);
        other.sample.shuffle(&mut self.rng);
        self.sample.truncate(from_self);
        self.sample.extend_from_slice(&other.sample[..from_other]);
        self.seen = total;
    }

    fn median(mut self) -> Option<f64> {
        if self.sample.is_empty() {
            return None;
        }
        self.sample.sort_unstable_by(f64::total_cmp);
        let mid = self.sample.len() / 2;
        Some(if self.sample.len() % 2 == 0 {
            (self.sample[mid - 1] + self.sample[mid]) / 2.0
        } else {
            self.sample[mid]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floats(values: &[f64]) -> ColumnValues {
        ColumnValues::Float(values.to_vec())
    }

    #[test]
    fn test_moments_merge_matches_single_pass() {
        let mut single = Accumulator::moments();
        single.observe(&floats(&[1.0, 2.0, 3.0, 4.0, 10.0])).unwrap();

        let mut left = Accumulator::moments();
        left.observe(&floats(&[1.0, 2.0])).unwrap();
        let mut right = Accumulator::moments();
        right.observe(&floats(&[3.0, 4.0, 10.0, f64::NAN])).unwrap();
        left.merge(right);

        let (Statistic::Moments { mean: a, std: sa, count: ca }, Statistic::Moments { mean: b, std: sb, count: cb }) =
            (single.finish(), left.finish())
        else {
            panic!("expected moments");
        };
        assert_eq!(ca, cb);
        assert!((a - b).abs() < 1e-12);
        assert!((sa - sb).abs() < 1e-12);
        assert!((a - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_min_max() {
        let mut acc = Accumulator::min_max();
        acc.observe(&ColumnValues::Int(vec![3, 1, 24])).unwrap();
        assert_eq!(acc.finish(), Statistic::MinMax { min: 1.0, max: 24.0 });
        assert_eq!(
            Accumulator::min_max().finish(),
            Statistic::MinMax { min: 0.0, max: 0.0 }
        );
    }

    #[test]
    fn test_vocabulary_sorted_with_threshold() {
        let mut acc = Accumulator::vocabulary(2);
        acc.observe(&ColumnValues::Str(vec![
            Some("Dog".into()),
            Some("Cat".into()),
            Some("Dog".into()),
            Some("Cat".into()),
            Some("Bird".into()),
            None,
        ]))
        .unwrap();
        let Statistic::Vocabulary { tokens } = acc.finish() else {
            panic!("expected vocabulary");
        };
        assert_eq!(tokens.tokens(), ["Cat", "Dog"]);
    }

    #[test]
    fn test_vocabulary_rejects_floats() {
        let mut acc = Accumulator::vocabulary(0);
        assert!(acc.observe(&floats(&[1.0])).is_err());
    }

    #[test]
    fn test_median() {
        let mut acc = Accumulator::reservoir(100, 7);
        acc.observe(&floats(&[5.0, 1.0, f64::NAN, 3.0])).unwrap();
        assert_eq!(acc.finish(), Statistic::Median { value: Some(3.0) });
        assert_eq!(
            Accumulator::reservoir(10, 0).finish(),
            Statistic::Median { value: None }
        );
    }

    #[test]
    fn test_reservoir_is_seeded() {
        let run = |seed| {
            let mut left = Accumulator::reservoir(16, seed);
            left.observe(&floats(&(0..500).map(f64::from).collect::<Vec<_>>()))
                .unwrap();
            let mut right = Accumulator::reservoir(16, seed + 1);
            right
                .observe(&floats(&(500..1000).map(f64::from).collect::<Vec<_>>()))
                .unwrap();
            left.merge(right);
            left.finish()
        };
        assert_eq!(run(3), run(3));
    }
}
