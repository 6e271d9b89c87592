use super::Vote;
use crate::models::{Decision, Direction};

/// Combines the cycle's votes into one directional decision.
///
/// Majority by raw vote count, ties broken by the higher weighted-average
/// confidence. The gate fails closed: too few votes or a winning
/// confidence below the minimum means no decision at all.
pub struct DecisionAggregator {
    min_votes: usize,
    min_confidence: f64,
}

impl DecisionAggregator {
    pub fn new(min_votes: usize, min_confidence: f64) -> Self {
        Self {
            min_votes,
            min_confidence,
        }
    }

    pub fn aggregate(&self, votes: Vec<Vote>) -> Option<Decision> {
        if votes.len() < self.min_votes {
            tracing::debug!(
                "vote gate: {} votes < minimum {}",
                votes.len(),
                self.min_votes
            );
            return None;
        }

        let long_votes: Vec<&Vote> = votes
            .iter()
            .filter(|v| v.direction == Direction::Long)
            .collect();
        let short_votes: Vec<&Vote> = votes
            .iter()
            .filter(|v| v.direction == Direction::Short)
            .collect();

        let long_confidence = weighted_confidence(&long_votes);
        let short_confidence = weighted_confidence(&short_votes);

        let direction = match long_votes.len().cmp(&short_votes.len()) {
            std::cmp::Ordering::Greater => Direction::Long,
            std::cmp::Ordering::Less => Direction::Short,
            std::cmp::Ordering::Equal => {
                if long_confidence >= short_confidence {
                    Direction::Long
                } else {
                    Direction::Short
                }
            }
        };

        let (confidence, votes_for, votes_against) = match direction {
            Direction::Long => (long_confidence, long_votes.len(), short_votes.len()),
            Direction::Short => (short_confidence, short_votes.len(), long_votes.len()),
        };

        if confidence < self.min_confidence {
            tracing::debug!(
                "vote gate: winning confidence {:.2} < minimum {:.2}",
                confidence,
                self.min_confidence
            );
            return None;
        }

        Some(Decision {
            direction,
            confidence,
            votes_for,
            votes_against,
            total_votes: votes.len(),
            long_confidence,
            short_confidence,
            votes,
        })
    }
}

/// Weight-averaged confidence of one side's votes, 0.0 when empty.
fn weighted_confidence(votes: &[&Vote]) -> f64 {
    let total_weight: f64 = votes.iter().map(|v| v.weight).sum();
    if total_weight == 0.0 {
        return 0.0;
    }
    votes.iter().map(|v| v.confidence * v.weight).sum::<f64>() / total_weight
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(direction: Direction, confidence: f64, weight: f64) -> Vote {
        Vote {
            source: "test".to_string(),
            direction,
            confidence,
            weight,
            reason: String::new(),
        }
    }

    #[test]
    fn test_majority_wins_with_weighted_confidence() {
        let votes = vec![
            vote(Direction::Long, 0.6, 1.0),
            vote(Direction::Long, 0.7, 1.0),
            vote(Direction::Long, 0.8, 1.0),
            vote(Direction::Long, 0.5, 1.0),
            vote(Direction::Long, 0.9, 1.0),
            vote(Direction::Short, 0.9, 1.0),
            vote(Direction::Short, 0.9, 1.0),
        ];

        let aggregator = DecisionAggregator::new(3, 0.6);
        let decision = aggregator.aggregate(votes).unwrap();

        assert_eq!(decision.direction, Direction::Long);
        assert!((decision.confidence - 0.70).abs() < 1e-9);
        assert_eq!(decision.votes_for, 5);
        assert_eq!(decision.votes_against, 2);
        assert_eq!(decision.total_votes, 7);
    }

    #[test]
    fn test_tie_broken_by_confidence() {
        let votes = vec![
            vote(Direction::Long, 0.9, 1.0),
            vote(Direction::Long, 0.9, 1.0),
            vote(Direction::Short, 0.7, 1.0),
            vote(Direction::Short, 0.7, 1.0),
        ];

        let aggregator = DecisionAggregator::new(3, 0.6);
        let decision = aggregator.aggregate(votes).unwrap();
        assert_eq!(decision.direction, Direction::Long);
    }

    #[test]
    fn test_weights_skew_the_average() {
        // One heavy high-confidence vote dominates two light weak ones
        let votes = vec![
            vote(Direction::Long, 0.9, 3.0),
            vote(Direction::Long, 0.3, 0.5),
            vote(Direction::Long, 0.3, 0.5),
        ];

        let aggregator = DecisionAggregator::new(3, 0.6);
        let decision = aggregator.aggregate(votes).unwrap();
        // (0.9*3 + 0.3*0.5 + 0.3*0.5) / 4 = 0.75
        assert!((decision.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_gate_too_few_votes() {
        let votes = vec![
            vote(Direction::Long, 0.9, 1.0),
            vote(Direction::Long, 0.9, 1.0),
        ];
        let aggregator = DecisionAggregator::new(3, 0.6);
        assert!(aggregator.aggregate(votes).is_none());
    }

    #[test]
    fn test_gate_low_confidence() {
        let votes = vec![
            vote(Direction::Long, 0.5, 1.0),
            vote(Direction::Long, 0.5, 1.0),
            vote(Direction::Long, 0.5, 1.0),
        ];
        let aggregator = DecisionAggregator::new(3, 0.6);
        assert!(aggregator.aggregate(votes).is_none());
    }

    #[test]
    fn test_empty_votes_rejected() {
        let aggregator = DecisionAggregator::new(3, 0.6);
        assert!(aggregator.aggregate(Vec::new()).is_none());
    }
}
