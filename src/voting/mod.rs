// Voting layer: independent scoring rules feeding one aggregate decision
pub mod aggregator;
pub mod voters;

pub use aggregator::DecisionAggregator;

use crate::models::{OracleSignal, Vote};

/// Everything a voting rule may look at for one evaluation cycle.
///
/// All inputs are plain values gathered up front so that rules stay pure
/// and non-blocking. A missing input simply means the rules that need it
/// abstain.
#[derive(Debug)]
pub struct VoteContext<'a> {
    /// Current instrument price (YES probability).
    pub price: f64,
    /// Rolling price history in chronological order.
    pub history: &'a [f64],
    /// Fresh oracle signal, None when expired or unavailable.
    pub oracle: Option<&'a OracleSignal>,
    /// Cached directional bias from historical outcomes, 0.0 = neutral.
    pub prior_bias: f64,
}

/// One independent voting rule.
///
/// Rules are pure functions of the context: no I/O, no shared state.
/// Any failure or insufficient input means abstention (`None`), never
/// an error that could poison the cycle.
pub trait Voter: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, ctx: &VoteContext) -> Option<Vote>;
}

/// Registry of voting rules, polled once per decision cycle.
pub struct VoterPool {
    voters: Vec<Box<dyn Voter>>,
}

impl VoterPool {
    pub fn new() -> Self {
        Self { voters: Vec::new() }
    }

    /// The production rule set with the weights the system was tuned on.
    pub fn standard() -> Self {
        use voters::*;

        let mut pool = Self::new();
        pool.register(Box::new(UltraShortMomentumVoter::new(30, 0.8)));
        pool.register(Box::new(UltraShortMomentumVoter::new(60, 0.9)));
        pool.register(Box::new(UltraShortMomentumVoter::new(120, 1.0)));
        pool.register(Box::new(PriceMomentumVoter::new(1.0)));
        pool.register(Box::new(RsiVoter::new(1.0)));
        pool.register(Box::new(VwapVoter::new(1.0)));
        pool.register(Box::new(TrendStrengthVoter::new(1.0)));
        pool.register(Box::new(OrderFlowVoter::five_minute(3.0)));
        pool.register(Box::new(OrderFlowVoter::one_minute(1.5)));
        pool.register(Box::new(OracleTrendVoter::new(1.0)));
        pool.register(Box::new(PriorBiasVoter::new(1.0)));
        pool
    }

    pub fn register(&mut self, voter: Box<dyn Voter>) {
        self.voters.push(voter);
    }

    pub fn len(&self) -> usize {
        self.voters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voters.is_empty()
    }

    /// Poll every rule; abstentions are dropped.
    pub fn collect(&self, ctx: &VoteContext) -> Vec<Vote> {
        let mut votes = Vec::new();
        for voter in &self.voters {
            if let Some(vote) = voter.evaluate(ctx) {
                tracing::debug!(
                    "vote: {} -> {} ({:.0}%) {}",
                    vote.source,
                    vote.direction.as_str(),
                    vote.confidence * 100.0,
                    vote.reason
                );
                votes.push(vote);
            }
        }
        votes
    }
}

impl Default for VoterPool {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;

    struct FixedVoter(Option<Direction>);

    impl Voter for FixedVoter {
        fn name(&self) -> &str {
            "Fixed"
        }

        fn evaluate(&self, _ctx: &VoteContext) -> Option<Vote> {
            self.0.map(|direction| Vote {
                source: "Fixed".to_string(),
                direction,
                confidence: 0.8,
                weight: 1.0,
                reason: "fixed".to_string(),
            })
        }
    }

    #[test]
    fn test_pool_drops_abstentions() {
        let mut pool = VoterPool::new();
        pool.register(Box::new(FixedVoter(Some(Direction::Long))));
        pool.register(Box::new(FixedVoter(None)));
        pool.register(Box::new(FixedVoter(Some(Direction::Short))));

        let ctx = VoteContext {
            price: 0.5,
            history: &[],
            oracle: None,
            prior_bias: 0.0,
        };

        let votes = pool.collect(&ctx);
        assert_eq!(votes.len(), 2);
    }

    #[test]
    fn test_standard_pool_size() {
        assert_eq!(VoterPool::standard().len(), 11);
    }
}
