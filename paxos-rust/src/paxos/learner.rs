use std::sync::RwLock;

use log::{debug, info};

use crate::error::PaxosError;
use crate::paxos::types::ProposalId;
use crate::paxos::LearnerTrait;

/// Records the highest-numbered decision it is told about.
#[derive(Debug)]
pub struct BasicLearner<V> {
    learned: RwLock<Option<(ProposalId, V)>>,
}

impl<V> BasicLearner<V> {
    pub fn new() -> Self {
        BasicLearner {
            learned: RwLock::new(None),
        }
    }
}

impl<V> Default for BasicLearner<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> BasicLearner<V> {
    /// The learned proposal and value, if any.
    pub fn learned(&self) -> Option<(ProposalId, V)> {
        self.learned
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl<V> LearnerTrait<V> for BasicLearner<V>
where
    V: Clone + std::fmt::Debug + Send + Sync,
{
    fn learn(&self, id: ProposalId, value: V) {
        let mut learned = self.learned.write().unwrap_or_else(|e| e.into_inner());
        match &*learned {
            Some((current, _)) if id.number() <= current.number() => {
                debug!(
                    "Learner: Ignoring decision {} (already learned {})",
                    id, current
                );
            }
            _ => {
                info!("Learner: Learned value {:?} from proposal {}", value, id);
                *learned = Some((id, value));
            }
        }
    }

    fn learned_value(&self) -> Result<V, PaxosError> {
        self.learned
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|(_, value)| value.clone())
            .ok_or(PaxosError::NotYetDecided)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_learned_yet() {
        let learner = BasicLearner::<String>::new();
        assert_eq!(learner.learned_value(), Err(PaxosError::NotYetDecided));
        assert_eq!(learner.learned(), None);
    }

    #[test]
    fn learn_is_idempotent() {
        let learner = BasicLearner::new();
        learner.learn(ProposalId::new(2, "P1"), "x".to_string());
        let first = learner.learned();
        learner.learn(ProposalId::new(2, "P1"), "x".to_string());
        assert_eq!(learner.learned(), first);
        assert_eq!(learner.learned_value(), Ok("x".to_string()));
    }

    #[test]
    fn older_decision_is_ignored() {
        let learner = BasicLearner::new();
        learner.learn(ProposalId::new(5, "P2"), "x".to_string());
        learner.learn(ProposalId::new(3, "P1"), "y".to_string());
        assert_eq!(
            learner.learned(),
            Some((ProposalId::new(5, "P2"), "x".to_string()))
        );
    }

    #[test]
    fn same_number_from_another_node_is_ignored() {
        let learner = BasicLearner::new();
        learner.learn(ProposalId::new(3, "A"), "x".to_string());
        learner.learn(ProposalId::new(3, "B"), "x".to_string());
        assert_eq!(
            learner.learned().map(|(id, _)| id),
            Some(ProposalId::new(3, "A")),
            "an equal number must not replace the learned decision"
        );
    }

    #[test]
    fn newer_decision_replaces_older() {
        let learner = BasicLearner::new();
        learner.learn(ProposalId::new(1, "P1"), "x".to_string());
        learner.learn(ProposalId::new(4, "P2"), "x".to_string());
        assert_eq!(learner.learned().map(|(id, _)| id), Some(ProposalId::new(4, "P2")));
    }
}
