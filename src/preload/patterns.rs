/*!
 * Navigation Patterns
 * Bounded history of observed workspace transitions
 */

use crate::core::types::WorkspaceId;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use std::collections::VecDeque;
use std::time::SystemTime;

/// One observed transition edge
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationPattern {
    pub from: WorkspaceId,
    pub to: WorkspaceId,
    pub frequency: u32,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub last_seen_at: SystemTime,
}

/// Transition history capped at `capacity` edges.
///
/// Ordered by last touch; recording an edge moves it to the back and the
/// least recently seen edge is evicted first.
#[derive(Debug, Clone)]
pub struct PatternHistory {
    capacity: usize,
    edges: VecDeque<NavigationPattern>,
}

impl PatternHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            edges: VecDeque::new(),
        }
    }

    /// Rebuild from persisted edges, keeping the most recent when over capacity
    pub fn from_patterns(capacity: usize, mut patterns: Vec<NavigationPattern>) -> Self {
        patterns.sort_by_key(|p| p.last_seen_at);
        let mut history = Self::new(capacity);
        history.edges.extend(patterns);
        history.enforce_cap();
        history
    }

    /// Count one `from -> to` transition
    pub fn record(&mut self, from: &WorkspaceId, to: &WorkspaceId, now: SystemTime) -> NavigationPattern {
        let existing = self
            .edges
            .iter()
            .position(|p| &p.from == from && &p.to == to)
            .and_then(|index| self.edges.remove(index));

        let pattern = match existing {
            Some(mut pattern) => {
                pattern.frequency = pattern.frequency.saturating_add(1);
                pattern.last_seen_at = now;
                pattern
            }
            None => NavigationPattern {
                from: from.clone(),
                to: to.clone(),
                frequency: 1,
                last_seen_at: now,
            },
        };

        self.edges.push_back(pattern.clone());
        self.enforce_cap();
        pattern
    }

    fn enforce_cap(&mut self) {
        while self.edges.len() > self.capacity {
            self.edges.pop_front();
        }
    }

    /// Edges leaving `from`
    pub fn candidates_from(&self, from: &WorkspaceId) -> Vec<NavigationPattern> {
        self.edges.iter().filter(|p| &p.from == from).cloned().collect()
    }

    pub fn get(&self, from: &WorkspaceId, to: &WorkspaceId) -> Option<&NavigationPattern> {
        self.edges.iter().find(|p| &p.from == from && &p.to == to)
    }

    /// Defensive copy, least recently seen first
    pub fn patterns(&self) -> Vec<NavigationPattern> {
        self.edges.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }
}
