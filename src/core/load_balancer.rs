//! Instance selection: the shared round-robin cursor and the per-request
//! random draw without replacement used by the failover loop.
use std::{
    collections::HashSet,
    sync::atomic::{AtomicUsize, Ordering},
};

use rand::Rng;

use crate::core::instance::{Instance, InstanceRegistry};

/// Trait defining how the failover loop draws the next instance from the
/// not-yet-tried candidates.
pub trait LoadBalancingStrategy: Send + Sync + 'static {
    /// Select one of `candidates`, or `None` when there are none
    fn select<'a>(&self, candidates: &[&'a Instance]) -> Option<&'a Instance>;
    /// Create a new instance of this strategy as a boxed trait object
    fn boxed(self) -> Box<dyn LoadBalancingStrategy>
    where
        Self: Sized,
    {
        Box::new(self)
    }
}

/// Uniform random selection
#[derive(Debug, Default)]
pub struct RandomStrategy;

impl RandomStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancingStrategy for RandomStrategy {
    fn select<'a>(&self, candidates: &[&'a Instance]) -> Option<&'a Instance> {
        if candidates.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..candidates.len());
        Some(candidates[index])
    }
}

/// Names of the instances already attempted for one inbound request.
#[derive(Debug, Default)]
pub struct TriedSet {
    names: HashSet<String>,
}

impl TriedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt. Returns `false` if the name was already present.
    pub fn insert(&mut self, name: &str) -> bool {
        self.names.insert(name.to_string())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Registry instances not yet attempted, in registry order.
    pub fn available<'a>(&self, registry: &'a InstanceRegistry) -> Vec<&'a Instance> {
        registry
            .iter()
            .filter(|instance| !self.contains(instance.name()))
            .collect()
    }
}

/// Cyclic picker over a fixed registry. The cursor is shared by every caller
/// and always stays in `0..len`.
#[derive(Debug)]
pub struct RoundRobinSelector {
    registry: InstanceRegistry,
    cursor: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new(registry: InstanceRegistry) -> Self {
        Self {
            registry,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Start from an arbitrary position (wrapped into range).
    pub fn with_cursor(registry: InstanceRegistry, start: usize) -> Self {
        let start = if registry.is_empty() {
            0
        } else {
            start % registry.len()
        };
        Self {
            registry,
            cursor: AtomicUsize::new(start),
        }
    }

    /// Current cursor position.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Claim the current position and advance the cursor in one atomic step.
    fn advance(&self) -> Option<usize> {
        let len = self.registry.len();
        if len == 0 {
            return None;
        }
        self.cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
            .ok()
    }

    /// Next instance in rotation order.
    pub fn next(&self) -> Option<&Instance> {
        self.advance().and_then(|index| self.registry.get(index))
    }

    /// Every instance exactly once, starting at the claimed position and
    /// following rotation order. Advances the shared cursor by one.
    pub fn rotation(&self) -> impl Iterator<Item = &Instance> {
        let len = self.registry.len();
        let start = self.advance().unwrap_or(0);
        (0..len).filter_map(move |offset| self.registry.get((start + offset) % len))
    }
}
