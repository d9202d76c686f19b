//! Add/remove delta between two desired sets

use super::types::ForwardPort;
use std::collections::HashSet;

/// Work needed to move the router from one desired set to the next
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortDelta {
    /// Ports to install
    pub to_forward: HashSet<ForwardPort>,
    /// Ports to remove
    pub to_dump: HashSet<ForwardPort>,
}

impl PortDelta {
    /// Compute the delta from `previous` to `next`
    ///
    /// With no previous set everything in `next` is forwarded; with an empty
    /// `next` everything previously desired is dumped.
    pub fn between(previous: Option<&HashSet<ForwardPort>>, next: &HashSet<ForwardPort>) -> Self {
        match previous {
            None => Self {
                to_forward: next.clone(),
                to_dump: HashSet::new(),
            },
            Some(prev) if prev.is_empty() => Self {
                to_forward: next.clone(),
                to_dump: HashSet::new(),
            },
            Some(prev) if next.is_empty() => Self {
                to_forward: HashSet::new(),
                to_dump: prev.clone(),
            },
            Some(prev) => Self {
                to_forward: next.difference(prev).cloned().collect(),
                to_dump: prev.difference(next).cloned().collect(),
            },
        }
    }

    /// Whether there is nothing to do
    pub fn is_empty(&self) -> bool {
        self.to_forward.is_empty() && self.to_dump.is_empty()
    }
}
