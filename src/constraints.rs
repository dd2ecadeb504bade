//! Per-axis target values at specific elements.

use crate::{element::ElementInfo, hooks::Hooks, units::Quantity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub axis: String,
    pub element: ElementInfo,
    pub target: Quantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintEvent {
    Added,
    Removed,
    Cleared,
}

/// At most one constraint per `(axis, element)`; elements are compared by
/// name. Axes without constraints are dropped from the mapping.
#[derive(Debug, Default)]
pub struct ConstraintSet {
    by_axis: BTreeMap<String, Vec<Constraint>>,
    pub hooks: Hooks<ConstraintEvent>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any constraint already set for `(axis, element)`.
    pub fn add(&mut self, axis: &str, element: ElementInfo, target: Quantity) {
        self.take(axis, &element.name);
        self.by_axis
            .entry(axis.to_string())
            .or_default()
            .push(Constraint {
                axis: axis.to_string(),
                element,
                target,
            });
        self.hooks.emit(ConstraintEvent::Added);
    }

    /// Returns true if a constraint was removed.
    pub fn remove(&mut self, axis: &str, element: &ElementInfo) -> bool {
        let removed = self.take(axis, &element.name);
        if removed {
            self.hooks.emit(ConstraintEvent::Removed);
        }
        removed
    }

    fn take(&mut self, axis: &str, name: &str) -> bool {
        let Some(list) = self.by_axis.get_mut(axis) else {
            return false;
        };
        let before = list.len();
        list.retain(|c| c.element.name != name);
        let removed = list.len() < before;
        if list.is_empty() {
            self.by_axis.remove(axis);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.by_axis.clear();
        self.hooks.emit(ConstraintEvent::Cleared);
    }

    pub fn find(&self, axis: &str, element: &ElementInfo) -> Vec<&Constraint> {
        self.get(axis)
            .iter()
            .filter(|c| c.element.name == element.name)
            .collect()
    }

    pub fn get(&self, axis: &str) -> &[Constraint] {
        self.by_axis.get(axis).map(|l| l.as_slice()).unwrap_or(&[])
    }

    pub fn contains_axis(&self, axis: &str) -> bool {
        self.by_axis.contains_key(axis)
    }

    pub fn axes(&self) -> impl Iterator<Item = &str> {
        self.by_axis.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.by_axis.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_axis.values().map(|l| l.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_axis.is_empty()
    }
}
