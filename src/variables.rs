//! Candidate knob elements per axis.

use crate::{config::KnobRules, element::ElementInfo, segment::Segment};
use log::debug;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub element: ElementInfo,
    /// Parameter names eligible as knobs, in preference order.
    pub params: Vec<String>,
}

impl Candidate {
    pub fn position(&self) -> f64 {
        self.element.at.value
    }
}

/// Lazily built candidate lists, cached per axis and tied to the segment
/// they were built from and to its element generation.
#[derive(Debug, Default)]
pub struct VariablePool {
    source: Option<(u64, u64)>,
    by_axis: BTreeMap<String, Vec<Candidate>>,
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self) {
        self.source = None;
        self.by_axis.clear();
    }

    pub fn is_cached(&self, axis: &str) -> bool {
        self.by_axis.contains_key(axis)
    }

    /// Candidates for `axis` in sequence order, restricted to the segment
    /// range and to element types listed in `rules`.
    pub fn candidates(
        &mut self,
        segment: &Segment,
        axis: &str,
        rules: Option<&KnobRules>,
    ) -> &[Candidate] {
        let source = (segment.id(), segment.generation());
        if self.source != Some(source) {
            if self.source.is_some() {
                debug!("Segment or element list changed; dropping cached knob candidates");
            }
            self.by_axis.clear();
            self.source = Some(source);
        }
        self.by_axis.entry(axis.to_string()).or_insert_with(|| {
            let Some(rules) = rules else {
                return Vec::new();
            };
            segment
                .elements()
                .iter()
                .enumerate()
                .filter(|(index, _)| segment.range().contains_index(*index))
                .filter_map(|(index, element)| {
                    rules.get(&element.kind).map(|params| Candidate {
                        element: ElementInfo::from_element(element, index),
                        params: params.clone(),
                    })
                })
                .collect()
        })
    }

    /// Copies of the cached lists, consumed by a single match.
    pub fn working_set<'a>(
        &mut self,
        segment: &Segment,
        axes: impl IntoIterator<Item = (&'a str, Option<&'a KnobRules>)>,
    ) -> WorkingPools {
        let pools = axes
            .into_iter()
            .map(|(axis, rules)| (axis.to_string(), self.candidates(segment, axis, rules).to_vec()))
            .collect();
        WorkingPools { pools }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkingPools {
    pools: BTreeMap<String, Vec<Candidate>>,
}

impl WorkingPools {
    pub fn get(&self, axis: &str) -> &[Candidate] {
        self.pools.get(axis).map(|p| p.as_slice()).unwrap_or(&[])
    }

    /// Candidate with the largest position strictly below `position`. The
    /// first one in sequence order wins a tie.
    pub fn closest_upstream(&self, axis: &str, position: f64) -> Option<&Candidate> {
        self.get(axis)
            .iter()
            .filter(|c| c.position() < position)
            .fold(None, |best: Option<&Candidate>, c| match best {
                Some(b) if b.position() >= c.position() => Some(b),
                _ => Some(c),
            })
    }

    /// Removes the element from every axis.
    pub fn remove_everywhere(&mut self, name: &str) {
        for pool in self.pools.values_mut() {
            pool.retain(|c| c.element.name != name);
        }
    }

    pub fn remove_from(&mut self, axis: &str, name: &str) {
        if let Some(pool) = self.pools.get_mut(axis) {
            pool.retain(|c| c.element.name != name);
        }
    }
}
