//! Turns a set of constraints into a vary-list by greedy knob assignment and
//! hands both to the engine's solver.
//!
//! For every constraint the closest knob candidate upstream of the
//! constrained element is chosen. A knob element serves at most one
//! constraint per match, across all axes. Constraints are processed in
//! ascending position of their element, ties by quantity and then axis name,
//! so that repeated matches over the same constraints pick the same knobs.

use crate::{
    config::{MatchConfig, UnresolvedKnobPolicy},
    constraints::{Constraint, ConstraintSet},
    element::{Element, ElementInfo},
    engine::{KnobRef, MatchConstraint, MatchRequest, relabel},
    error::{EngineError, ErrorCode},
    hooks::Hooks,
    segment::Segment,
    transform::AxisTransform,
    units::{Quantity, RawParams},
    variables::VariablePool,
};
use itertools::Itertools;
use log::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchEvent {
    Start,
    Stop,
    Matched,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KnobResolution {
    Resolved(KnobRef),
    Unresolved,
}

/// Picks the parameter of `element` to vary. Parameters bound to a knob
/// expression win; otherwise the first non-zero literal is used.
pub fn resolve_knob(element: &Element, params: &[String]) -> KnobResolution {
    let expression = params
        .iter()
        .filter_map(|name| element.param(name))
        .find_map(|param| param.expression.clone());
    if let Some(expr) = expression {
        return KnobResolution::Resolved(KnobRef::Expression(expr));
    }
    params
        .iter()
        .find(|name| {
            element
                .param(name)
                .map(|param| param.value.value != 0.0)
                .unwrap_or(false)
        })
        .map(|name| KnobResolution::Resolved(KnobRef::path(&element.name, name)))
        .unwrap_or(KnobResolution::Unresolved)
}

/// A constraint after the axis transform.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetEntry {
    pub axis: String,
    pub quantity: String,
    pub element: ElementInfo,
    pub target: Quantity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub axis: String,
    pub constraint: ElementInfo,
    pub knob_element: ElementInfo,
    pub knob: KnobRef,
}

/// Everything the solver will be given, plus what was left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchPlan {
    pub vary: Vec<KnobRef>,
    pub assignments: Vec<Assignment>,
    pub constraints: Vec<MatchConstraint>,
    /// Transformed constraints with no knob upstream.
    pub unassigned: Vec<TargetEntry>,
    /// Constraints on elements outside the segment range.
    pub ignored: Vec<Constraint>,
    pub twiss_init: RawParams,
}

pub struct Matching {
    config: MatchConfig,
    constraints: ConstraintSet,
    pool: VariablePool,
    pub hooks: Hooks<MatchEvent>,
}

impl Matching {
    pub fn new(config: MatchConfig) -> Self {
        Self {
            config,
            constraints: ConstraintSet::new(),
            pool: VariablePool::new(),
            hooks: Hooks::new(),
        }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    pub fn constraints_mut(&mut self) -> &mut ConstraintSet {
        &mut self.constraints
    }

    pub fn add_constraint(&mut self, axis: &str, element: ElementInfo, target: Quantity) {
        self.constraints.add(axis, element, target);
    }

    pub fn remove_constraint(&mut self, axis: &str, element: &ElementInfo) -> bool {
        self.constraints.remove(axis, element)
    }

    pub fn find_constraint(&self, axis: &str, element: &ElementInfo) -> Vec<&Constraint> {
        self.constraints.find(axis, element)
    }

    pub fn clear_constraints(&mut self) {
        self.constraints.clear();
    }

    /// Ends the session: all constraints are dropped.
    pub fn stop(&mut self) {
        self.constraints.clear();
        self.pool.invalidate();
        self.hooks.emit(MatchEvent::Stop);
    }

    /// Builds the solver request for the current constraints without
    /// touching the engine.
    pub fn plan(&mut self, segment: &Segment) -> Result<MatchPlan, EngineError> {
        let mut plan = MatchPlan {
            twiss_init: segment.raw_twiss_init()?,
            ..MatchPlan::default()
        };

        let transform = AxisTransform::new(&self.config.axes, segment.summary(), segment.units());
        let mut entries: Vec<TargetEntry> = Vec::new();
        for constraint in self.constraints.iter() {
            if !segment.contains(&constraint.element) {
                warn!(
                    "Ignoring {} constraint at {}: outside of segment",
                    constraint.axis, constraint.element
                );
                plan.ignored.push(constraint.clone());
                continue;
            }
            let (quantity, target) = transform.apply(&constraint.axis, &constraint.target)?;
            entries.push(TargetEntry {
                axis: constraint.axis.clone(),
                quantity,
                element: constraint.element.clone(),
                target,
            });
        }
        entries.sort_by(|a, b| {
            a.element
                .at
                .value
                .total_cmp(&b.element.at.value)
                .then_with(|| a.quantity.cmp(&b.quantity))
                .then_with(|| a.axis.cmp(&b.axis))
        });

        let axes: Vec<&str> = entries
            .iter()
            .map(|entry| entry.axis.as_str())
            .unique()
            .collect();
        let config = &self.config;
        let mut pools = self.pool.working_set(
            segment,
            axes.into_iter().map(|axis| (axis, config.rules_for(axis))),
        );

        for entry in &entries {
            let Some(candidate) = pools
                .closest_upstream(&entry.axis, entry.element.at.value)
                .cloned()
            else {
                warn!(
                    "No knob upstream of {} for {}; leaving it unassigned",
                    entry.element, entry.axis
                );
                plan.unassigned.push(entry.clone());
                continue;
            };
            let element = segment
                .elements()
                .get(candidate.element.index)
                .filter(|e| e.name == candidate.element.name)
                .ok_or_else(|| {
                    EngineError::new(
                        ErrorCode::Internal,
                        format!("Knob candidate {} is not part of the segment", candidate.element),
                    )
                })?;
            match resolve_knob(element, &candidate.params) {
                KnobResolution::Resolved(knob) => {
                    debug!(
                        "{} at {}: varying {knob} on {}",
                        entry.axis, entry.element, candidate.element
                    );
                    pools.remove_everywhere(&candidate.element.name);
                    plan.vary.push(knob.clone());
                    plan.assignments.push(Assignment {
                        axis: entry.axis.clone(),
                        constraint: entry.element.clone(),
                        knob_element: candidate.element.clone(),
                        knob,
                    });
                }
                KnobResolution::Unresolved => match config.unresolved_knob {
                    UnresolvedKnobPolicy::Abort => {
                        return Err(EngineError::new(
                            ErrorCode::KnobResolutionFailed,
                            format!(
                                "No modifiable parameter among {:?} on {} for the {} constraint at {}",
                                candidate.params, candidate.element, entry.axis, entry.element
                            ),
                        ));
                    }
                    UnresolvedKnobPolicy::Skip => {
                        warn!(
                            "Skipping knob {} for {} at {}: no modifiable parameter",
                            candidate.element, entry.axis, entry.element
                        );
                        pools.remove_from(&entry.axis, &candidate.element.name);
                        plan.unassigned.push(entry.clone());
                    }
                },
            }
        }

        let units = segment.units();
        for entry in &entries {
            plan.constraints.push(MatchConstraint {
                range: entry.element.name.clone(),
                quantity: entry.quantity.clone(),
                value: units.strip_unit(&entry.quantity, &entry.target)?,
            });
        }
        Ok(plan)
    }

    /// Runs the solver for the current constraints and refreshes the
    /// segment's optics. Nothing is sent if there are no constraints.
    pub fn match_constraints(&mut self, segment: &mut Segment) -> Result<MatchPlan, EngineError> {
        let plan = self.plan(segment)?;
        if plan.constraints.is_empty() {
            debug!("Nothing to match");
            return Ok(plan);
        }
        let request = MatchRequest {
            sequence: segment.sequence().to_string(),
            vary: plan.vary.clone(),
            constraints: plan.constraints.clone(),
            twiss_init: plan.twiss_init.clone(),
        };
        debug!(
            "MATCH {}: vary [{}]",
            request.sequence,
            request.vary.iter().join(", ")
        );
        segment
            .engine()
            .borrow_mut()
            .match_optics(&request)
            .map_err(|e| relabel(e, ErrorCode::MatchFailed))?;
        segment.twiss()?;
        info!(
            "Matched {} constraints with {} knobs",
            plan.constraints.len(),
            plan.vary.len()
        );
        self.hooks.emit(MatchEvent::Matched);
        Ok(plan)
    }
}

impl std::fmt::Debug for Matching {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matching")
            .field("constraints", &self.constraints.len())
            .field("pool", &self.pool)
            .finish()
    }
}
