//! Interactive matching: constraints placed by pointing at a position on a
//! plotted axis.

use crate::{
    config::MatchConfig,
    error::EngineError,
    hooks::Hooks,
    matching::{MatchEvent, MatchPlan, Matching},
    segment::Segment,
    units::Quantity,
};
use log::debug;

/// Whether a new constraint replaces the existing ones or joins them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConstraintMode {
    #[default]
    Replace,
    Accumulate,
}

#[derive(Debug)]
pub struct MatchTool {
    config: MatchConfig,
    matcher: Option<Matching>,
    /// Id of the segment the running session was started on.
    segment: Option<u64>,
    pub hooks: Hooks<MatchEvent>,
}

impl MatchTool {
    pub fn new(config: MatchConfig) -> Self {
        Self {
            config,
            matcher: None,
            segment: None,
            hooks: Hooks::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.matcher.is_some()
    }

    pub fn matcher(&self) -> Option<&Matching> {
        self.matcher.as_ref()
    }

    pub fn matcher_mut(&mut self) -> Option<&mut Matching> {
        self.matcher.as_mut()
    }

    /// Begins a matching session on `segment`. A session running on the
    /// same segment is kept; one running on another segment is stopped first.
    pub fn start(&mut self, segment: &Segment) -> &mut Matching {
        if self.segment != Some(segment.id()) {
            self.stop();
        }
        if self.matcher.is_none() {
            debug!("Matching started on segment {}", segment.id());
            self.segment = Some(segment.id());
            self.hooks.emit(MatchEvent::Start);
        }
        let config = &self.config;
        self.matcher
            .get_or_insert_with(|| Matching::new(config.clone()))
    }

    /// Ends the session, dropping all of its constraints.
    pub fn stop(&mut self) {
        self.segment = None;
        if let Some(mut matcher) = self.matcher.take() {
            matcher.stop();
            self.hooks.emit(MatchEvent::Stop);
        }
    }

    /// True if the running session was started on `segment`.
    pub fn is_active_on(&self, segment: &Segment) -> bool {
        self.matcher.is_some() && self.segment == Some(segment.id())
    }

    /// Constrains `axis` at the element under `position` to `target`, holds
    /// the conjugate axis at its current value there, and matches.
    ///
    /// Returns `Ok(None)` when no session is running on `segment` or no
    /// element of the segment range lies under `position`.
    pub fn constrain_at(
        &mut self,
        segment: &mut Segment,
        axis: &str,
        position: f64,
        target: Quantity,
        mode: ConstraintMode,
    ) -> Result<Option<MatchPlan>, EngineError> {
        if self.segment != Some(segment.id()) {
            return Ok(None);
        }
        let Some(matcher) = self.matcher.as_mut() else {
            return Ok(None);
        };
        let Some(element) = segment.element_info_at(position) else {
            return Ok(None);
        };
        if !segment.contains(&element) {
            debug!("{element} lies outside of the segment; not constraining");
            return Ok(None);
        }
        if mode == ConstraintMode::Replace {
            matcher.clear_constraints();
        }
        let conjugate = self
            .config
            .conjugate(axis)
            .and_then(|conj| Some((conj, segment.get_twiss(&element, conj)?)));
        matcher.add_constraint(axis, element.clone(), target);
        if let Some((conj, value)) = conjugate {
            matcher.add_constraint(conj, element, value);
        }
        matcher.match_constraints(segment).map(Some)
    }

    /// Drops the constraints on `axis` and its conjugate at `position`.
    pub fn release_at(&mut self, segment: &Segment, axis: &str, position: f64) -> bool {
        if self.segment != Some(segment.id()) {
            return false;
        }
        let Some(matcher) = self.matcher.as_mut() else {
            return false;
        };
        let Some(element) = segment.element_info_at(position) else {
            return false;
        };
        let mut removed = matcher.remove_constraint(axis, &element);
        if let Some(conj) = self.config.conjugate(axis) {
            removed |= matcher.remove_constraint(conj, &element);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        segment::SegmentSpec,
        testing::{FakeEngine, fake_setup, init_logging},
    };
    use std::{cell::RefCell, rc::Rc};

    fn setup() -> (Rc<RefCell<FakeEngine>>, Segment, MatchTool) {
        init_logging();
        let (fake, handle, units) = fake_setup();
        let seg = Segment::new(handle, units, SegmentSpec::new("line", "q1/q2")).unwrap();
        (fake, seg, MatchTool::new(MatchConfig::default()))
    }

    #[test]
    fn test_inactive_tool_ignores_clicks() {
        let (fake, mut seg, mut tool) = setup();
        let res = tool
            .constrain_at(&mut seg, "envx", 7.0, Quantity::new(1e-3, "m"), ConstraintMode::Replace)
            .unwrap();
        assert!(res.is_none());
        assert!(fake.borrow().match_requests.is_empty());
    }

    #[test]
    fn test_click_adds_conjugate_hold() {
        let (fake, mut seg, mut tool) = setup();
        tool.start(&seg);
        let expected_envy = seg.get_twiss("D1", "envy").unwrap();
        let plan = tool
            .constrain_at(&mut seg, "envx", 7.0, Quantity::new(1e-3, "m"), ConstraintMode::Replace)
            .unwrap()
            .unwrap();
        let constraints = tool.matcher().unwrap().constraints();
        assert_eq!(constraints.len(), 2);
        let d1 = seg.get_element_info("D1").unwrap();
        assert_eq!(constraints.find("envy", &d1)[0].target, expected_envy);
        assert_eq!(plan.constraints.len(), 2);
        // Both constraints sit at D1; only Q1 is upstream, so one stays open.
        assert_eq!(plan.vary.len(), 1);
        assert_eq!(plan.unassigned.len(), 1);
        assert_eq!(fake.borrow().match_requests.len(), 1);
    }

    #[test]
    fn test_replace_and_accumulate() {
        let (_fake, mut seg, mut tool) = setup();
        tool.start(&seg);
        let target = Quantity::new(1e-3, "m");
        tool.constrain_at(&mut seg, "envx", 7.0, target.clone(), ConstraintMode::Replace)
            .unwrap();
        tool.constrain_at(&mut seg, "envx", 10.5, target.clone(), ConstraintMode::Accumulate)
            .unwrap();
        assert_eq!(tool.matcher().unwrap().constraints().len(), 4);
        tool.constrain_at(&mut seg, "envx", 10.5, target, ConstraintMode::Replace)
            .unwrap();
        assert_eq!(tool.matcher().unwrap().constraints().len(), 2);
    }

    #[test]
    fn test_click_outside_any_element() {
        let (_fake, mut seg, mut tool) = setup();
        tool.start(&seg);
        let res = tool
            .constrain_at(&mut seg, "envx", 99.0, Quantity::new(1e-3, "m"), ConstraintMode::Replace)
            .unwrap();
        assert!(res.is_none());
    }

    #[test]
    fn test_release_removes_both_axes() {
        let (_fake, mut seg, mut tool) = setup();
        tool.start(&seg);
        tool.constrain_at(&mut seg, "envx", 7.0, Quantity::new(1e-3, "m"), ConstraintMode::Replace)
            .unwrap();
        assert!(tool.release_at(&seg, "envx", 7.0));
        assert!(tool.matcher().unwrap().constraints().is_empty());
        assert!(!tool.release_at(&seg, "envx", 7.0));
    }

    #[test]
    fn test_session_is_bound_to_its_segment() {
        let (fake, mut seg, mut tool) = setup();
        let (_other_fake, handle, units) = fake_setup();
        let mut other = Segment::new(handle, units, SegmentSpec::new("line", "q1/q2")).unwrap();
        let events = Rc::new(RefCell::new(Vec::new()));
        for event in [MatchEvent::Start, MatchEvent::Stop] {
            let events = events.clone();
            tool.hooks.connect(event, move |e| events.borrow_mut().push(e));
        }
        tool.start(&seg);
        tool.constrain_at(&mut seg, "envx", 7.0, Quantity::new(1e-3, "m"), ConstraintMode::Replace)
            .unwrap();
        assert!(tool.is_active_on(&seg));
        assert!(!tool.is_active_on(&other));
        let res = tool
            .constrain_at(&mut other, "envx", 7.0, Quantity::new(1e-3, "m"), ConstraintMode::Replace)
            .unwrap();
        assert!(res.is_none());
        assert!(!tool.release_at(&other, "envx", 7.0));
        assert_eq!(fake.borrow().match_requests.len(), 1);

        tool.start(&other);
        assert!(tool.is_active_on(&other));
        assert!(tool.matcher().unwrap().constraints().is_empty());
        assert_eq!(
            *events.borrow(),
            vec![MatchEvent::Start, MatchEvent::Stop, MatchEvent::Start]
        );
    }

    #[test]
    fn test_stop_ends_session() {
        let (_fake, mut seg, mut tool) = setup();
        let events = Rc::new(RefCell::new(Vec::new()));
        for event in [MatchEvent::Start, MatchEvent::Stop] {
            let events = events.clone();
            tool.hooks.connect(event, move |e| events.borrow_mut().push(e));
        }
        tool.start(&seg);
        tool.start(&seg);
        tool.constrain_at(&mut seg, "envx", 7.0, Quantity::new(1e-3, "m"), ConstraintMode::Replace)
            .unwrap();
        tool.stop();
        assert!(!tool.is_active());
        assert!(tool.matcher().is_none());
        tool.start(&seg);
        assert!(tool.matcher().unwrap().constraints().is_empty());
        assert_eq!(
            *events.borrow(),
            vec![MatchEvent::Start, MatchEvent::Stop, MatchEvent::Start]
        );
    }
}
