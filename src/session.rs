//! The engine connection together with the currently active segment.

use crate::{
    element::RangeSpec,
    engine::{EngineHandle, OpticsEngine, SequenceData},
    error::{EngineError, ErrorCode},
    segment::{Segment, SegmentSpec},
    units::{RawParams, UnitConverter},
};
use log::{debug, info};
use std::rc::Rc;

/// TWISS columns always taken from a stored table, even when zero.
const MANDATORY_TWISS: &[&str] = &["betx", "bety", "alfx", "alfy"];

pub struct Session {
    engine: EngineHandle,
    units: Rc<dyn UnitConverter>,
    segment: Option<Segment>,
}

impl Session {
    pub fn new(engine: EngineHandle, units: Rc<dyn UnitConverter>) -> Self {
        Self {
            engine,
            units,
            segment: None,
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn units(&self) -> &Rc<dyn UnitConverter> {
        &self.units
    }

    pub fn segment(&self) -> Option<&Segment> {
        self.segment.as_ref()
    }

    pub fn segment_mut(&mut self) -> Option<&mut Segment> {
        self.segment.as_mut()
    }

    /// Replaces the active segment. The previous one is destroyed only if the
    /// new one could be built.
    pub fn init_segment(&mut self, spec: SegmentSpec) -> Result<&mut Segment, EngineError> {
        let segment = Segment::new(self.engine.clone(), self.units.clone(), spec)?;
        if let Some(mut old) = self.segment.take() {
            old.destroy();
        }
        info!(
            "Segment {} {}..{}",
            segment.sequence(),
            segment.start().name,
            segment.stop().name
        );
        Ok(self.segment.insert(segment))
    }

    pub fn close(&mut self) {
        if let Some(mut segment) = self.segment.take() {
            segment.destroy();
        }
    }

    /// Best guess at a segment for `sequence` from the engine's current
    /// state: its beam and the range and initial values of the last TWISS
    /// table stored for it.
    pub fn guess_segment_spec(&self, sequence: &str) -> Result<SegmentSpec, EngineError> {
        let engine = self.engine.borrow();
        let data = engine.sequence(sequence)?;
        let beam = match engine.beam(sequence) {
            Ok(beam) => beam,
            Err(e) if e.code == ErrorCode::NoBeam => RawParams::new(),
            Err(e) => return Err(e),
        };
        let (range, twiss) = match Self::stored_twiss(&*engine, &data) {
            Ok(found) => found,
            Err(e) if matches!(e.code, ErrorCode::NoTwissTable | ErrorCode::TwissUnavailable) => {
                debug!("No usable TWISS table for {sequence}: {e}");
                (
                    RangeSpec::Pair(format!("{sequence}$start"), format!("{sequence}$end")),
                    RawParams::new(),
                )
            }
            Err(e) => return Err(e),
        };
        Ok(SegmentSpec {
            sequence: data.name,
            range,
            beam: self.units.dict_add_unit(&beam),
            twiss: self.units.dict_add_unit(&twiss),
            indicators: true,
        })
    }

    fn stored_twiss(
        engine: &dyn OpticsEngine,
        data: &SequenceData,
    ) -> Result<(RangeSpec, RawParams), EngineError> {
        let table = engine.twiss_table(&data.name)?;
        let (first, last) = table.range();
        if first.is_empty() || last.is_empty() {
            return Err(EngineError::new(
                ErrorCode::TwissUnavailable,
                "TWISS table inaccessible or nonsensical",
            ));
        }
        if !data.contains(first) || !data.contains(last) {
            return Err(EngineError::new(
                ErrorCode::TwissUnavailable,
                "The TWISS table appears to belong to a different sequence",
            ));
        }
        let twiss = table
            .columns
            .iter()
            .filter_map(|(name, values)| {
                let first_row = *values.first()?;
                (MANDATORY_TWISS.contains(&name.as_str()) || first_row != 0.0)
                    .then(|| (name.clone(), first_row))
            })
            .collect();
        Ok((RangeSpec::Pair(first.to_string(), last.to_string()), twiss))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("segment", &self.segment)
            .finish()
    }
}
