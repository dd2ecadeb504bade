//! In-process stand-in for the optics engine, used by the unit tests.
//!
//! Optics are not physical: beta grows linearly along the range so that
//! tests can predict every value.

use crate::{
    element::{RawElement, RawParam},
    engine::{
        EngineHandle, MatchRequest, OpticsEngine, SequenceData, StoredTwiss, TransferMap,
        TransferMapRequest, TwissRequest, TwissResult,
    },
    error::{EngineError, ErrorCode},
    units::{RawParams, UnitTable},
};
use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

pub const EX: f64 = 4.0e-6;
pub const EY: f64 = 1.0e-6;

#[derive(Debug, Default)]
pub struct FakeEngine {
    pub sequences: BTreeMap<String, SequenceData>,
    pub beams: BTreeMap<String, RawParams>,
    pub stored: BTreeMap<String, StoredTwiss>,
    pub twiss_requests: Vec<TwissRequest>,
    pub match_requests: Vec<MatchRequest>,
    pub beam_updates: Vec<RawParams>,
    pub fail_twiss: bool,
    pub fail_match: bool,
    pub fail_transport: bool,
    /// Added to every beta value after each successful match.
    pub beta_shift: f64,
}

impl FakeEngine {
    pub fn with_sequence(mut self, name: &str, elements: Vec<RawElement>) -> Self {
        self.sequences.insert(
            name.to_string(),
            SequenceData {
                name: name.to_string(),
                elements,
            },
        );
        let mut beam = RawParams::new();
        beam.insert("ex".to_string(), EX);
        beam.insert("ey".to_string(), EY);
        self.beams.insert(name.to_string(), beam);
        self
    }

    pub fn into_handle(self) -> Rc<RefCell<FakeEngine>> {
        Rc::new(RefCell::new(self))
    }

    fn transport_check(&self) -> Result<(), EngineError> {
        if self.fail_transport {
            return Err(EngineError::new(ErrorCode::Transport, "engine went away"));
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<&SequenceData, EngineError> {
        self.sequences.get(name).ok_or_else(|| {
            EngineError::new(
                ErrorCode::SequenceNotFound,
                format!("Sequence '{name}' is not defined"),
            )
        })
    }
}

impl OpticsEngine for FakeEngine {
    fn sequence(&self, name: &str) -> Result<SequenceData, EngineError> {
        self.transport_check()?;
        self.lookup(name).cloned()
    }

    fn beam(&self, sequence: &str) -> Result<RawParams, EngineError> {
        self.transport_check()?;
        self.beams
            .get(sequence)
            .cloned()
            .ok_or_else(|| EngineError::new(ErrorCode::NoBeam, "no beam"))
    }

    fn twiss_table(&self, sequence: &str) -> Result<StoredTwiss, EngineError> {
        self.transport_check()?;
        self.stored
            .get(sequence)
            .cloned()
            .ok_or_else(|| EngineError::new(ErrorCode::NoTwissTable, "no twiss table"))
    }

    fn twiss(&mut self, request: &TwissRequest) -> Result<TwissResult, EngineError> {
        self.transport_check()?;
        self.twiss_requests.push(request.clone());
        if self.fail_twiss {
            return Err(EngineError::new(ErrorCode::Internal, "twiss failed"));
        }
        let seq = self.lookup(&request.sequence)?;
        let (first, last) = match (
            seq.index_of(&request.range.0),
            seq.index_of(&request.range.1),
        ) {
            (Some(first), Some(last)) if first <= last => (first, last),
            _ => {
                return Err(EngineError::new(
                    ErrorCode::TwissUnavailable,
                    format!("Bad range {:?}", request.range),
                ));
            }
        };
        let beta0 = request.twiss_init.get("betx").copied().unwrap_or(10.0);
        let origin = seq.elements[first].at;
        let mut columns: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for (local, elem) in seq.elements[first..=last].iter().enumerate() {
            let local = local as f64;
            let mut push = |name: &str, value: f64| {
                columns.entry(name.to_string()).or_default().push(value)
            };
            push("s", elem.at - origin);
            push("l", elem.l);
            push("betx", beta0 + local + self.beta_shift);
            push("bety", 2.0 * beta0 + local + self.beta_shift);
            push("alfx", 0.0);
            push("alfy", 0.0);
            push("x", 1.0e-3 * local);
            push("y", -1.0e-3 * local);
        }
        let beam = self.beams.get(&request.sequence).cloned().unwrap_or_default();
        let mut summary = RawParams::new();
        summary.insert("ex".to_string(), beam.get("ex").copied().unwrap_or(EX));
        summary.insert("ey".to_string(), beam.get("ey").copied().unwrap_or(EY));
        Ok(TwissResult { columns, summary })
    }

    fn match_optics(&mut self, request: &MatchRequest) -> Result<(), EngineError> {
        self.transport_check()?;
        self.match_requests.push(request.clone());
        if self.fail_match {
            return Err(EngineError::new(ErrorCode::Internal, "did not converge"));
        }
        self.beta_shift += 1.0;
        Ok(())
    }

    fn set_beam(&mut self, sequence: &str, beam: &RawParams) -> Result<(), EngineError> {
        self.transport_check()?;
        self.beams.insert(sequence.to_string(), beam.clone());
        self.beam_updates.push(beam.clone());
        Ok(())
    }

    fn transfer_map(&mut self, request: &TransferMapRequest) -> Result<TransferMap, EngineError> {
        self.transport_check()?;
        let seq = self.lookup(&request.sequence)?;
        let (Some(beg), Some(end)) = (seq.index_of(&request.range.0), seq.index_of(&request.range.1))
        else {
            return Err(EngineError::new(ErrorCode::TwissUnavailable, "bad range"));
        };
        let mut map = [[0.0; 7]; 7];
        for (i, row) in map.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        map[0][1] = seq.elements[end].at - seq.elements[beg].at;
        Ok(map)
    }
}

/// `[Q1(at=0), D1(at=5), Q2(at=10)]` with quadrupole strengths set.
pub fn three_element_line() -> Vec<RawElement> {
    vec![
        RawElement::new("Q1", "quadrupole", 0.0, 1.0).with_param("k1", RawParam::literal(0.5)),
        RawElement::new("D1", "drift", 5.0, 5.0),
        RawElement::new("Q2", "quadrupole", 10.0, 1.0).with_param("k1", RawParam::literal(-0.5)),
    ]
}

/// Engine, handle and units for `three_element_line` registered as `line`.
pub fn fake_setup() -> (Rc<RefCell<FakeEngine>>, EngineHandle, Rc<UnitTable>) {
    let fake = FakeEngine::default()
        .with_sequence("line", three_element_line())
        .into_handle();
    let handle: EngineHandle = fake.clone();
    (fake, handle, Rc::new(UnitTable::default()))
}

pub fn init_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}
