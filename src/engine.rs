//! Contract of the out-of-process optics engine.
//!
//! The engine performs the TWISS propagation and the numeric matching. This
//! crate only drives it: every call blocks until the engine answers, and
//! transport failures are surfaced as [`ErrorCode::Transport`].

use crate::{
    element::{RawElement, find_by_name},
    error::{EngineError, ErrorCode},
    units::RawParams,
};
use serde::{Deserialize, Serialize};
use std::{cell::RefCell, collections::BTreeMap, fmt, rc::Rc};

pub type EngineHandle = Rc<RefCell<dyn OpticsEngine>>;

/// 7x7 transfer matrix including the constant column.
pub type TransferMap = [[f64; 7]; 7];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceData {
    pub name: String,
    pub elements: Vec<RawElement>,
}

impl SequenceData {
    /// Index of the element called `name`, compared the way the engine
    /// compares range names.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        find_by_name(self.elements.iter().map(|e| e.name.as_str()), name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }
}

/// Table left behind in the engine by its most recent TWISS run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredTwiss {
    pub first: String,
    pub last: String,
    pub columns: BTreeMap<String, Vec<f64>>,
}

impl StoredTwiss {
    pub fn range(&self) -> (&str, &str) {
        (&self.first, &self.last)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwissRequest {
    pub sequence: String,
    pub range: (String, String),
    pub columns: Vec<String>,
    pub twiss_init: RawParams,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwissResult {
    pub columns: BTreeMap<String, Vec<f64>>,
    pub summary: RawParams,
}

impl TwissResult {
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(|c| c.as_slice())
    }
}

/// One modifiable parameter handed to the solver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KnobRef {
    Expression(String),
    Path { element: String, parameter: String },
}

impl KnobRef {
    pub fn path(element: &str, parameter: &str) -> Self {
        KnobRef::Path {
            element: element.to_string(),
            parameter: parameter.to_string(),
        }
    }
}

impl fmt::Display for KnobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnobRef::Expression(expr) => write!(f, "{expr}"),
            KnobRef::Path { element, parameter } => write!(f, "{element}->{parameter}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConstraint {
    pub range: String,
    pub quantity: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub sequence: String,
    pub vary: Vec<KnobRef>,
    pub constraints: Vec<MatchConstraint>,
    pub twiss_init: RawParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferMapRequest {
    pub sequence: String,
    /// Elements between which the map is taken.
    pub range: (String, String),
    /// Range of the underlying TWISS run.
    pub twiss_range: (String, String),
    pub twiss_init: RawParams,
}

pub trait OpticsEngine {
    /// Fails with `SequenceNotFound` if the sequence is undefined.
    fn sequence(&self, name: &str) -> Result<SequenceData, EngineError>;

    /// Fails with `NoBeam` if no beam is set for the sequence.
    fn beam(&self, sequence: &str) -> Result<RawParams, EngineError>;

    /// Fails with `NoTwissTable` if the engine holds no table for the sequence.
    fn twiss_table(&self, sequence: &str) -> Result<StoredTwiss, EngineError>;

    fn twiss(&mut self, request: &TwissRequest) -> Result<TwissResult, EngineError>;

    /// Runs the numeric solver. Updates the engine's own optics state.
    fn match_optics(&mut self, request: &MatchRequest) -> Result<(), EngineError>;

    fn set_beam(&mut self, sequence: &str, beam: &RawParams) -> Result<(), EngineError>;

    fn transfer_map(&mut self, request: &TransferMapRequest) -> Result<TransferMap, EngineError>;
}

/// Re-labels an engine failure with `code`, keeping transport errors intact.
pub fn relabel(err: EngineError, code: ErrorCode) -> EngineError {
    if err.is_fatal() || err.code == code {
        return err;
    }
    EngineError::new(code, err.message)
}
