//! A fixed segment of a beamline: sequence, element range, beam and initial
//! optics, plus the optics table derived from them.

use crate::{
    element::{Element, ElementInfo, ElementRange, ElementRef, RangeSpec, find_by_name},
    engine::{EngineHandle, TransferMap, TransferMapRequest, TwissRequest, relabel},
    error::{EngineError, ErrorCode},
    hooks::Hooks,
    units::{Params, Quantity, RawParams, UnitConverter},
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

/// Numeric columns requested from every TWISS run.
pub const TWISS_COLUMNS: &[&str] = &[
    "l", "angle", "k1l", "s", "x", "y", "betx", "bety", "alfx", "alfy",
];

const REQUIRED_COLUMNS: &[&str] = &["s", "x", "y", "betx", "bety"];

static SEGMENT_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentEvent {
    Update,
    Remove,
    ShowElementIndicators,
}

/// Everything needed to (re)create a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpec {
    pub sequence: String,
    pub range: RangeSpec,
    #[serde(default)]
    pub beam: Params,
    #[serde(default)]
    pub twiss: Params,
    #[serde(default = "default_indicators")]
    pub indicators: bool,
}

fn default_indicators() -> bool {
    true
}

impl SegmentSpec {
    pub fn new(sequence: &str, range: impl Into<RangeSpec>) -> Self {
        Self {
            sequence: sequence.to_string(),
            range: range.into(),
            beam: Params::new(),
            twiss: Params::new(),
            indicators: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub unit: String,
    pub values: Vec<f64>,
}

impl Column {
    pub fn get(&self, row: usize) -> Option<Quantity> {
        self.values.get(row).map(|v| Quantity::new(*v, &self.unit))
    }
}

/// Optics columns aligned row-for-row with the elements of the range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwissTable {
    columns: BTreeMap<String, Column>,
    rows: usize,
}

impl TwissTable {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn get(&self, name: &str, row: usize) -> Option<Quantity> {
        self.columns.get(name)?.get(row)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

pub struct Segment {
    id: u64,
    engine: EngineHandle,
    units: Rc<dyn UnitConverter>,
    sequence: String,
    range: ElementRange,
    beam: Params,
    twiss_args: Params,
    elements: Vec<Element>,
    generation: u64,
    table: TwissTable,
    summary: Params,
    show_element_indicators: bool,
    pub hooks: Hooks<SegmentEvent>,
}

impl Segment {
    /// Reads the sequence from the engine, applies the beam and runs an
    /// initial TWISS. Fails instead of producing a segment without optics.
    pub fn new(
        engine: EngineHandle,
        units: Rc<dyn UnitConverter>,
        spec: SegmentSpec,
    ) -> Result<Self, EngineError> {
        let data = engine.borrow().sequence(&spec.sequence)?;
        let elements: Vec<Element> = data
            .elements
            .iter()
            .map(|raw| Element::from_raw(raw, units.as_ref()))
            .collect();
        let range = Self::parse_range_in(&elements, &spec.range)?;
        let mut segment = Self {
            id: SEGMENT_COUNTER.fetch_add(1, Ordering::Relaxed),
            engine,
            units,
            sequence: data.name,
            range,
            beam: spec.beam,
            twiss_args: spec.twiss,
            elements,
            generation: 0,
            table: TwissTable::default(),
            summary: Params::new(),
            show_element_indicators: spec.indicators,
            hooks: Hooks::new(),
        };
        segment.apply_beam(&segment.beam)?;
        segment.twiss()?;
        Ok(segment)
    }

    /// Unique per segment within the process; never reused.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    pub fn range(&self) -> &ElementRange {
        &self.range
    }

    pub fn start(&self) -> &ElementInfo {
        self.range.start()
    }

    pub fn stop(&self) -> &ElementInfo {
        self.range.stop()
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn units(&self) -> &dyn UnitConverter {
        self.units.as_ref()
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Bumped whenever the element list or the range is replaced.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn table(&self) -> &TwissTable {
        &self.table
    }

    pub fn summary(&self) -> &Params {
        &self.summary
    }

    pub fn beam(&self) -> &Params {
        &self.beam
    }

    pub fn twiss_args(&self) -> &Params {
        &self.twiss_args
    }

    pub fn spec(&self) -> SegmentSpec {
        SegmentSpec {
            sequence: self.sequence.clone(),
            range: RangeSpec::Pair(self.start().name.clone(), self.stop().name.clone()),
            beam: self.beam.clone(),
            twiss: self.twiss_args.clone(),
            indicators: self.show_element_indicators,
        }
    }

    /// Applies a new beam and recomputes the optics. On failure the engine
    /// gets the previous beam back and nothing changes here.
    pub fn set_beam(&mut self, beam: Params) -> Result<(), EngineError> {
        self.apply_beam(&beam)?;
        match self.compute_twiss(&self.range, &self.twiss_args) {
            Ok((table, summary)) => {
                self.beam = beam;
                self.commit_twiss(table, summary);
                Ok(())
            }
            Err(err) => {
                if let Err(restore) = self.apply_beam(&self.beam) {
                    warn!("Could not restore the previous beam: {restore}");
                }
                Err(err)
            }
        }
    }

    pub fn set_twiss_args(&mut self, twiss_args: Params) -> Result<(), EngineError> {
        let (table, summary) = self.compute_twiss(&self.range, &twiss_args)?;
        self.twiss_args = twiss_args;
        self.commit_twiss(table, summary);
        Ok(())
    }

    /// Switches to another range. The old range and table stay in place if
    /// the new range cannot be parsed or propagated.
    pub fn set_range(&mut self, range: impl Into<RangeSpec>) -> Result<(), EngineError> {
        let range = Self::parse_range_in(&self.elements, &range.into())?;
        let (table, summary) = self.compute_twiss(&range, &self.twiss_args)?;
        self.range = range;
        self.generation += 1;
        self.commit_twiss(table, summary);
        Ok(())
    }

    /// Re-reads the element list from the engine and re-resolves the range
    /// endpoints by name.
    pub fn reload_elements(&mut self) -> Result<(), EngineError> {
        let data = self.engine.borrow().sequence(&self.sequence)?;
        let elements: Vec<Element> = data
            .elements
            .iter()
            .map(|raw| Element::from_raw(raw, self.units.as_ref()))
            .collect();
        let spec = RangeSpec::Pair(self.start().name.clone(), self.stop().name.clone());
        let range = Self::parse_range_in(&elements, &spec)?;
        self.elements = elements;
        self.range = range;
        self.generation += 1;
        self.twiss()
    }

    pub fn show_element_indicators(&self) -> bool {
        self.show_element_indicators
    }

    pub fn set_show_element_indicators(&mut self, show: bool) {
        if show == self.show_element_indicators {
            return;
        }
        self.show_element_indicators = show;
        self.hooks.emit(SegmentEvent::ShowElementIndicators);
    }

    pub fn destroy(&mut self) {
        self.hooks.emit(SegmentEvent::Remove);
    }

    fn apply_beam(&self, beam: &Params) -> Result<(), EngineError> {
        let beam = self.units.dict_strip_unit(beam)?;
        self.engine.borrow_mut().set_beam(&self.sequence, &beam)
    }

    pub fn get_element_info<'a>(
        &self,
        element: impl Into<ElementRef<'a>>,
    ) -> Result<ElementInfo, EngineError> {
        Self::element_info_in(&self.elements, element.into())
    }

    fn element_info_in(
        elements: &[Element],
        element: ElementRef<'_>,
    ) -> Result<ElementInfo, EngineError> {
        let index = match element {
            ElementRef::Info(info) => return Ok(info.clone()),
            ElementRef::Name(name) => Self::index_in(elements, name).ok_or_else(|| {
                EngineError::new(
                    ErrorCode::InvalidInput,
                    format!("Unknown element '{name}'"),
                )
            })?,
            ElementRef::Index(index) => {
                let len = elements.len() as isize;
                let resolved = if index < 0 { index + len } else { index };
                if resolved < 0 || resolved >= len {
                    return Err(EngineError::new(
                        ErrorCode::InvalidInput,
                        format!("Element index {index} out of bounds"),
                    ));
                }
                resolved as usize
            }
        };
        Ok(ElementInfo::from_element(&elements[index], index))
    }

    fn index_in(elements: &[Element], name: &str) -> Option<usize> {
        find_by_name(elements.iter().map(|e| e.name.as_str()), name)
    }

    pub fn element_index(&self, name: &str) -> Option<usize> {
        Self::index_in(&self.elements, name)
    }

    pub fn parse_range(&self, range: &RangeSpec) -> Result<ElementRange, EngineError> {
        Self::parse_range_in(&self.elements, range)
    }

    fn parse_range_in(elements: &[Element], range: &RangeSpec) -> Result<ElementRange, EngineError> {
        let (start, stop) = range.endpoints()?;
        let lookup = |name: &str| {
            Self::element_info_in(elements, ElementRef::Name(name)).map_err(|_| {
                EngineError::new(
                    ErrorCode::RangeInvalid,
                    format!("Range endpoint '{name}' is not part of the sequence"),
                )
            })
        };
        ElementRange::new(lookup(&start)?, lookup(&stop)?)
    }

    /// True if `element` is one of this segment's elements and lies in the
    /// range. Infos taken from another segment fail the name check.
    pub fn contains(&self, element: &ElementInfo) -> bool {
        self.range.contains(element)
            && self
                .elements
                .get(element.index)
                .is_some_and(|e| e.name == element.name)
    }

    /// First element whose `[at, at + l]` interval contains `position`.
    pub fn element_by_position(&self, position: f64) -> Option<&Element> {
        self.elements.iter().find(|e| e.covers(position))
    }

    pub fn element_info_at(&self, position: f64) -> Option<ElementInfo> {
        let index = self.elements.iter().position(|e| e.covers(position))?;
        Some(ElementInfo::from_element(&self.elements[index], index))
    }

    /// Cached optics value at `element`, or `None` outside the range.
    pub fn get_twiss<'a>(&self, element: impl Into<ElementRef<'a>>, name: &str) -> Option<Quantity> {
        let info = self.get_element_info(element).ok()?;
        if !self.contains(&info) {
            return None;
        }
        self.table.get(name, info.index - self.start().index)
    }

    pub fn emittance(&self, name: &str) -> Result<Quantity, EngineError> {
        self.summary.get(name).cloned().ok_or_else(|| {
            EngineError::new(
                ErrorCode::TwissUnavailable,
                format!("TWISS summary lacks '{name}'"),
            )
        })
    }

    /// Recomputes the optics table. On failure the previous table is kept.
    pub fn twiss(&mut self) -> Result<(), EngineError> {
        let (table, summary) = self.compute_twiss(&self.range, &self.twiss_args)?;
        self.commit_twiss(table, summary);
        Ok(())
    }

    fn commit_twiss(&mut self, table: TwissTable, summary: Params) {
        self.table = table;
        self.summary = summary;
        self.hooks.emit(SegmentEvent::Update);
    }

    fn compute_twiss(
        &self,
        range: &ElementRange,
        twiss_args: &Params,
    ) -> Result<(TwissTable, Params), EngineError> {
        let twiss_init = self.units.dict_strip_unit(twiss_args)?;
        let request = TwissRequest {
            sequence: self.sequence.clone(),
            range: range.engine_names(),
            columns: TWISS_COLUMNS.iter().map(|c| c.to_string()).collect(),
            twiss_init,
        };
        debug!("TWISS {} over {:?}", request.sequence, request.range);
        let result = self
            .engine
            .borrow_mut()
            .twiss(&request)
            .map_err(|e| relabel(e, ErrorCode::TwissUnavailable))?;

        let rows = range.len();
        let unavailable = |msg: String| EngineError::new(ErrorCode::TwissUnavailable, msg);
        for name in REQUIRED_COLUMNS {
            if !result.columns.contains_key(*name) {
                return Err(unavailable(format!("TWISS result lacks column '{name}'")));
            }
        }
        if let Some((name, data)) = result.columns.iter().find(|(_, data)| data.len() != rows) {
            return Err(unavailable(format!(
                "TWISS column '{name}' has {} rows, range has {rows}",
                data.len()
            )));
        }
        let summary_value = |name: &str| {
            result
                .summary
                .get(name)
                .copied()
                .ok_or_else(|| unavailable(format!("TWISS summary lacks '{name}'")))
        };
        let ex = summary_value("ex")?;
        let ey = summary_value("ey")?;

        let mut raw: BTreeMap<String, Vec<f64>> = result.columns.clone();
        let offset = self.units.strip_unit("at", &range.start().at)?;
        if let Some(s) = raw.get_mut("s") {
            s.iter_mut().for_each(|v| *v += offset);
        }
        let envelope = |beta: &[f64], emittance: f64| -> Vec<f64> {
            beta.iter().map(|b| (b * emittance).sqrt()).collect()
        };
        let envx = envelope(&raw["betx"], ex);
        let envy = envelope(&raw["bety"], ey);
        let posx = raw["x"].clone();
        let posy = raw["y"].clone();
        raw.insert("envx".to_string(), envx);
        raw.insert("envy".to_string(), envy);
        raw.insert("posx".to_string(), posx);
        raw.insert("posy".to_string(), posy);

        let columns = raw
            .into_iter()
            .map(|(name, values)| {
                let unit = self.units.unit_of(&name).to_string();
                (name, Column { unit, values })
            })
            .collect();
        let summary = self.units.dict_add_unit(&result.summary);
        info!(
            "TWISS {} {}..{}: {rows} rows",
            self.sequence,
            range.start().name,
            range.stop().name
        );
        Ok((TwissTable { columns, rows }, summary))
    }

    pub fn transfer_map<'a>(
        &self,
        beg: impl Into<ElementRef<'a>>,
        end: impl Into<ElementRef<'a>>,
    ) -> Result<TransferMap, EngineError> {
        let beg = self.get_element_info(beg)?;
        let end = self.get_element_info(end)?;
        let request = TransferMapRequest {
            sequence: self.sequence.clone(),
            range: (beg.name, end.name),
            twiss_range: self.range.engine_names(),
            twiss_init: self.units.dict_strip_unit(&self.twiss_args)?,
        };
        self.engine
            .borrow_mut()
            .transfer_map(&request)
            .map_err(|e| relabel(e, ErrorCode::TwissUnavailable))
    }

    pub(crate) fn raw_twiss_init(&self) -> Result<RawParams, EngineError> {
        self.units.dict_strip_unit(&self.twiss_args)
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("sequence", &self.sequence)
            .field("range", &self.range)
            .field("generation", &self.generation)
            .field("rows", &self.table.len())
            .finish()
    }
}
