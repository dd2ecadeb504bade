//! Beamline elements on both sides of the unit boundary, plus the stable
//! [`ElementInfo`] references used for ranges and constraints.

use crate::{
    error::{EngineError, ErrorCode},
    units::{Quantity, UnitConverter},
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

lazy_static! {
    static ref RANGE_MARKER: Regex = Regex::new(r"^(?:.*\$)?(start|end)$").expect("valid regex");
}

/// Parameter as reported by the engine. `expression` is set only when the
/// parameter is bound to a knob variable rather than a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawParam {
    pub value: f64,
    #[serde(default)]
    pub expression: Option<String>,
}

impl RawParam {
    pub fn literal(value: f64) -> Self {
        Self {
            value,
            expression: None,
        }
    }

    pub fn knob(value: f64, expression: &str) -> Self {
        Self {
            value,
            expression: Some(expression.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawElement {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub at: f64,
    #[serde(default)]
    pub l: f64,
    #[serde(default)]
    pub params: BTreeMap<String, RawParam>,
}

impl RawElement {
    pub fn new(name: &str, kind: &str, at: f64, l: f64) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            at,
            l,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: &str, param: RawParam) -> Self {
        self.params.insert(name.to_string(), param);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub value: Quantity,
    pub expression: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    pub kind: String,
    pub at: Quantity,
    pub l: Quantity,
    pub params: BTreeMap<String, Param>,
}

impl Element {
    pub fn from_raw(raw: &RawElement, units: &dyn UnitConverter) -> Self {
        let params = raw
            .params
            .iter()
            .map(|(name, param)| {
                (
                    name.clone(),
                    Param {
                        value: units.add_unit(name, param.value),
                        expression: param.expression.clone(),
                    },
                )
            })
            .collect();
        Self {
            name: raw.name.clone(),
            kind: raw.kind.clone(),
            at: units.add_unit("at", raw.at),
            l: units.add_unit("l", raw.l),
            params,
        }
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.get(name)
    }

    /// True if `position` lies within `[at, at + l]`.
    pub fn covers(&self, position: f64) -> bool {
        position >= self.at.value && position <= self.at.value + self.l.value
    }
}

/// Identity snapshot of one element. Taken once when a range is parsed and
/// never re-validated against the live element list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub name: String,
    pub index: usize,
    pub at: Quantity,
}

impl ElementInfo {
    pub fn new(name: &str, index: usize, at: Quantity) -> Self {
        Self {
            name: name.to_string(),
            index,
            at,
        }
    }

    pub fn from_element(element: &Element, index: usize) -> Self {
        Self::new(&element.name, index, element.at.clone())
    }
}

impl fmt::Display for ElementInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.name, self.index, self.at)
    }
}

/// Ways a caller can point at an element of a sequence.
#[derive(Debug, Clone, Copy)]
pub enum ElementRef<'a> {
    Name(&'a str),
    Index(isize),
    Info(&'a ElementInfo),
}

impl<'a> From<&'a str> for ElementRef<'a> {
    fn from(name: &'a str) -> Self {
        ElementRef::Name(name)
    }
}

impl From<isize> for ElementRef<'_> {
    fn from(index: isize) -> Self {
        ElementRef::Index(index)
    }
}

impl<'a> From<&'a ElementInfo> for ElementRef<'a> {
    fn from(info: &'a ElementInfo) -> Self {
        ElementRef::Info(info)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRange {
    start: ElementInfo,
    stop: ElementInfo,
}

impl ElementRange {
    pub fn new(start: ElementInfo, stop: ElementInfo) -> Result<Self, EngineError> {
        if start.index > stop.index {
            return Err(EngineError::new(
                ErrorCode::RangeInvalid,
                format!("Range start {start} lies behind its stop {stop}"),
            ));
        }
        Ok(Self { start, stop })
    }

    pub fn start(&self) -> &ElementInfo {
        &self.start
    }

    pub fn stop(&self) -> &ElementInfo {
        &self.stop
    }

    pub fn contains(&self, element: &ElementInfo) -> bool {
        self.start.index <= element.index && element.index <= self.stop.index
    }

    pub fn contains_index(&self, index: usize) -> bool {
        self.start.index <= index && index <= self.stop.index
    }

    /// Number of elements covered, both ends included.
    pub fn len(&self) -> usize {
        self.stop.index - self.start.index + 1
    }

    /// A range always holds at least its start element.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Range names as the engine expects them.
    pub fn engine_names(&self) -> (String, String) {
        (
            normalize_range_name(&self.start.name),
            normalize_range_name(&self.stop.name),
        )
    }
}

/// Range as given by the surrounding application: `"start/stop"` or a pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeSpec {
    Text(String),
    Pair(String, String),
}

impl RangeSpec {
    pub fn endpoints(&self) -> Result<(String, String), EngineError> {
        match self {
            RangeSpec::Pair(start, stop) => Ok((start.clone(), stop.clone())),
            RangeSpec::Text(text) => {
                let parts: Vec<&str> = text.split('/').map(str::trim).collect();
                match parts.as_slice() {
                    [start, stop] if !start.is_empty() && !stop.is_empty() => {
                        Ok((start.to_string(), stop.to_string()))
                    }
                    _ => Err(EngineError::new(
                        ErrorCode::RangeInvalid,
                        format!("Range '{text}' is not of the form 'start/stop'"),
                    )),
                }
            }
        }
    }
}

impl From<&str> for RangeSpec {
    fn from(text: &str) -> Self {
        RangeSpec::Text(text.to_string())
    }
}

impl From<(&str, &str)> for RangeSpec {
    fn from((start, stop): (&str, &str)) -> Self {
        RangeSpec::Pair(start.to_string(), stop.to_string())
    }
}

/// Lowercases a range name and maps `seq$start`/`seq$end` to `#s`/`#e`.
pub fn normalize_range_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    if lower == "#s" || lower == "#e" {
        return lower;
    }
    match RANGE_MARKER.captures(&lower) {
        Some(caps) if lower.contains('$') => match &caps[1] {
            "start" => "#s".to_string(),
            _ => "#e".to_string(),
        },
        _ => lower,
    }
}

/// Position of `name` among `names`, honouring the `#s`/`#e` shorthands.
pub fn find_by_name<'a>(
    names: impl ExactSizeIterator<Item = &'a str>,
    name: &str,
) -> Option<usize> {
    let len = names.len();
    let wanted = normalize_range_name(name);
    match wanted.as_str() {
        "#s" if len > 0 => Some(0),
        "#e" if len > 0 => Some(len - 1),
        _ => names
            .map(normalize_range_name)
            .position(|candidate| candidate == wanted),
    }
}
