//! Unit boundary between the optics engine (raw numbers) and the segment
//! model (unit-annotated quantities).
//!
//! Every value that crosses the engine interface is converted exactly once
//! in each direction through a [`UnitConverter`].

use crate::error::{EngineError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    fmt,
};

pub type RawParams = BTreeMap<String, f64>;
pub type Params = BTreeMap<String, Quantity>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    #[serde(default)]
    pub unit: String,
}

impl Quantity {
    pub fn new(value: f64, unit: &str) -> Self {
        Self {
            value,
            unit: unit.to_string(),
        }
    }

    pub fn dimensionless(value: f64) -> Self {
        Self::new(value, "")
    }

    pub fn is_dimensionless(&self) -> bool {
        self.unit.is_empty()
    }
}

/// Quantities only compare when they carry the same unit.
impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.unit != other.unit {
            return None;
        }
        self.value.partial_cmp(&other.value)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.is_empty() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {}", self.value, self.unit)
        }
    }
}

pub trait UnitConverter {
    /// Unit symbol configured for a named quantity; empty when dimensionless.
    fn unit_of(&self, name: &str) -> &str;

    fn add_unit(&self, name: &str, raw: f64) -> Quantity {
        Quantity::new(raw, self.unit_of(name))
    }

    fn strip_unit(&self, name: &str, quantity: &Quantity) -> Result<f64, EngineError> {
        let expected = self.unit_of(name);
        if quantity.unit != expected {
            return Err(EngineError::new(
                ErrorCode::InvalidInput,
                format!(
                    "Quantity '{name}' has unit '{}', expected '{expected}'",
                    quantity.unit
                ),
            ));
        }
        Ok(quantity.value)
    }

    fn dict_add_unit(&self, raw: &RawParams) -> Params {
        raw.iter()
            .map(|(name, value)| (name.clone(), self.add_unit(name, *value)))
            .collect()
    }

    fn dict_strip_unit(&self, params: &Params) -> Result<RawParams, EngineError> {
        params
            .iter()
            .map(|(name, quantity)| Ok((name.clone(), self.strip_unit(name, quantity)?)))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitTable {
    units: HashMap<String, String>,
}

impl UnitTable {
    pub fn empty() -> Self {
        Self {
            units: HashMap::new(),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, EngineError> {
        serde_json::from_str(text).map_err(|e| {
            EngineError::new(
                ErrorCode::InvalidInput,
                format!("Could not parse unit table: {e}"),
            )
        })
    }

    pub fn load_from_path(path: &str) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::new(
                ErrorCode::Io,
                format!("Could not read unit table '{path}': {e}"),
            )
        })?;
        Self::from_json_str(&text)
    }

    pub fn with_unit(mut self, name: &str, unit: &str) -> Self {
        self.units.insert(name.to_string(), unit.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl Default for UnitTable {
    fn default() -> Self {
        crate::UNITS.clone()
    }
}

impl UnitConverter for UnitTable {
    fn unit_of(&self, name: &str) -> &str {
        self.units.get(name).map(|s| s.as_str()).unwrap_or("")
    }
}
