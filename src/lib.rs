//! Constraint-driven optics matching on beamline segments.
//!
//! A [`segment::Segment`] models a range of a beamline sequence with its beam
//! and initial optics, and caches the optics table computed by an external
//! [`engine::OpticsEngine`]. [`matching::Matching`] turns envelope and
//! position targets at chosen elements into a set of upstream knobs, lets
//! the engine solve for them and refreshes the segment.

use config::MatchConfig;
use lazy_static::lazy_static;
use units::UnitTable;

pub mod config;
pub mod constraints;
pub mod element;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod match_tool;
pub mod matching;
pub mod segment;
pub mod session;
pub mod transform;
pub mod units;
pub mod variables;

#[cfg(test)]
pub(crate) mod testing;

lazy_static! {
    // Units of the optics quantities exchanged with the engine
    pub static ref UNITS: UnitTable = UnitTable::from_json_str(include_str!("../assets/units.json"))
        .expect("Built-in unit table is not valid JSON");

    // Axis transforms and knob rules shipped with the crate
    pub static ref MATCH_CONFIG: MatchConfig = MatchConfig::builtin();
}
