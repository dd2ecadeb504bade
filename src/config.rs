//! Matching configuration: how each plotted axis maps onto an optics
//! quantity, and which element parameters may serve as knobs for it.

use crate::error::{EngineError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Element type -> parameter names tried in order.
pub type KnobRules = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformKind {
    /// The target is passed on unchanged.
    Identity,
    /// Envelope `sigma` becomes beta `sigma^2 / emittance`.
    Envelope { emittance: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSpec {
    pub quantity: String,
    pub transform: TransformKind,
    #[serde(default)]
    pub conjugate: Option<String>,
}

/// What to do when the closest upstream candidate has no usable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedKnobPolicy {
    #[default]
    Abort,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub axes: BTreeMap<String, AxisSpec>,
    pub rules: BTreeMap<String, KnobRules>,
    pub unresolved_knob: UnresolvedKnobPolicy,
}

impl MatchConfig {
    pub fn from_json_str(text: &str) -> Result<Self, EngineError> {
        serde_json::from_str(text).map_err(|e| {
            EngineError::new(
                ErrorCode::InvalidInput,
                format!("Could not parse matching configuration: {e}"),
            )
        })
    }

    pub fn load_from_path(path: &str) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::new(
                ErrorCode::Io,
                format!("Could not read matching configuration '{path}': {e}"),
            )
        })?;
        Self::from_json_str(&text)
    }

    pub fn axis(&self, name: &str) -> Result<&AxisSpec, EngineError> {
        self.axes.get(name).ok_or_else(|| {
            EngineError::new(ErrorCode::InvalidInput, format!("Unknown axis '{name}'"))
        })
    }

    pub fn conjugate(&self, axis: &str) -> Option<&str> {
        self.axes.get(axis)?.conjugate.as_deref()
    }

    pub fn rules_for(&self, axis: &str) -> Option<&KnobRules> {
        self.rules.get(axis)
    }

    pub fn with_rule(mut self, axis: &str, element_type: &str, params: &[&str]) -> Self {
        self.rules.entry(axis.to_string()).or_default().insert(
            element_type.to_string(),
            params.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    pub fn with_policy(mut self, policy: UnresolvedKnobPolicy) -> Self {
        self.unresolved_knob = policy;
        self
    }
}

/// Shape of the shipped defaults. Kept apart from `MatchConfig` so that
/// parsing it never consults `MatchConfig::default`.
#[derive(Deserialize)]
struct BuiltinConfig {
    axes: BTreeMap<String, AxisSpec>,
    rules: BTreeMap<String, KnobRules>,
    unresolved_knob: UnresolvedKnobPolicy,
}

impl MatchConfig {
    pub(crate) fn builtin() -> Self {
        let raw: BuiltinConfig = serde_json::from_str(include_str!("../assets/matching.json"))
            .expect("Built-in matching configuration is not valid JSON");
        MatchConfig {
            axes: raw.axes,
            rules: raw.rules,
            unresolved_knob: raw.unresolved_knob,
        }
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        crate::MATCH_CONFIG.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_config() {
        let config = MatchConfig::default();
        let envx = config.axis("envx").unwrap();
        assert_eq!(envx.quantity, "betx");
        assert_eq!(
            envx.transform,
            TransformKind::Envelope {
                emittance: "ex".to_string()
            }
        );
        assert_eq!(config.conjugate("posy"), Some("posx"));
        assert_eq!(config.rules_for("envy").unwrap()["quadrupole"], vec!["k1"]);
        assert_eq!(config.unresolved_knob, UnresolvedKnobPolicy::Abort);
    }

    #[test]
    fn test_partial_config_keeps_builtin_axes() {
        let config = MatchConfig::from_json_str(
            r#"{"rules": {"envx": {"quad": ["k1", "k1s"]}}, "unresolved_knob": "skip"}"#,
        )
        .unwrap();
        assert!(config.axis("envy").is_ok());
        assert_eq!(config.rules_for("envx").unwrap()["quad"], vec!["k1", "k1s"]);
        assert!(config.rules_for("posx").is_none());
        assert_eq!(config.unresolved_knob, UnresolvedKnobPolicy::Skip);
    }

    #[test]
    fn test_unknown_axis() {
        let err = MatchConfig::default().axis("phase").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"axes": {{"dx": {{"quantity": "dx", "transform": {{"kind": "identity"}}}}}}}}"#
        )
        .unwrap();
        let config = MatchConfig::load_from_path(&file.path().to_string_lossy()).unwrap();
        assert_eq!(config.axes.len(), 1);
        assert_eq!(config.conjugate("dx"), None);
        let err = MatchConfig::load_from_path("/no/such/file.json").unwrap_err();
        assert_eq!(err.code, ErrorCode::Io);
    }
}
