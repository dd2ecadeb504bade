//! Maps a plotted axis and its target onto the optics quantity the solver
//! constrains.

use crate::{
    config::{AxisSpec, TransformKind},
    error::{EngineError, ErrorCode},
    units::{Params, Quantity, UnitConverter},
};
use std::collections::BTreeMap;

pub struct AxisTransform<'a> {
    axes: &'a BTreeMap<String, AxisSpec>,
    summary: &'a Params,
    units: &'a dyn UnitConverter,
}

impl<'a> AxisTransform<'a> {
    /// `summary` supplies the emittances of the most recent TWISS run.
    pub fn new(
        axes: &'a BTreeMap<String, AxisSpec>,
        summary: &'a Params,
        units: &'a dyn UnitConverter,
    ) -> Self {
        Self {
            axes,
            summary,
            units,
        }
    }

    /// Returns `(quantity, target)` for a constraint on `axis`.
    pub fn apply(&self, axis: &str, target: &Quantity) -> Result<(String, Quantity), EngineError> {
        let spec = self.axes.get(axis).ok_or_else(|| {
            EngineError::new(ErrorCode::InvalidInput, format!("Unknown axis '{axis}'"))
        })?;
        let raw = self.units.strip_unit(axis, target)?;
        let value = match &spec.transform {
            TransformKind::Identity => raw,
            TransformKind::Envelope { emittance } => {
                let emittance_value = self
                    .summary
                    .get(emittance)
                    .ok_or_else(|| {
                        EngineError::new(
                            ErrorCode::TwissUnavailable,
                            format!("No emittance '{emittance}' in TWISS summary"),
                        )
                    })
                    .and_then(|e| self.units.strip_unit(emittance, e))?;
                if emittance_value == 0.0 {
                    return Err(EngineError::new(
                        ErrorCode::InvalidInput,
                        format!("Emittance '{emittance}' is zero"),
                    ));
                }
                raw * raw / emittance_value
            }
        };
        Ok((
            spec.quantity.clone(),
            self.units.add_unit(&spec.quantity, value),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::MatchConfig, units::UnitTable};

    fn summary(ex: f64, ey: f64) -> Params {
        let mut summary = Params::new();
        summary.insert("ex".to_string(), Quantity::new(ex, "m"));
        summary.insert("ey".to_string(), Quantity::new(ey, "m"));
        summary
    }

    #[test]
    fn test_envelope_to_beta() {
        let config = MatchConfig::default();
        let units = UnitTable::default();
        let summary = summary(4.0e-6, 1.0e-6);
        let trans = AxisTransform::new(&config.axes, &summary, &units);
        let (name, value) = trans.apply("envx", &Quantity::new(2.0e-3, "m")).unwrap();
        assert_eq!(name, "betx");
        assert!((value.value - 1.0).abs() < 1e-12);
        assert_eq!(value.unit, "m");
        let (name, value) = trans.apply("envy", &Quantity::new(2.0e-3, "m")).unwrap();
        assert_eq!(name, "bety");
        assert!((value.value - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_position_is_identity() {
        let config = MatchConfig::default();
        let units = UnitTable::default();
        let summary = summary(4.0e-6, 1.0e-6);
        let trans = AxisTransform::new(&config.axes, &summary, &units);
        assert_eq!(
            trans.apply("posx", &Quantity::new(-3.0e-3, "m")).unwrap(),
            ("x".to_string(), Quantity::new(-3.0e-3, "m"))
        );
        assert_eq!(
            trans.apply("posy", &Quantity::new(1.0e-3, "m")).unwrap().0,
            "y"
        );
    }

    #[test]
    fn test_errors() {
        let config = MatchConfig::default();
        let units = UnitTable::default();
        let empty = Params::new();
        let trans = AxisTransform::new(&config.axes, &empty, &units);
        let err = trans.apply("envx", &Quantity::new(1.0, "m")).unwrap_err();
        assert_eq!(err.code, ErrorCode::TwissUnavailable);
        let err = trans.apply("phase", &Quantity::new(1.0, "")).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);

        let zero = summary(0.0, 1.0);
        let trans = AxisTransform::new(&config.axes, &zero, &units);
        let err = trans.apply("envx", &Quantity::new(1.0, "m")).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }
}
