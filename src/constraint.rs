//! Linear constraints between motors.
//!
//! A constraint derives one motor's position from others as a unit-tagged
//! linear combination, e.g. `y = 2.0 * x - 0.5 * z` in millimetres. Constraint
//! sets are usually supplied as scan metadata:
//!
//! ```toml
//! [constants.y]
//! units = "mm"
//! terms = [{ coeff = 2.0, var = "x" }, { coeff = -0.5, var = "z" }]
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::device::DeviceId;
use crate::error::{PlanError, PlanResult};
use crate::step::Step;
use crate::units::UnitConverter;

/// One `coeff * var` term of a linear constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    /// Multiplier
    pub coeff: f64,
    /// Variable the term reads
    pub var: DeviceId,
}

impl Term {
    /// Create a new term
    pub fn new(coeff: f64, var: impl Into<DeviceId>) -> Self {
        Self {
            coeff,
            var: var.into(),
        }
    }
}

/// A derived position: the sum of its terms, expressed in `units`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearConstraint {
    /// Unit the sum is computed in; empty means dimensionless
    #[serde(default)]
    pub units: String,
    /// Terms to sum
    pub terms: Vec<Term>,
}

impl LinearConstraint {
    /// Create a constraint with no terms
    pub fn new(units: impl Into<String>) -> Self {
        Self {
            units: units.into(),
            terms: Vec::new(),
        }
    }

    /// Add a term
    pub fn with_term(mut self, coeff: f64, var: impl Into<DeviceId>) -> Self {
        self.terms.push(Term::new(coeff, var));
        self
    }

    /// Variables this constraint reads, in term order
    pub fn dependencies(&self) -> impl Iterator<Item = &DeviceId> {
        self.terms.iter().map(|term| &term.var)
    }

    /// Sum the terms from `step` and express the result in `target_units`.
    ///
    /// Every term variable must already be present in `step`. When
    /// `target_units` is `None`, or either side is dimensionless, the sum is
    /// returned in the constraint's own units.
    pub fn evaluate<C>(
        &self,
        step: &Step,
        target_units: Option<&str>,
        converter: &C,
    ) -> PlanResult<f64>
    where
        C: UnitConverter + ?Sized,
    {
        let mut sum = 0.0;
        for term in &self.terms {
            let value = step.get(&term.var).ok_or_else(|| {
                PlanError::Configuration(format!(
                    "constraint term references '{}' which has no value in this step",
                    term.var
                ))
            })?;
            sum += term.coeff * value;
        }

        match target_units {
            Some(target) if !target.is_empty() && !self.units.is_empty() && target != self.units => {
                converter.convert(sum, &self.units, target)
            }
            _ => Ok(sum),
        }
    }
}

/// Constraints keyed by the motor they drive, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintSet(IndexMap<DeviceId, LinearConstraint>);

impl ConstraintSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the constraint driving `target`
    pub fn insert(&mut self, target: impl Into<DeviceId>, constraint: LinearConstraint) {
        let target = target.into();
        trace!(motor = %target, terms = constraint.terms.len(), "Registered constraint");
        self.0.insert(target, constraint);
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, target: impl Into<DeviceId>, constraint: LinearConstraint) -> Self {
        self.insert(target, constraint);
        self
    }

    /// Constraint driving `target`, if any
    pub fn get(&self, target: &DeviceId) -> Option<&LinearConstraint> {
        self.0.get(target)
    }

    /// Whether `target` is driven by a constraint
    pub fn contains(&self, target: &DeviceId) -> bool {
        self.0.contains_key(target)
    }

    /// Number of constraints
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no constraints
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(target, constraint)` in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &LinearConstraint)> {
        self.0.iter()
    }
}

impl FromIterator<(DeviceId, LinearConstraint)> for ConstraintSet {
    fn from_iter<I: IntoIterator<Item = (DeviceId, LinearConstraint)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::UnitRegistry;

    fn step(values: &[(&str, f64)]) -> Step {
        values
            .iter()
            .map(|(name, value)| (DeviceId::from(*name), *value))
            .collect()
    }

    #[test]
    fn test_evaluate_sum() {
        let constraint = LinearConstraint::new("mm")
            .with_term(2.0, "x")
            .with_term(-0.5, "z");
        let registry = UnitRegistry::new();

        let value = constraint
            .evaluate(&step(&[("x", 3.0), ("z", 4.0)]), None, &registry)
            .unwrap();
        assert!((value - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_evaluate_converts_to_target_units() {
        let constraint = LinearConstraint::new("mm").with_term(1.0, "x");
        let registry = UnitRegistry::new();

        let value = constraint
            .evaluate(&step(&[("x", 2.0)]), Some("um"), &registry)
            .unwrap();
        assert!((value - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_evaluate_dimensionless_skips_conversion() {
        let constraint = LinearConstraint::new("").with_term(3.0, "x");
        // Empty registry: any conversion attempt would fail
        let registry = UnitRegistry::empty();

        let value = constraint
            .evaluate(&step(&[("x", 2.0)]), Some("mm"), &registry)
            .unwrap();
        assert_eq!(value, 6.0);
    }

    #[test]
    fn test_evaluate_missing_variable() {
        let constraint = LinearConstraint::new("mm").with_term(1.0, "ghost");
        let registry = UnitRegistry::new();

        let err = constraint
            .evaluate(&step(&[("x", 2.0)]), None, &registry)
            .unwrap_err();
        assert!(matches!(err, PlanError::Configuration(ref msg) if msg.contains("ghost")));
    }

    #[test]
    fn test_evaluate_incompatible_units() {
        let constraint = LinearConstraint::new("mm").with_term(1.0, "x");
        let registry = UnitRegistry::new();

        let err = constraint
            .evaluate(&step(&[("x", 2.0)]), Some("deg"), &registry)
            .unwrap_err();
        assert!(matches!(err, PlanError::UnitConversion { .. }));
    }

    #[test]
    fn test_constraint_set_deserialize_preserves_order() {
        let json = r#"{
            "b": {"units": "mm", "terms": [{"coeff": 1.0, "var": "a"}]},
            "a": {"units": "mm", "terms": [{"coeff": 2.0, "var": "x"}]}
        }"#;
        let set: ConstraintSet = serde_json::from_str(json).unwrap();
        let targets: Vec<&str> = set.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(targets, vec!["b", "a"]);
        assert_eq!(set.get(&DeviceId::from("a")).unwrap().terms[0].coeff, 2.0);
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut set = ConstraintSet::new()
            .with("a", LinearConstraint::new("mm").with_term(1.0, "x"))
            .with("b", LinearConstraint::new("mm").with_term(1.0, "x"));
        set.insert("a", LinearConstraint::new("um").with_term(3.0, "z"));

        assert!(set.contains(&DeviceId::from("a")));
        assert!(!set.contains(&DeviceId::from("x")));
        assert_eq!(set.len(), 2);
        let targets: Vec<&str> = set.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(targets, vec!["a", "b"]);
        assert_eq!(set.get(&DeviceId::from("a")).unwrap().units, "um");
    }
}
