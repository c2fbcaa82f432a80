use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use snafu::Snafu;

type Result<T, E = SelectorError> = std::result::Result<T, E>;

#[derive(Debug, Eq, PartialEq, Snafu)]
pub enum SelectorError {
    #[snafu(display("label selector with binary operator {operator:?} must have values"))]
    LabelSelectorBinaryOperatorWithoutValues { operator: String },

    #[snafu(display("label selector with unary operator {operator:?} must not have values"))]
    LabelSelectorUnaryOperatorWithValues { operator: String },

    #[snafu(display("label selector has an invalid operator {operator:?}"))]
    LabelSelectorInvalidOperator { operator: String },
}

/// Evaluates a [`LabelSelector`] locally, without asking the API server.
pub trait LabelSelectorExt {
    /// Checks every match expression for a known operator and a fitting set of values.
    fn validate(&self) -> Result<()>;

    /// Evaluates the selector against a set of labels.
    ///
    /// An empty selector matches every set of labels. Invalid selectors never match anything,
    /// they return an error instead.
    fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool>;
}

impl LabelSelectorExt for LabelSelector {
    fn validate(&self) -> Result<()> {
        self.match_expressions
            .iter()
            .flatten()
            .try_for_each(validate_requirement)
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool> {
        self.validate()?;

        let labels_match = self
            .match_labels
            .iter()
            .flatten()
            .all(|(key, value)| labels.get(key) == Some(value));
        if !labels_match {
            return Ok(false);
        }

        for requirement in self.match_expressions.iter().flatten() {
            let value = labels.get(&requirement.key);
            let values = requirement.values.as_deref().unwrap_or_default();

            let satisfied = match requirement.operator.as_str() {
                "In" => value.is_some_and(|value| values.contains(value)),
                "NotIn" => value.is_none_or(|value| !values.contains(value)),
                "Exists" => value.is_some(),
                _ => value.is_none(),
            };
            if !satisfied {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

fn validate_requirement(requirement: &LabelSelectorRequirement) -> Result<()> {
    let has_values = requirement
        .values
        .as_ref()
        .is_some_and(|values| !values.is_empty());

    match requirement.operator.as_str() {
        "In" | "NotIn" if !has_values => LabelSelectorBinaryOperatorWithoutValuesSnafu {
            operator: requirement.operator.clone(),
        }
        .fail(),
        "Exists" | "DoesNotExist" if has_values => LabelSelectorUnaryOperatorWithValuesSnafu {
            operator: requirement.operator.clone(),
        }
        .fail(),
        "In" | "NotIn" | "Exists" | "DoesNotExist" => Ok(()),
        operator => LabelSelectorInvalidOperatorSnafu { operator }.fail(),
    }
}
