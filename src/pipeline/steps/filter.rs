use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::cmp::Ordering;

use idmapper_core::{value_to_text, MapperError, Result};

use super::{parse_params, Operation, OperationServices, StepOutput, StepParameters};
use crate::constants::FILTER_DATASET;
use crate::pipeline::context::ExecutionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    IsNull,
    NotNull,
    In,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilterParams {
    input_key: String,
    output_key: String,
    column: String,
    operator: FilterOperator,
    #[serde(default)]
    value: Option<Value>,
}

/// Keeps the rows of a dataset whose column satisfies a condition
pub struct FilterDataset {
    input_key: String,
    output_key: String,
    column: String,
    condition: Condition,
}

#[derive(Debug)]
enum Condition {
    Equals(String),
    NotEquals(String),
    GreaterThan(String),
    LessThan(String),
    IsNull,
    NotNull,
    In(Vec<String>),
}

impl Condition {
    fn from_params(operator: FilterOperator, value: Option<Value>) -> Result<Self> {
        let scalar = |value: Option<Value>| -> Result<String> {
            value
                .as_ref()
                .and_then(value_to_text)
                .ok_or_else(|| MapperError::config(format!("filter operator {:?} needs a non-empty value", operator)))
        };
        Ok(match operator {
            FilterOperator::Equals => Condition::Equals(scalar(value)?),
            FilterOperator::NotEquals => Condition::NotEquals(scalar(value)?),
            FilterOperator::GreaterThan => Condition::GreaterThan(scalar(value)?),
            FilterOperator::LessThan => Condition::LessThan(scalar(value)?),
            FilterOperator::IsNull => Condition::IsNull,
            FilterOperator::NotNull => Condition::NotNull,
            FilterOperator::In => match value {
                Some(Value::Array(items)) => Condition::In(items.iter().filter_map(value_to_text).collect()),
                _ => return Err(MapperError::config("filter operator In needs an array value")),
            },
        })
    }

    fn matches(&self, cell: Option<&str>) -> bool {
        match (self, cell) {
            (Condition::IsNull, cell) => cell.is_none(),
            (Condition::NotNull, cell) => cell.is_some(),
            (_, None) => matches!(self, Condition::NotEquals(_)),
            (Condition::Equals(expected), Some(cell)) => cell == expected.as_str(),
            (Condition::NotEquals(expected), Some(cell)) => cell != expected.as_str(),
            (Condition::GreaterThan(bound), Some(cell)) => compare(cell, bound) == Some(Ordering::Greater),
            (Condition::LessThan(bound), Some(cell)) => compare(cell, bound) == Some(Ordering::Less),
            (Condition::In(options), Some(cell)) => options.iter().any(|o| o.as_str() == cell),
        }
    }
}

/// Numeric comparison when both sides parse as numbers, text comparison otherwise
fn compare(cell: &str, bound: &str) -> Option<Ordering> {
    match (cell.trim().parse::<f64>(), bound.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b),
        _ => Some(cell.cmp(bound)),
    }
}

pub fn build(parameters: &StepParameters, _services: &OperationServices) -> Result<Box<dyn Operation>> {
    let params: FilterParams = parse_params(FILTER_DATASET, parameters)?;
    let condition = Condition::from_params(params.operator, params.value)?;
    Ok(Box::new(FilterDataset {
        input_key: params.input_key,
        output_key: params.output_key,
        column: params.column,
        condition,
    }))
}

#[async_trait]
impl Operation for FilterDataset {
    async fn execute(&self, context: &ExecutionContext) -> Result<StepOutput> {
        let input = context.dataset(&self.input_key)?;
        if !input.has_column(&self.column) {
            return Err(MapperError::data(format!(
                "dataset '{}' has no column '{}'",
                self.input_key, self.column
            )));
        }

        let mut table = input.clone();
        table.retain(|row| {
            let cell = row.get(&self.column).and_then(value_to_text);
            self.condition.matches(cell.as_deref())
        });

        let kept = table.len();
        Ok(StepOutput::new()
            .with_statistic(
                self.output_key.clone(),
                json!({"input_rows": input.len(), "kept": kept, "removed": input.len() - kept}),
            )
            .with_dataset(self.output_key.clone(), table))
    }
}
