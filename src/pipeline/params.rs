//! Placeholder expansion for strategy parameters.
//!
//! Strings may contain `${key}` or `${key:-default}`. A key is looked up in the
//! strategy's parameter table (with overrides applied on top); `parameters.key`
//! is an explicit spelling of the same lookup and `env.NAME` reads from the
//! environment map handed in by the caller. Parameters may reference each other,
//! so the table is rewritten pass by pass until it stops changing.
//!
//! A default may itself hold a placeholder (`${a:-${b}}`). The pattern never
//! spans a nested `${`, so the innermost placeholder is expanded first and the
//! outer one on a later pass.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, BTreeSet};

use idmapper_core::{MapperError, Result};

use super::strategy::StepDefinition;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.\-]*)(?::-([^{}$]*))?\}").expect("placeholder pattern compiles")
});

const PARAMETERS_PREFIX: &str = "parameters.";
const ENV_PREFIX: &str = "env.";

pub const DEFAULT_MAX_PASSES: usize = 10;

/// Values supplied at launch time rather than in the strategy file.
#[derive(Debug, Clone, Default)]
pub struct ParameterOverrides {
    /// Replace (or add) entries of the strategy's parameter table
    pub values: Map<String, Value>,
    /// Backing store for `${env.NAME}` references
    pub environment: BTreeMap<String, String>,
}

impl ParameterOverrides {
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Apply a `key=value` assignment. Numbers and booleans keep their type;
    /// anything else is taken as a string.
    pub fn assign(&mut self, assignment: &str) -> Result<()> {
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| MapperError::config(format!("expected key=value, got '{}'", assignment)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(MapperError::config(format!("empty parameter name in '{}'", assignment)));
        }
        let value = match serde_json::from_str::<Value>(raw.trim()) {
            Ok(parsed @ (Value::Bool(_) | Value::Number(_))) => parsed,
            _ => Value::String(raw.to_string()),
        };
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSteps {
    pub parameters: Map<String, Value>,
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone)]
pub struct ParameterResolver {
    max_passes: usize,
}

impl Default for ParameterResolver {
    fn default() -> Self {
        Self { max_passes: DEFAULT_MAX_PASSES }
    }
}

struct Scope<'a> {
    table: &'a Map<String, Value>,
    environment: &'a BTreeMap<String, String>,
}

impl Scope<'_> {
    fn lookup(&self, reference: &str) -> Option<Value> {
        if let Some(name) = reference.strip_prefix(ENV_PREFIX) {
            return self.environment.get(name).map(|v| Value::String(v.clone()));
        }
        let name = reference.strip_prefix(PARAMETERS_PREFIX).unwrap_or(reference);
        match self.table.get(name) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
        }
    }
}

impl ParameterResolver {
    pub fn new(max_passes: usize) -> Self {
        Self { max_passes: max_passes.max(1) }
    }

    pub fn max_passes(&self) -> usize {
        self.max_passes
    }

    /// Expand every placeholder in `steps`. Fails if any reference is missing, circular,
    /// or still changing after the configured number of passes.
    pub fn resolve(
        &self,
        steps: &[StepDefinition],
        parameters: &Map<String, Value>,
        overrides: &ParameterOverrides,
    ) -> Result<ResolvedSteps> {
        let table = self.resolve_parameters(parameters, overrides)?;
        let scope = Scope { table: &table, environment: &overrides.environment };

        let mut resolved = Vec::with_capacity(steps.len());
        for step in steps {
            let mut value = Value::Object(step.parameters.clone());
            for _ in 0..self.max_passes {
                let next = substitute_value(&value, &scope);
                if next == value {
                    break;
                }
                value = next;
            }
            check_unresolved(&[(format!("step '{}'", step.name), &value)], &scope)?;

            let parameters = match value {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            resolved.push(StepDefinition {
                name: step.name.clone(),
                operation: step.operation.clone(),
                parameters,
                required: step.required,
            });
        }

        Ok(ResolvedSteps { parameters: table, steps: resolved })
    }

    /// Resolve the parameter table against itself until it reaches a fixed point.
    pub fn resolve_parameters(
        &self,
        parameters: &Map<String, Value>,
        overrides: &ParameterOverrides,
    ) -> Result<Map<String, Value>> {
        let mut table = parameters.clone();
        for (key, value) in &overrides.values {
            table.insert(key.clone(), value.clone());
        }

        for _ in 0..self.max_passes {
            let snapshot = table.clone();
            let scope = Scope { table: &snapshot, environment: &overrides.environment };
            let mut changed = false;
            for value in table.values_mut() {
                let next = substitute_value(value, &scope);
                if next != *value {
                    *value = next;
                    changed = true;
                }
            }

            if !changed {
                let scope = Scope { table: &table, environment: &overrides.environment };
                let locations: Vec<(String, &Value)> =
                    table.iter().map(|(k, v)| (format!("parameter '{}'", k), v)).collect();
                check_unresolved(&locations, &scope)?;
                return Ok(table);
            }
        }

        let pending: Vec<&str> = table
            .iter()
            .filter(|(_, v)| !references(v).is_empty())
            .map(|(k, _)| k.as_str())
            .collect();
        Err(MapperError::config(format!(
            "Parameter resolution did not converge after {} passes; circular references among: {}",
            self.max_passes,
            pending.join(", ")
        )))
    }
}

fn substitute_value(value: &Value, scope: &Scope<'_>) -> Value {
    match value {
        Value::String(text) => substitute_str(text, scope),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_value(v, scope)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_str(text: &str, scope: &Scope<'_>) -> Value {
    // A string that is exactly one placeholder takes the referenced value as-is,
    // so lists and numbers survive substitution.
    if let Some(caps) = PLACEHOLDER.captures(text) {
        let whole = caps.get(0).map(|m| m.start() == 0 && m.end() == text.len()).unwrap_or(false);
        if whole {
            let default = caps.get(2).map(|m| m.as_str());
            return match (scope.lookup(&caps[1]), default) {
                (Some(Value::String(s)), Some(d)) if s.is_empty() => coerce(d),
                (Some(Value::String(s)), _) => coerce(&s),
                (Some(other), _) => other,
                (None, Some(d)) => coerce(d),
                (None, None) => Value::String(text.to_string()),
            };
        }
    }

    let replaced = PLACEHOLDER.replace_all(text, |caps: &Captures<'_>| {
        let default = caps.get(2).map(|m| m.as_str());
        match (scope.lookup(&caps[1]), default) {
            (Some(Value::String(s)), Some(d)) if s.is_empty() => d.to_string(),
            (Some(Value::String(s)), _) => s,
            (Some(other), _) => other.to_string(),
            (None, Some(d)) => d.to_string(),
            (None, None) => caps[0].to_string(),
        }
    });

    if replaced == text {
        Value::String(text.to_string())
    } else {
        coerce(&replaced)
    }
}

/// Turn boolean- and number-looking substitution results into native values.
/// Only text that prints back unchanged is converted, so `007` and `1.10` stay strings.
fn coerce(text: &str) -> Value {
    match text {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        if n.to_string() == text {
            return Value::Number(n.into());
        }
        return Value::String(text.to_string());
    }
    if let Ok(f) = text.parse::<f64>() {
        if let Some(n) = Number::from_f64(f).filter(|n| n.to_string() == text) {
            return Value::Number(n);
        }
    }
    Value::String(text.to_string())
}

/// Placeholder references still present anywhere inside `value`.
fn references(value: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_references(value, &mut found);
    found
}

fn collect_references(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            for caps in PLACEHOLDER.captures_iter(text) {
                found.push(caps[1].to_string());
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect_references(v, found)),
        _ => {}
    }
}

/// Strings that still hold a `${` the placeholder pattern cannot read, e.g. `${a:-$b}`.
fn collect_malformed(value: &Value, location: &str, found: &mut BTreeSet<String>) {
    match value {
        Value::String(text) => {
            if PLACEHOLDER.replace_all(text, "").contains("${") {
                found.insert(format!("'{}' in {}", text, location));
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_malformed(v, location, found)),
        Value::Object(map) => map.values().for_each(|v| collect_malformed(v, location, found)),
        _ => {}
    }
}

fn check_unresolved(locations: &[(String, &Value)], scope: &Scope<'_>) -> Result<()> {
    let mut missing: BTreeSet<String> = BTreeSet::new();
    let mut circular: BTreeSet<String> = BTreeSet::new();
    let mut malformed: BTreeSet<String> = BTreeSet::new();

    for (location, value) in locations {
        collect_malformed(value, location, &mut malformed);
        for reference in references(value) {
            if scope.lookup(&reference).is_some() {
                circular.insert(reference);
            } else {
                missing.insert(format!("${{{}}} in {}", reference, location));
            }
        }
    }

    if !malformed.is_empty() {
        return Err(MapperError::config(format!(
            "Malformed parameter placeholder(s): {}",
            malformed.into_iter().collect::<Vec<_>>().join("; ")
        )));
    }
    if !missing.is_empty() {
        return Err(MapperError::config(format!(
            "Unresolved parameter reference(s): {}",
            missing.into_iter().collect::<Vec<_>>().join("; ")
        )));
    }
    if !circular.is_empty() {
        return Err(MapperError::config(format!(
            "Circular parameter reference(s) involving: {}",
            circular.into_iter().collect::<Vec<_>>().join(", ")
        )));
    }
    Ok(())
}
