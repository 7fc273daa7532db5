use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use idmapper_core::{MapperError, Result};

fn default_required() -> bool {
    true
}

/// One entry of a strategy's step list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique within a strategy
    pub name: String,
    /// Registry key of the operation to run
    pub operation: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// A failing required step fails the run; an optional one is recorded and skipped
    #[serde(default = "default_required")]
    pub required: bool,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, operation: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            operation: operation.into(),
            parameters,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// A named, ordered step list plus the parameter table its placeholders refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub steps: Vec<StepDefinition>,
}

impl StrategyDefinition {
    /// Load a strategy file; the format is chosen by extension (`.toml` or `.json`).
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MapperError::config(format!("Failed to read strategy file '{}': {}", path.display(), e))
        })?;
        match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
            Some(ext) if ext == "toml" => Self::from_toml_str(&content),
            Some(ext) if ext == "json" => Self::from_json_str(&content),
            _ => Err(MapperError::config(format!(
                "Unsupported strategy file '{}': expected a .toml or .json extension",
                path.display()
            ))),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| MapperError::config(format!("Invalid strategy definition: {}", e)))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| MapperError::config(format!("Invalid strategy definition: {}", e)))
    }

    /// Structural checks that do not need the registry or parameter values.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(MapperError::config("Strategy name must not be empty"));
        }
        if self.steps.is_empty() {
            return Err(MapperError::config(format!("Strategy '{}' must have at least one step", self.name)));
        }

        let mut seen = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(MapperError::config(format!("Step {} has an empty name", index + 1)));
            }
            if step.operation.trim().is_empty() {
                return Err(MapperError::config(format!("Step '{}' has an empty operation", step.name)));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(MapperError::config(format!("Duplicate step name '{}'", step.name)));
            }
        }
        Ok(())
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}
