//! Host-provided node class schemas.
//!
//! The rule scanner works against this table instead of reflecting on
//! installed node implementations: the host runtime already knows every
//! class's declared input names and types.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Declared schema of a single node input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    /// Declared type token, upper-cased by convention (`"INT"`, `"FLOAT"`,
    /// `"STRING"`, or a link type). Empty when the host did not declare one.
    #[serde(default)]
    pub type_name: String,
}

impl InputSpec {
    pub fn typed(type_name: impl Into<String>) -> Self {
        InputSpec {
            type_name: type_name.into().to_uppercase(),
        }
    }
}

/// Declared schema of one node class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassSpec {
    /// Required inputs, in declaration order.
    #[serde(default)]
    pub required: IndexMap<String, InputSpec>,
    /// Optional inputs, in declaration order.
    #[serde(default)]
    pub optional: IndexMap<String, InputSpec>,
}

impl ClassSpec {
    /// All declared input names, required first.
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.required
            .keys()
            .chain(self.optional.keys())
            .map(String::as_str)
    }

    /// Declared type for an input, looking at required then optional.
    pub fn declared_type(&self, name: &str) -> Option<&str> {
        self.required
            .get(name)
            .or_else(|| self.optional.get(name))
            .map(|spec| spec.type_name.as_str())
            .filter(|t| !t.is_empty())
    }

    /// Builder used by tests and the test-node stub.
    pub fn with_required(mut self, name: impl Into<String>, type_name: &str) -> Self {
        self.required.insert(name.into(), InputSpec::typed(type_name));
        self
    }

    pub fn with_optional(mut self, name: impl Into<String>, type_name: &str) -> Self {
        self.optional.insert(name.into(), InputSpec::typed(type_name));
        self
    }
}

/// The installed class table: class name → schema.
pub type ClassTable = IndexMap<String, ClassSpec>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_names_required_first() {
        let spec = ClassSpec::default()
            .with_required("seed", "INT")
            .with_required("steps", "INT")
            .with_optional("denoise", "FLOAT");
        let names: Vec<&str> = spec.input_names().collect();
        assert_eq!(names, vec!["seed", "steps", "denoise"]);
        assert_eq!(spec.declared_type("denoise"), Some("FLOAT"));
        assert_eq!(spec.declared_type("missing"), None);
    }
}
