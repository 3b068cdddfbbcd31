//! Capability declarations and their parameter schemas.

use crate::{Permission, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ============================================================================
// PARAMETER SCHEMA
// ============================================================================

/// JSON shape a parameter must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// Passthrough, any JSON value including null.
    Any,
}

impl ParamKind {
    /// Whether `value` has this shape. Integers also satisfy `Number`.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
            ParamKind::Any => true,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
            ParamKind::Any => "any",
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// Tagged parameter schema checked at dispatch time.
///
/// The default schema declares nothing and accepts any extra field, which
/// makes it a pure passthrough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub specs: Vec<ParameterSpec>,
    /// Accept parameters not named in `specs`.
    pub allow_extra: bool,
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::open()
    }
}

impl ParameterSchema {
    /// Schema that accepts anything.
    pub fn open() -> Self {
        Self {
            specs: Vec::new(),
            allow_extra: true,
        }
    }

    /// Schema that rejects undeclared fields.
    pub fn strict() -> Self {
        Self {
            specs: Vec::new(),
            allow_extra: false,
        }
    }

    pub fn with_param(mut self, spec: ParameterSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn allow_extra(mut self, allow: bool) -> Self {
        self.allow_extra = allow;
        self
    }

    /// Check `params` against the schema. The first violation found is returned.
    pub fn validate(&self, params: &BTreeMap<String, Value>) -> Result<(), ValidationError> {
        for spec in &self.specs {
            match params.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(ValidationError::RequiredFieldMissing {
                        field: spec.name.clone(),
                    });
                }
                None | Some(Value::Null) => {}
                Some(value) if !spec.kind.matches(value) => {
                    return Err(ValidationError::InvalidValue {
                        field: spec.name.clone(),
                        reason: format!("expected {}", spec.kind.as_str()),
                    });
                }
                Some(_) => {}
            }
        }

        if !self.allow_extra {
            if let Some(extra) = params
                .keys()
                .find(|k| !self.specs.iter().any(|s| &s.name == *k))
            {
                return Err(ValidationError::UnexpectedField {
                    field: extra.clone(),
                });
            }
        }

        Ok(())
    }
}

// ============================================================================
// CAPABILITY
// ============================================================================

/// A named unit of work an agent can perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub required_permission: Permission,
    /// Declared cost; zero means "use the default deadline".
    pub estimated_duration_ms: u64,
    pub owner_agent_id: String,
    pub parameters: ParameterSchema,
}

impl Capability {
    pub fn new(
        name: impl Into<String>,
        owner_agent_id: impl Into<String>,
        required_permission: Permission,
    ) -> Self {
        Self {
            name: name.into(),
            required_permission,
            estimated_duration_ms: 0,
            owner_agent_id: owner_agent_id.into(),
            parameters: ParameterSchema::open(),
        }
    }

    pub fn with_estimated_duration_ms(mut self, ms: u64) -> Self {
        self.estimated_duration_ms = ms;
        self
    }

    pub fn with_parameters(mut self, schema: ParameterSchema) -> Self {
        self.parameters = schema;
        self
    }
}
