use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use toolwire_core::Logger;
use toolwire_mcp::ToolInfo;

use crate::schema::{Schema, SchemaError, ValidationError};

/// A tool discovered on a connected server.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    /// Unique tool name across all servers (last discovery wins)
    pub name: String,
    /// Human-readable description, empty when the server gave none
    pub description: String,
    /// JSON Schema exactly as the server declared it
    pub input_schema: Value,
    /// Parsed form of `input_schema`. `Ok(None)` accepts any arguments, an
    /// error rejects every call.
    #[serde(skip)]
    pub schema: Result<Option<Schema>, SchemaError>,
    /// Name of the server that owns the tool
    pub server: String,
    /// When the tool was last (re)discovered
    pub updated_at: DateTime<Utc>,
}

impl Tool {
    /// Build from a `tools/list` entry. An unusable schema is logged and kept
    /// as an error so calls to the tool are refused.
    pub fn from_info(info: ToolInfo, server: &str, log: &Logger) -> Self {
        let input_schema = info.input_schema.unwrap_or(Value::Null);
        let schema = Schema::parse(&input_schema);
        if let Err(e) = &schema {
            tracing::warn!(
                parent: log.span(),
                tool = %info.name,
                error = %e,
                "Unusable input schema, calls will be rejected"
            );
        }

        Self {
            name: info.name,
            description: info.description.unwrap_or_default(),
            input_schema,
            schema,
            server: server.to_string(),
            updated_at: Utc::now(),
        }
    }

    /// Check arguments against the tool's schema.
    pub fn validate(&self, args: &Value) -> Result<(), ValidationError> {
        match &self.schema {
            Ok(Some(schema)) => schema.validate(args),
            Ok(None) => Ok(()),
            Err(e) => Err(ValidationError::InvalidSchema(e.clone())),
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.server, self.name)
    }
}
