use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("tool manifest has an empty name")]
    EmptyName,
    #[error("tool manifest '{0}' has an empty description")]
    EmptyDescription(String),
    #[error("tool manifest '{0}' input_schema must be a JSON object")]
    NotAnObject(String),
    #[error("tool manifest '{name}' input_schema is not a valid JSON schema: {reason}")]
    InvalidSchema { name: String, reason: String },
}

/// Validates an embedded tool manifest at registration time. The schema
/// document itself must be a valid draft 2020-12 schema; a violation here is
/// fatal at startup. Call-time inputs are not pre-validated, executors
/// reject malformed input themselves.
pub fn validate_manifest(name: &str, description: &str, input_schema: &Value) -> Result<(), SchemaError> {
    if name.trim().is_empty() {
        return Err(SchemaError::EmptyName);
    }

    if description.trim().is_empty() {
        return Err(SchemaError::EmptyDescription(name.to_string()));
    }

    if !input_schema.is_object() {
        return Err(SchemaError::NotAnObject(name.to_string()));
    }

    jsonschema::meta::validate(input_schema).map_err(|error| SchemaError::InvalidSchema {
        name: name.to_string(),
        reason: error.to_string(),
    })?;

    // Compiling catches references and keywords the metaschema pass lets by.
    jsonschema::validator_for(input_schema).map_err(|error| SchemaError::InvalidSchema {
        name: name.to_string(),
        reason: error.to_string(),
    })?;

    Ok(())
}

/// True when `instance` validates against `schema`. Used to check manifest
/// examples against their own input schema.
pub fn schema_accepts(schema: &Value, instance: &Value) -> bool {
    match jsonschema::validator_for(schema) {
        Ok(validator) => validator.is_valid(instance),
        Err(_) => false,
    }
}
