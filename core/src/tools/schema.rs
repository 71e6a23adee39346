//! JSON-schema-like description of tool inputs.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonSchema {
    Boolean {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    String {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Number {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Array {
        items: Box<JsonSchema>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Object {
        properties: BTreeMap<String, JsonSchema>,
        #[serde(skip_serializing_if = "Option::is_none")]
        required: Option<Vec<String>>,
        #[serde(
            rename = "additionalProperties",
            skip_serializing_if = "Option::is_none"
        )]
        additional_properties: Option<bool>,
    },
}

impl JsonSchema {
    pub fn string(description: &str) -> Self {
        JsonSchema::String {
            description: Some(description.to_string()),
        }
    }

    pub fn number(description: &str) -> Self {
        JsonSchema::Number {
            description: Some(description.to_string()),
        }
    }

    pub fn boolean(description: &str) -> Self {
        JsonSchema::Boolean {
            description: Some(description.to_string()),
        }
    }

    pub fn object(
        properties: BTreeMap<String, JsonSchema>,
        required: Vec<&str>,
    ) -> Self {
        JsonSchema::Object {
            properties,
            required: Some(required.into_iter().map(str::to_string).collect()),
            additional_properties: Some(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn object_schema_serialises_with_json_schema_field_names() {
        let schema = JsonSchema::object(
            BTreeMap::from([("command".to_string(), JsonSchema::string("shell command"))]),
            vec!["command"],
        );
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "shell command" }
                },
                "required": ["command"],
                "additionalProperties": false
            })
        );
    }
}
