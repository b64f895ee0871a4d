use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// The slice of JSON Schema the bundled tools describe their parameters
/// with: scalar booleans, strings, numbers, and a single level of object
/// nesting. Anything richer belongs in the tool's description text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonSchema {
    Boolean {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Models emit both `number` and `integer`; quill treats them alike.
    #[serde(alias = "integer")]
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Object {
        properties: BTreeMap<String, JsonSchema>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required: Vec<String>,
        /// Tool arguments are closed: anything the schema does not name is
        /// rejected rather than silently passed through.
        #[serde(rename = "additionalProperties", default)]
        additional_properties: bool,
    },
}

impl JsonSchema {
    pub fn string(description: &str) -> Self {
        JsonSchema::String {
            description: Some(description.to_string()),
        }
    }

    pub fn object(properties: BTreeMap<String, JsonSchema>, required: &[&str]) -> Self {
        JsonSchema::Object {
            properties,
            required: required.iter().map(|s| s.to_string()).collect(),
            additional_properties: false,
        }
    }
}
