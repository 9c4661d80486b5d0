use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Semantic type of a tool parameter, as advertised by the tool service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    fn as_schema_type(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

// One entry of GET /tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCatalogEntry {
    pub name: String,
    pub description: String,

    // The tool service may omit parameters entirely; the model then sees an
    // empty argument object.
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
}

impl ToolCatalogEntry {
    /// Render the parameter map as the JSON Schema object function tools expect.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for (name, spec) in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(spec.kind.as_schema_type()));
            if let Some(description) = &spec.description {
                prop.insert("description".into(), json!(description));
            }
            // Array parameters (e.g. key_indicators) carry lists of strings.
            if spec.kind == ParamType::Array {
                prop.insert("items".into(), json!({ "type": "string" }));
            }
            properties.insert(name.clone(), Value::Object(prop));

            if spec.required {
                required.push(json!(name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Read-only snapshot of the tool service catalog, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    entries: Vec<ToolCatalogEntry>,
}

impl ToolCatalog {
    pub fn from_entries(entries: Vec<ToolCatalogEntry>) -> Self {
        Self { entries }
    }

    // Asks the tool service what it can do
    pub async fn fetch(http: &reqwest::Client, base_url: &str) -> Result<Self> {
        let url = format!("{}/tools", base_url.trim_end_matches('/'));

        // 1. Query the service
        let response = http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach tool service at '{}'", url))?
            .error_for_status()
            .with_context(|| format!("Tool service at '{}' rejected catalog query", url))?;

        // 2. Parse it
        let entries: Vec<ToolCatalogEntry> = response
            .json()
            .await
            .context("Tool service returned a malformed catalog")?;

        // 3. Sanity check: names are the lookup key
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|e| e.name == entry.name) {
                tracing::warn!("Tool '{}' listed more than once; first entry wins", entry.name);
            }
        }

        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&ToolCatalogEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn entries(&self) -> &[ToolCatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_entry() -> ToolCatalogEntry {
        serde_json::from_value(json!({
            "name": "get_anomalous_transactions",
            "description": "Retrieves examples of potentially anomalous transactions.",
            "parameters": {
                "merchant_id": { "type": "string", "required": true },
                "min_amount": { "type": "number", "description": "Threshold, default 1000.0" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn schema_lists_required_parameters_only() {
        let schema = stats_entry().json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["merchant_id"]));
        assert_eq!(schema["properties"]["min_amount"]["type"], "number");
        assert_eq!(
            schema["properties"]["min_amount"]["description"],
            "Threshold, default 1000.0"
        );
    }

    #[test]
    fn entry_without_parameters_parses() {
        let entry: ToolCatalogEntry = serde_json::from_value(json!({
            "name": "get_merchant_profile",
            "description": "Gets profile information for a specific merchant."
        }))
        .unwrap();
        assert!(entry.parameters.is_empty());
        assert_eq!(entry.json_schema()["properties"], json!({}));
    }

    #[test]
    fn array_parameters_declare_string_items() {
        let entry: ToolCatalogEntry = serde_json::from_value(json!({
            "name": "create_aml_manual_review_case",
            "description": "Creates a manual review case.",
            "parameters": { "key_indicators": { "type": "array", "required": true } }
        }))
        .unwrap();
        assert_eq!(
            entry.json_schema()["properties"]["key_indicators"]["items"]["type"],
            "string"
        );
    }

    #[test]
    fn lookup_by_name() {
        let catalog = ToolCatalog::from_entries(vec![stats_entry()]);
        assert!(catalog.contains("get_anomalous_transactions"));
        assert!(!catalog.contains("lookup_txn_count"));
        assert_eq!(catalog.len(), 1);
    }
}
