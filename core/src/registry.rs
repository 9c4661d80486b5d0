use std::collections::BTreeSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::catalog::ToolCatalog;
use crate::error::RegistryError;

// A named persona bound to one stage of the workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRole {
    pub name: String,
    pub instructions: String,

    // The only tools this role may call. Anything else gets rejected.
    #[serde(default)]
    pub allowed_tools: BTreeSet<String>,
}

impl AgentRole {
    pub fn new<I, S>(name: impl Into<String>, instructions: impl Into<String>, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            allowed_tools: tools.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, tool_name: &str) -> bool {
        self.allowed_tools.contains(tool_name)
    }
}

/// Ordered, immutable lookup of role definitions.
#[derive(Debug, Clone)]
pub struct RoleRegistry {
    roles: Vec<AgentRole>,
}

impl RoleRegistry {
    pub fn new(roles: Vec<AgentRole>) -> Self {
        Self { roles }
    }

    // Reads a roles file and returns the registry (unvalidated)
    pub async fn load(path: &str) -> Result<Self> {
        // 1. Read the JSON file
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read roles at '{}': {}", path, e))?;

        // 2. Parse it
        let roles: Vec<AgentRole> = serde_json::from_str(&content)?;
        if roles.is_empty() {
            tracing::warn!("Roles file '{}' defines no roles", path);
        }

        Ok(Self { roles })
    }

    /// Every allowed tool must exist in the catalog and names must be unique.
    /// Callers treat an error here as fatal at startup.
    pub fn validate(&self, catalog: &ToolCatalog) -> Result<(), RegistryError> {
        for (i, role) in self.roles.iter().enumerate() {
            if self.roles[..i].iter().any(|r| r.name == role.name) {
                return Err(RegistryError::DuplicateRole(role.name.clone()));
            }
            if let Some(tool) = role.allowed_tools.iter().find(|t| !catalog.contains(t)) {
                return Err(RegistryError::UnknownTool {
                    role: role.name.clone(),
                    tool: tool.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&AgentRole> {
        self.roles.iter().find(|r| r.name == name)
    }

    pub fn roles(&self) -> &[AgentRole] {
        &self.roles
    }

    /// Resolve role names into an ordered sequence.
    pub fn sequence<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<AgentRole>, RegistryError> {
        if names.is_empty() {
            return Err(RegistryError::EmptySequence);
        }
        names
            .iter()
            .map(|name| {
                self.get(name.as_ref())
                    .cloned()
                    .ok_or_else(|| RegistryError::UnknownRole(name.as_ref().to_string()))
            })
            .collect()
    }

    /// The merchant ML/TL review pipeline.
    pub fn standard() -> Self {
        let read_tools = [
            "get_merchant_profile",
            "get_merchant_aggregated_stats",
            "get_anomalous_transactions",
        ];

        Self::new(vec![
            AgentRole::new("Data Aggregation", DATA_AGGREGATION, read_tools),
            AgentRole::new("Pattern Detection", PATTERN_DETECTION, read_tools),
            AgentRole::new("Risk Assessment", RISK_ASSESSMENT, Vec::<String>::new()),
            AgentRole::new(
                "Action Alerting",
                ACTION_ALERTING,
                ["update_merchant_risk_status", "create_aml_manual_review_case"],
            ),
        ])
    }
}

const DATA_AGGREGATION: &str = "Your task is to gather and summarize relevant data for a given merchant ID covering a specific period.
Use the provided tools to fetch:
1. The merchant's profile.
2. Aggregated transaction statistics (total volume, value, avg value, card types, countries, rounded values).
3. Examples of anomalous transactions (e.g., high value).
Present this information clearly and concisely for the next agent. Use ISO format (YYYY-MM-DDTHH:MM:SS) for dates.";

const PATTERN_DETECTION: &str = "Analyze the provided aggregated data, anomalous transaction examples, and profile information for the merchant.
Identify patterns potentially indicative of Money/Transaction Laundering based on known indicators like:
- High percentage of prepaid cards
- High percentage of rounded transaction values
- Significant activity from high-risk jurisdictions (check profile and card countries)
- Transaction values inconsistent with the merchant category code (MCC) profile
- Structuring patterns (if suggested by transaction examples or velocity)
- Ownership changes noted in profile combined with other risks.
You may call the data tools again if something in the summary needs checking.
List the specific patterns detected.";

const RISK_ASSESSMENT: &str = "Based *only* on the input (merchant profile, aggregated stats, and detected ML/TL patterns), assess the overall ML/TL risk level for the merchant.
Assign a risk category: 'Low', 'Medium', 'High', or 'Critical'.
Provide a clear, concise justification summarizing the key contributing factors and detected indicators. Do not use external tools.";

const ACTION_ALERTING: &str = "You receive the assessed ML/TL risk category for the merchant and its justification.
Based on this assessment, determine the appropriate next steps according to this policy:
- Low: No action needed. State this.
- Medium: Update status to 'Medium Risk Watchlist'.
- High: Update status to 'High Risk' and create a manual review case.
- Critical: Update status to 'Critical Risk - Urgent Review' and create a manual review case.
Use the provided tools ('update_merchant_risk_status', 'create_aml_manual_review_case') to execute these actions. Confirm the actions taken.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolCatalogEntry;

    fn catalog(names: &[&str]) -> ToolCatalog {
        ToolCatalog::from_entries(
            names
                .iter()
                .map(|n| ToolCatalogEntry {
                    name: n.to_string(),
                    description: String::new(),
                    parameters: Default::default(),
                })
                .collect(),
        )
    }

    fn full_catalog() -> ToolCatalog {
        catalog(&[
            "get_merchant_profile",
            "get_merchant_aggregated_stats",
            "get_anomalous_transactions",
            "update_merchant_risk_status",
            "create_aml_manual_review_case",
        ])
    }

    #[test]
    fn standard_pipeline_validates_against_full_catalog() {
        let registry = RoleRegistry::standard();
        assert_eq!(registry.roles().len(), 4);
        assert!(registry.validate(&full_catalog()).is_ok());
    }

    #[test]
    fn risk_assessment_has_no_tools() {
        let registry = RoleRegistry::standard();
        let role = registry.get("Risk Assessment").unwrap();
        assert!(role.allowed_tools.is_empty());
    }

    #[test]
    fn missing_catalog_tool_is_rejected() {
        let registry = RoleRegistry::standard();
        let partial = catalog(&["get_merchant_profile"]);
        match registry.validate(&partial) {
            Err(RegistryError::UnknownTool { role, tool }) => {
                assert_eq!(role, "Data Aggregation");
                assert_eq!(tool, "get_anomalous_transactions");
            }
            other => panic!("expected UnknownTool, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_role_names_are_rejected() {
        let registry = RoleRegistry::new(vec![
            AgentRole::new("Screener", "a", Vec::<String>::new()),
            AgentRole::new("Screener", "b", Vec::<String>::new()),
        ]);
        assert_eq!(
            registry.validate(&catalog(&[])),
            Err(RegistryError::DuplicateRole("Screener".into()))
        );
    }

    #[test]
    fn sequence_preserves_requested_order() {
        let registry = RoleRegistry::standard();
        let seq = registry
            .sequence(&["Risk Assessment", "Data Aggregation"])
            .unwrap();
        let names: Vec<&str> = seq.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Risk Assessment", "Data Aggregation"]);
    }

    #[test]
    fn sequence_rejects_unknown_and_empty() {
        let registry = RoleRegistry::standard();
        assert_eq!(
            registry.sequence(&["Auditor"]),
            Err(RegistryError::UnknownRole("Auditor".into()))
        );
        assert_eq!(
            registry.sequence::<&str>(&[]),
            Err(RegistryError::EmptySequence)
        );
    }

    #[tokio::test]
    async fn load_reads_roles_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roles.json");
        let body = r#"[{"name":"Screener","instructions":"Screen it.","allowed_tools":["lookup_txn_count"]}]"#;
        tokio::fs::write(&path, body).await.unwrap();

        let registry = RoleRegistry::load(path.to_str().unwrap()).await.unwrap();

        let role = registry.get("Screener").unwrap();
        assert!(role.allows("lookup_txn_count"));
        assert!(registry.validate(&catalog(&["lookup_txn_count"])).is_ok());
    }
}
