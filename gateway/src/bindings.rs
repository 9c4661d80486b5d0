//! Role name -> hosted assistant id, persisted next to the binary.
//!
//! Resolved once at startup: stored ids that still exist are reused, anything
//! missing or stale gets a fresh assistant and the file is rewritten.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use riskflow_core::catalog::ToolCatalog;
use riskflow_core::llm::Brain;
use riskflow_core::registry::{AgentRole, RoleRegistry};

/// Whatever can check for and create hosted assistants.
#[async_trait]
pub trait AssistantProvisioner: Send + Sync {
    async fn exists(&self, assistant_id: &str) -> Result<bool>;
    async fn create(&self, role: &AgentRole, catalog: &ToolCatalog) -> Result<String>;
}

#[async_trait]
impl AssistantProvisioner for Brain {
    async fn exists(&self, assistant_id: &str) -> Result<bool> {
        self.assistant_exists(assistant_id).await
    }

    async fn create(&self, role: &AgentRole, catalog: &ToolCatalog) -> Result<String> {
        self.create_assistant(role, catalog).await
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BindingStore {
    #[serde(skip)]
    path: PathBuf,
    assistants: BTreeMap<String, String>,
}

impl BindingStore {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !fs::try_exists(&path).await.unwrap_or(false) {
            info!("No assistant bindings at '{}', starting fresh", path.display());
            return Ok(Self {
                path,
                ..Default::default()
            });
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read bindings at '{}'", path.display()))?;
        let mut store: BindingStore = serde_json::from_str(&content)
            .with_context(|| format!("Bindings at '{}' are malformed", path.display()))?;
        store.path = path;
        Ok(store)
    }

    pub async fn save(&self) -> Result<()> {
        let body = serde_json::to_string_pretty(self)?;
        fs::write(&self.path, body)
            .await
            .with_context(|| format!("Failed to write bindings at '{}'", self.path.display()))
    }

    pub fn get(&self, role: &str) -> Option<&str> {
        self.assistants.get(role).map(String::as_str)
    }

    /// Make sure every role has a live assistant and persist the mapping.
    pub async fn resolve(
        &mut self,
        provisioner: &dyn AssistantProvisioner,
        registry: &RoleRegistry,
        catalog: &ToolCatalog,
    ) -> Result<HashMap<String, String>> {
        let mut changed = false;

        for role in registry.roles() {
            if let Some(id) = self.get(&role.name) {
                if provisioner.exists(id).await? {
                    info!("Using existing assistant for '{}': {}", role.name, id);
                    continue;
                }
                warn!("Assistant {} for '{}' is gone, recreating", id, role.name);
            }

            let id = provisioner.create(role, catalog).await?;
            self.assistants.insert(role.name.clone(), id);
            changed = true;
        }

        if changed {
            self.save().await?;
            info!("Saved assistant bindings to '{}'", self.path.display());
        }

        Ok(registry
            .roles()
            .iter()
            .filter_map(|r| self.get(&r.name).map(|id| (r.name.clone(), id.to_string())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeProvisioner {
        live: Vec<String>,
        created: Mutex<Vec<String>>,
        offline: bool,
    }

    #[async_trait]
    impl AssistantProvisioner for FakeProvisioner {
        async fn exists(&self, assistant_id: &str) -> Result<bool> {
            if self.offline {
                anyhow::bail!("connection reset while looking up {}", assistant_id);
            }
            Ok(self.live.iter().any(|id| id == assistant_id))
        }

        async fn create(&self, role: &AgentRole, _catalog: &ToolCatalog) -> Result<String> {
            let id = format!("asst_{}", role.name.to_lowercase().replace(' ', "_"));
            self.created.lock().unwrap().push(role.name.clone());
            Ok(id)
        }
    }

    fn registry() -> RoleRegistry {
        RoleRegistry::new(vec![
            AgentRole::new("Screener", "screen", Vec::<String>::new()),
            AgentRole::new("Escalation", "escalate", Vec::<String>::new()),
        ])
    }

    #[tokio::test]
    async fn missing_file_creates_and_persists_every_role() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assistants.json");

        let mut store = BindingStore::load(&path).await.unwrap();
        let provisioner = FakeProvisioner::default();
        let bindings = store
            .resolve(&provisioner, &registry(), &ToolCatalog::default())
            .await
            .unwrap();

        assert_eq!(bindings["Screener"], "asst_screener");
        assert_eq!(bindings["Escalation"], "asst_escalation");

        let reloaded = BindingStore::load(&path).await.unwrap();
        assert_eq!(reloaded.get("Screener"), Some("asst_screener"));
    }

    #[tokio::test]
    async fn live_ids_are_reused_and_stale_ones_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assistants.json");
        fs::write(
            &path,
            r#"{"assistants":{"Screener":"asst_kept","Escalation":"asst_deleted"}}"#,
        )
        .await
        .unwrap();

        let mut store = BindingStore::load(&path).await.unwrap();
        let provisioner = FakeProvisioner {
            live: vec!["asst_kept".to_string()],
            ..Default::default()
        };
        let bindings = store
            .resolve(&provisioner, &registry(), &ToolCatalog::default())
            .await
            .unwrap();

        assert_eq!(bindings["Screener"], "asst_kept");
        assert_eq!(bindings["Escalation"], "asst_escalation");
        assert_eq!(*provisioner.created.lock().unwrap(), vec!["Escalation"]);
    }

    #[tokio::test]
    async fn lookup_failure_keeps_stored_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assistants.json");
        let original = r#"{"assistants":{"Screener":"asst_kept","Escalation":"asst_other"}}"#;
        fs::write(&path, original).await.unwrap();

        let mut store = BindingStore::load(&path).await.unwrap();
        let provisioner = FakeProvisioner {
            offline: true,
            ..Default::default()
        };
        let result = store
            .resolve(&provisioner, &registry(), &ToolCatalog::default())
            .await;

        assert!(result.is_err());
        assert!(provisioner.created.lock().unwrap().is_empty());
        assert_eq!(fs::read_to_string(&path).await.unwrap(), original);
    }
}
