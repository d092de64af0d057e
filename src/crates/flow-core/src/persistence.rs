//! Loading, saving, and materialising [`FlowDefinition`]s.
//!
//! Grounded on `loader.py::FlowLoader`: `from_dict`/`from_json`,
//! `load_from_file`/`save_to_file`, `load_from_redis`/`save_to_redis`/
//! `list_flows_in_redis`/`delete_from_redis` (key prefix `"parrot:flow:"`),
//! and `to_agents_flow` materialisation. The Rust port keeps the same
//! operation set and the same `"flow:"`-prefixed key convention, but binds
//! the KV backend to a [`KvStore`] trait instead of a concrete Redis
//! client — no Redis crate appears anywhere in the dependency corpus, so a
//! trait lets callers plug in whatever they already depend on (see
//! DESIGN.md).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::definition::FlowDefinition;
use crate::engine::{Agent, AgentRegistry, FlowEngine};
use crate::error::{FlowError, Result};

/// Key namespace every persisted flow lives under, mirroring
/// `loader.py::REDIS_KEY_PREFIX`.
pub const KEY_PREFIX: &str = "parrot:flow:";

/// Minimal async key-value backend. Implementations typically wrap
/// whatever store the embedding application already uses (Redis, an
/// in-process map, a database table) — `flow-core` ships only the trait
/// and an in-memory implementation for tests.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// An in-memory [`KvStore`], useful for tests and single-process
/// deployments that don't need a shared backend.
#[derive(Default)]
pub struct InMemoryKvStore {
    data: tokio::sync::Mutex<HashMap<String, String>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.data.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.lock().await.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .data
            .lock()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

fn flow_key(name: &str) -> String {
    format!("{KEY_PREFIX}{name}")
}

/// Parse a [`FlowDefinition`] from a JSON string and validate it.
pub fn from_json(json: &str) -> Result<FlowDefinition> {
    let definition: FlowDefinition = serde_json::from_str(json)?;
    definition.validate()?;
    Ok(definition)
}

/// Parse a [`FlowDefinition`] from a YAML string and validate it.
pub fn from_yaml(yaml: &str) -> Result<FlowDefinition> {
    let definition: FlowDefinition = serde_yaml::from_str(yaml)?;
    definition.validate()?;
    Ok(definition)
}

/// Serialize a [`FlowDefinition`] to pretty JSON, stamping `updated_at`.
pub fn to_json(definition: &mut FlowDefinition) -> Result<String> {
    definition.updated_at = Some(chrono::Utc::now());
    Ok(serde_json::to_string_pretty(definition)?)
}

/// Load a flow definition from a JSON or YAML file, detected by extension.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<FlowDefinition> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => from_yaml(&content),
        _ => from_json(&content),
    }
}

/// Save a flow definition to a JSON or YAML file, detected by extension.
pub fn save_to_file(definition: &mut FlowDefinition, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    definition.updated_at = Some(chrono::Utc::now());
    let content = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::to_string(definition)?,
        _ => serde_json::to_string_pretty(definition)?,
    };
    std::fs::write(path, content)?;
    Ok(())
}

/// Load a flow definition from a [`KvStore`] by name.
pub async fn load_from_kv(store: &dyn KvStore, name: &str) -> Result<FlowDefinition> {
    let raw = store
        .get(&flow_key(name))
        .await?
        .ok_or_else(|| FlowError::KvStore(format!("flow '{name}' not found")))?;
    from_json(&raw)
}

/// Save a flow definition to a [`KvStore`] under its own `flow` name.
pub async fn save_to_kv(store: &dyn KvStore, definition: &mut FlowDefinition) -> Result<()> {
    let key = flow_key(&definition.flow);
    let json = to_json(definition)?;
    store.set(&key, json).await
}

/// List flow names currently persisted in `store`.
pub async fn list_flows_in_kv(store: &dyn KvStore) -> Result<Vec<String>> {
    let keys = store.keys_with_prefix(KEY_PREFIX).await?;
    Ok(keys.into_iter().map(|k| k.trim_start_matches(KEY_PREFIX).to_string()).collect())
}

/// Delete a persisted flow definition by name.
pub async fn delete_from_kv(store: &dyn KvStore, name: &str) -> Result<()> {
    store.delete(&flow_key(name)).await
}

/// Materialise a loaded [`FlowDefinition`] into a runnable [`FlowEngine`],
/// matching `loader.py::to_agents_flow`.
pub fn to_engine(
    definition: FlowDefinition,
    registry: Arc<dyn AgentRegistry>,
    extra_agents: &HashMap<String, Arc<dyn Agent>>,
) -> Result<FlowEngine> {
    FlowEngine::new(definition, registry, extra_agents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{NodeDefinition, NodeType};

    fn sample() -> FlowDefinition {
        FlowDefinition::new("roundtrip", vec![NodeDefinition::new("start", NodeType::Start)], vec![])
    }

    #[test]
    fn json_round_trip_via_from_json() {
        let mut def = sample();
        let json = to_json(&mut def).unwrap();
        let back = from_json(&json).unwrap();
        assert_eq!(back.flow, "roundtrip");
    }

    #[test]
    fn yaml_round_trip() {
        let def = sample();
        let yaml = serde_yaml::to_string(&def).unwrap();
        let back = from_yaml(&yaml).unwrap();
        assert_eq!(back.flow, "roundtrip");
    }

    #[tokio::test]
    async fn kv_round_trip_and_listing() {
        let store = InMemoryKvStore::new();
        let mut def = sample();
        save_to_kv(&store, &mut def).await.unwrap();

        let names = list_flows_in_kv(&store).await.unwrap();
        assert_eq!(names, vec!["roundtrip".to_string()]);

        let loaded = load_from_kv(&store, "roundtrip").await.unwrap();
        assert_eq!(loaded.flow, "roundtrip");

        delete_from_kv(&store, "roundtrip").await.unwrap();
        assert!(load_from_kv(&store, "roundtrip").await.is_err());
    }

    #[tokio::test]
    async fn loading_missing_flow_is_an_error() {
        let store = InMemoryKvStore::new();
        let err = load_from_kv(&store, "ghost").await.unwrap_err();
        assert!(matches!(err, FlowError::KvStore(_)));
    }
}
