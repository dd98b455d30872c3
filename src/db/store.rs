//! Connection profile storage.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};
use crate::models::ConnectionProfile;

/// Persistence for connection profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Store a new profile. Fails if the id is taken.
    async fn insert(&self, profile: ConnectionProfile) -> EngineResult<ConnectionProfile>;

    async fn get(&self, id: &str) -> EngineResult<Option<ConnectionProfile>>;

    /// Profiles of one owner, oldest first.
    async fn list_by_owner(&self, owner_id: &str) -> EngineResult<Vec<ConnectionProfile>>;

    /// Remove a profile, returning it when it existed.
    async fn remove(&self, id: &str) -> EngineResult<Option<ConnectionProfile>>;
}

/// Process-local profile store.
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<String, ConnectionProfile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn insert(&self, profile: ConnectionProfile) -> EngineResult<ConnectionProfile> {
        let mut profiles = self.profiles.write().await;
        if profiles.contains_key(&profile.id) {
            return Err(EngineError::invalid_input(format!(
                "Connection '{}' already exists",
                profile.id
            )));
        }
        profiles.insert(profile.id.clone(), profile.clone());
        Ok(profile)
    }

    async fn get(&self, id: &str) -> EngineResult<Option<ConnectionProfile>> {
        Ok(self.profiles.read().await.get(id).cloned())
    }

    async fn list_by_owner(&self, owner_id: &str) -> EngineResult<Vec<ConnectionProfile>> {
        let mut owned: Vec<_> = self
            .profiles
            .read()
            .await
            .values()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(owned)
    }

    async fn remove(&self, id: &str) -> EngineResult<Option<ConnectionProfile>> {
        Ok(self.profiles.write().await.remove(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewConnection;
    use tokio_test::{assert_err, assert_ok};

    fn profile(id: &str, owner: &str) -> ConnectionProfile {
        ConnectionProfile::new(
            id,
            NewConnection {
                owner_id: owner.into(),
                name: id.into(),
                host: "db.internal".into(),
                port: None,
                database: "shop".into(),
                username: "app".into(),
                password: "secret".into(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let store = MemoryProfileStore::new();
        assert_ok!(store.insert(profile("a", "u1")).await);
        assert_eq!(store.get("a").await.unwrap().unwrap().owner_id, "u1");

        assert!(store.remove("a").await.unwrap().is_some());
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.remove("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let store = MemoryProfileStore::new();
        assert_ok!(store.insert(profile("a", "u1")).await);
        let err = assert_err!(store.insert(profile("a", "u2")).await);
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_owner() {
        let store = MemoryProfileStore::new();
        store.insert(profile("a", "u1")).await.unwrap();
        store.insert(profile("b", "u2")).await.unwrap();
        store.insert(profile("c", "u1")).await.unwrap();

        let ids: Vec<_> = store
            .list_by_owner("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"a".to_string()) && ids.contains(&"c".to_string()));
        assert!(store.list_by_owner("nobody").await.unwrap().is_empty());
    }
}
