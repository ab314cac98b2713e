use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::api::{AccessToken, ApiResult, AuthProvider};
use crate::store::{PersistentStore, StoreKey};

/// An access token as persisted, with its absolute expiry in epoch millis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: i64,
    pub expires_at: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CachedToken {
    pub fn issue(token: &AccessToken, now: DateTime<Utc>) -> Self {
        Self {
            access_token: token.access_token.clone(),
            expires_in: token.expires_in,
            expires_at: now.timestamp_millis() + token.expires_in.saturating_mul(1000),
            extra: token.extra.clone(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now.timestamp_millis()
    }
}

#[derive(Debug, Clone)]
pub struct TokenCache {
    store: PersistentStore,
}

impl TokenCache {
    pub fn new(store: PersistentStore) -> Self {
        Self { store }
    }

    #[instrument(skip(self, token))]
    pub fn remember(&self, token: &AccessToken, now: DateTime<Utc>) -> CachedToken {
        let cached = CachedToken::issue(token, now);
        if let Err(err) = self.store.save(StoreKey::AuthToken, &cached) {
            warn!(error = %format!("{err:#}"), "failed to cache access token");
        }
        cached
    }

    /// Returns the cached token if it has not expired yet. Expired and
    /// unreadable entries are dropped from storage.
    #[instrument(skip(self))]
    pub fn load_valid(&self, now: DateTime<Utc>) -> Option<CachedToken> {
        if !self.store.contains(StoreKey::AuthToken) {
            return None;
        }
        match self.store.load_opt::<CachedToken>(StoreKey::AuthToken) {
            Some(token) if !token.is_expired(now) => Some(token),
            Some(_) => {
                debug!("cached token expired");
                self.clear();
                None
            }
            None => {
                self.clear();
                None
            }
        }
    }

    pub fn clear(&self) {
        if let Err(err) = self.store.remove(StoreKey::AuthToken) {
            warn!(error = %format!("{err:#}"), "failed to drop cached token");
        }
    }

    /// Reuses a valid cached token or asks the provider for a new one.
    #[instrument(skip(self, provider))]
    pub async fn ensure(
        &self,
        provider: &dyn AuthProvider,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> ApiResult<CachedToken> {
        if let Some(token) = self.load_valid(now) {
            return Ok(token);
        }
        let token = provider.request_token(client_id).await?;
        info!(expires_in = token.expires_in, "obtained access token");
        Ok(self.remember(&token, now))
    }

    /// Signs out: storage is cleared even when the provider call fails.
    #[instrument(skip(self, provider))]
    pub async fn revoke(&self, provider: &dyn AuthProvider) -> ApiResult<()> {
        let token = self.store.load_opt::<CachedToken>(StoreKey::AuthToken);
        self.clear();
        match token {
            Some(token) => provider.revoke(&token.access_token).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use parking_lot::Mutex;
    use serde_json::Map;

    use super::TokenCache;
    use crate::api::{AccessToken, ApiResult, AuthProvider};
    use crate::storage::{LocalStorage, MemoryStorage};
    use crate::store::{PersistentStore, StoreKey};

    #[derive(Default)]
    struct FakeProvider {
        issued: Mutex<u32>,
        revoked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AuthProvider for FakeProvider {
        async fn request_token(&self, _client_id: &str) -> ApiResult<AccessToken> {
            let mut issued = self.issued.lock();
            *issued += 1;
            Ok(AccessToken {
                access_token: format!("tok-{issued}"),
                expires_in: 3600,
                extra: Map::new(),
            })
        }

        async fn revoke(&self, access_token: &str) -> ApiResult<()> {
            self.revoked.lock().push(access_token.to_string());
            Ok(())
        }
    }

    fn cache() -> (Arc<MemoryStorage>, TokenCache) {
        let backend = Arc::new(MemoryStorage::new());
        let cache = TokenCache::new(PersistentStore::new(backend.clone()));
        (backend, cache)
    }

    #[tokio::test]
    async fn token_is_reused_until_expiry() {
        let (_, cache) = cache();
        let provider = FakeProvider::default();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).single().expect("timestamp");

        let first = cache.ensure(&provider, "cid", now).await.expect("first");
        let again = cache
            .ensure(&provider, "cid", now + Duration::minutes(30))
            .await
            .expect("again");
        assert_eq!(first.access_token, again.access_token);
        assert_eq!(first.expires_at, now.timestamp_millis() + 3_600_000);

        let later = cache
            .ensure(&provider, "cid", now + Duration::hours(2))
            .await
            .expect("later");
        assert_eq!(later.access_token, "tok-2");
    }

    #[test]
    fn corrupt_token_is_removed() {
        let (backend, cache) = cache();
        backend
            .set_item(StoreKey::AuthToken.as_str(), "not json")
            .expect("seed");
        assert!(cache.load_valid(Utc::now()).is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn revoke_clears_storage() {
        let (backend, cache) = cache();
        let provider = FakeProvider::default();
        cache
            .ensure(&provider, "cid", Utc::now())
            .await
            .expect("token");
        cache.revoke(&provider).await.expect("revoke");
        assert!(backend.is_empty());
        assert_eq!(*provider.revoked.lock(), vec!["tok-1".to_string()]);
    }
}
