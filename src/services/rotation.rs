//! Issue, rotate, inspect and revoke access/refresh pairs.

use std::sync::Arc;

use chrono::{Duration, Utc};
use zeroize::Zeroizing;

use crate::{
    config::Config,
    crypto::access_token::{AccessTokenCodec, TokenRejection},
    crypto::secret::{derive_binding_signature, generate_refresh_secret, hash_refresh_secret},
    error::{AppError, Result},
    models::{session::NewSession, token::TokenPair},
    repositories::{session::SessionStore, user::IdentityDirectory},
    services::notifier::{self, AnomalyEvent, AnomalyNotifier},
    services::verifier,
};

/// Signing and lifetime parameters, fixed at startup.
#[derive(Clone)]
pub struct TokenSettings {
    /// The issuer stamped on access tokens.
    pub issuer: String,
    /// The HMAC signing key.
    pub secret: Zeroizing<Vec<u8>>,
    /// How long an access token is accepted.
    pub access_ttl: Duration,
    /// How long a refresh token (and its session record) lives.
    pub refresh_ttl: Duration,
}

impl From<&Config> for TokenSettings {
    fn from(config: &Config) -> Self {
        Self {
            issuer: config.jwt_issuer.clone(),
            secret: config.jwt_secret.clone(),
            access_ttl: Duration::minutes(config.access_token_ttl_minutes),
            refresh_ttl: Duration::days(config.refresh_token_ttl_days),
        }
    }
}

/// The token-lifecycle state machine.
///
/// Per identity the store holds either nothing, a live unexpired record, or a
/// live expired one. `issue` moves nothing/expired to live, `refresh` replaces
/// a live record, `logout` and a device change delete it.
#[derive(Clone)]
pub struct RotationService {
    codec: AccessTokenCodec,
    refresh_ttl: Duration,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn IdentityDirectory>,
    notifier: Arc<dyn AnomalyNotifier>,
}

impl RotationService {
    /// Creates a new `RotationService`.
    pub fn new(
        settings: TokenSettings,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn IdentityDirectory>,
        notifier: Arc<dyn AnomalyNotifier>,
    ) -> Self {
        Self {
            codec: AccessTokenCodec::new(settings.issuer, &settings.secret, settings.access_ttl),
            refresh_ttl: settings.refresh_ttl,
            sessions,
            users,
            notifier,
        }
    }

    /// The identity directory the service checks before issuing.
    pub fn users(&self) -> &Arc<dyn IdentityDirectory> {
        &self.users
    }

    /// Mints a pair and the session record that will back it.
    fn mint(
        &self,
        identity: &str,
        device_fingerprint: &str,
        network_origin: &str,
    ) -> Result<(TokenPair, NewSession)> {
        let refresh_token = generate_refresh_secret()?;
        let access_token = self
            .codec
            .encode(identity, &derive_binding_signature(&refresh_token))?;

        let session = NewSession {
            identity: identity.to_string(),
            device_fingerprint: device_fingerprint.to_string(),
            network_origin: network_origin.to_string(),
            refresh_secret_hash: hash_refresh_secret(&refresh_token)?,
            expires_at: Utc::now() + self.refresh_ttl,
        };

        Ok((
            TokenPair {
                access_token,
                refresh_token,
            },
            session,
        ))
    }

    /// Issues a first pair for `identity`.
    ///
    /// Refused with `Conflict` while an unexpired session exists; an expired
    /// one is replaced.
    pub async fn issue(
        &self,
        identity: &str,
        device_fingerprint: &str,
        network_origin: &str,
    ) -> Result<TokenPair> {
        tracing::debug!("🔐 Issue requested for {}", identity);

        if !self.users.exists(identity).await? {
            return Err(AppError::UnknownIdentity);
        }

        let stale = match self.sessions.find_by_identity(identity).await? {
            Some(record) if !record.is_expired_at(Utc::now()) => {
                return Err(AppError::Conflict(
                    "Your refresh token is valid and time not expired".to_string(),
                ));
            }
            Some(record) => {
                tracing::debug!("Replacing expired session {} for {}", record.id, identity);
                Some(record.id)
            }
            None => None,
        };

        let (pair, session) = self.mint(identity, device_fingerprint, network_origin)?;
        let id = self.sessions.replace(stale, session).await?;

        tracing::info!("✅ Tokens issued for {} (session {})", identity, id);
        Ok(pair)
    }

    /// Rotates a pair: verifies it, checks the device and network context,
    /// and replaces the session with a freshly minted one.
    pub async fn refresh(
        &self,
        access_token: &str,
        refresh_token: &str,
        device_fingerprint: &str,
        network_origin: &str,
    ) -> Result<TokenPair> {
        let claims = self.codec.decode(access_token)?;
        tracing::debug!("🔄 Refresh requested for {}", claims.sub);

        let record = self
            .sessions
            .find_by_identity(&claims.sub)
            .await?
            .ok_or(AppError::NotFound)?;

        if !verifier::verify_pair(&record, refresh_token, &claims)? {
            return Err(AppError::InvalidPair);
        }

        if record.is_expired_at(Utc::now()) {
            tracing::info!("Session {} for {} has expired", record.id, record.identity);
            return Err(AppError::InvalidToken(TokenRejection::Expired));
        }

        if !verifier::verify_device_context(&record, device_fingerprint) {
            tracing::warn!(
                "❌ Device changed for {}: forcing logout of session {}",
                record.identity,
                record.id
            );
            match self.sessions.delete_by_id(record.id).await {
                Ok(()) | Err(AppError::NotFound) => {}
                Err(e) => return Err(e),
            }
            return Err(AppError::ForcedLogout);
        }

        if !verifier::verify_network_origin(&record, network_origin) {
            tracing::warn!(
                "⚠️ New network origin for {}: {} -> {}",
                record.identity,
                record.network_origin,
                network_origin
            );
            notifier::dispatch(
                self.notifier.clone(),
                AnomalyEvent::new_ip(&record.identity, device_fingerprint, network_origin),
            );
        }

        let (pair, session) = self.mint(&record.identity, device_fingerprint, network_origin)?;
        let id = self.sessions.replace(Some(record.id), session).await?;

        tracing::info!(
            "✅ Tokens rotated for {} (session {} -> {})",
            record.identity,
            record.id,
            id
        );
        Ok(pair)
    }

    /// Returns the identity behind a valid access token with a live session.
    pub async fn inspect(&self, access_token: &str) -> Result<String> {
        let claims = self.codec.decode(access_token)?;
        let record = self
            .sessions
            .find_by_identity(&claims.sub)
            .await?
            .ok_or(AppError::NotFound)?;
        Ok(record.identity)
    }

    /// Deletes the session behind a valid access token.
    pub async fn logout(&self, access_token: &str) -> Result<()> {
        let claims = self.codec.decode(access_token)?;
        let record = self
            .sessions
            .find_by_identity(&claims.sub)
            .await?
            .ok_or(AppError::NotFound)?;

        self.sessions.delete_by_id(record.id).await?;
        tracing::info!("👋 Logout for {} (session {})", record.identity, record.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::access_token;
    use crate::repositories::session::MemorySessionStore;
    use crate::repositories::user::MemoryIdentityDirectory;
    use async_trait::async_trait;
    use crate::models::session::SessionRecord;
    use tokio::sync::{Barrier, mpsc};

    const SECRET: &[u8] = b"test-secret-test-secret-test-sec";

    struct ChannelNotifier(mpsc::UnboundedSender<AnomalyEvent>);

    #[async_trait]
    impl AnomalyNotifier for ChannelNotifier {
        async fn notify(&self, event: &AnomalyEvent) -> Result<()> {
            let _ = self.0.send(event.clone());
            Ok(())
        }
    }

    struct Harness {
        service: RotationService,
        store: MemorySessionStore,
        events: mpsc::UnboundedReceiver<AnomalyEvent>,
    }

    fn settings(access_ttl: Duration, refresh_ttl: Duration) -> TokenSettings {
        TokenSettings {
            issuer: "pairguard".to_string(),
            secret: Zeroizing::new(SECRET.to_vec()),
            access_ttl,
            refresh_ttl,
        }
    }

    fn harness_with(settings: TokenSettings) -> Harness {
        let store = MemorySessionStore::new();
        let (tx, events) = mpsc::unbounded_channel();
        let service = RotationService::new(
            settings,
            Arc::new(store.clone()),
            Arc::new(MemoryIdentityDirectory::with_users(["u1", "u2"])),
            Arc::new(ChannelNotifier(tx)),
        );
        Harness {
            service,
            store,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(settings(Duration::minutes(15), Duration::days(7)))
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<AnomalyEvent>) -> AnomalyEvent {
        tokio::time::timeout(std::time::Duration::from_secs(1), events.recv())
            .await
            .expect("notification not dispatched")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn issue_returns_a_bound_pair() {
        let h = harness();
        let pair = h.service.issue("u1", "agentA", "1.1.1.1").await.unwrap();

        let claims = access_token::decode(&pair.access_token, SECRET).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.iss, "pairguard");
        assert_eq!(claims.refresh_sig, derive_binding_signature(&pair.refresh_token));

        let record = h.store.find_by_identity("u1").await.unwrap().unwrap();
        assert_eq!(record.device_fingerprint, "agentA");
        assert_eq!(record.network_origin, "1.1.1.1");
        assert_ne!(record.refresh_secret_hash, pair.refresh_token);
    }

    #[tokio::test]
    async fn issuing_twice_is_a_conflict() {
        let h = harness();
        h.service.issue("u1", "agentA", "1.1.1.1").await.unwrap();

        let err = h.service.issue("u1", "agentA", "1.1.1.1").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(h.store.live_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_identity_is_refused() {
        let h = harness();
        let err = h.service.issue("ghost", "agentA", "1.1.1.1").await.unwrap_err();
        assert!(matches!(err, AppError::UnknownIdentity));
        assert_eq!(h.store.live_count().await, 0);
    }

    #[tokio::test]
    async fn expired_session_does_not_block_issue() {
        let h = harness_with(settings(Duration::minutes(15), Duration::seconds(-1)));
        let first = h.service.issue("u1", "agentA", "1.1.1.1").await.unwrap();
        let second = h.service.issue("u1", "agentA", "1.1.1.1").await.unwrap();

        assert_ne!(first.refresh_token, second.refresh_token);
        assert_eq!(h.store.live_count().await, 1);
        assert_eq!(h.store.history("u1").await.len(), 2);
    }

    #[tokio::test]
    async fn refresh_rotates_and_invalidates_old_pair() {
        let h = harness();
        let old = h.service.issue("u1", "agentA", "1.1.1.1").await.unwrap();

        let new = h
            .service
            .refresh(&old.access_token, &old.refresh_token, "agentA", "1.1.1.1")
            .await
            .unwrap();
        assert_ne!(new.access_token, old.access_token);
        assert_ne!(new.refresh_token, old.refresh_token);

        let err = h
            .service
            .refresh(&old.access_token, &old.refresh_token, "agentA", "1.1.1.1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidPair | AppError::NotFound));
        assert_eq!(h.store.live_count().await, 1);
    }

    #[tokio::test]
    async fn mismatched_halves_are_an_invalid_pair() {
        let h = harness();
        let a = h.service.issue("u1", "agentA", "1.1.1.1").await.unwrap();
        let b = h.service.issue("u2", "agentA", "1.1.1.1").await.unwrap();

        let err = h
            .service
            .refresh(&a.access_token, &b.refresh_token, "agentA", "1.1.1.1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidPair));

        // Nothing was mutated.
        let still = h
            .service
            .refresh(&a.access_token, &a.refresh_token, "agentA", "1.1.1.1")
            .await;
        assert!(still.is_ok());
    }

    #[tokio::test]
    async fn tampered_access_token_is_invalid() {
        let h = harness();
        let pair = h.service.issue("u1", "agentA", "1.1.1.1").await.unwrap();
        let mut tampered = pair.access_token.clone();
        tampered.push('x');

        let err = h
            .service
            .refresh(&tampered, &pair.refresh_token, "agentA", "1.1.1.1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidToken(TokenRejection::Invalid)));
    }

    #[tokio::test]
    async fn expired_access_token_cannot_be_rotated() {
        let h = harness_with(settings(Duration::days(-365), Duration::days(7)));
        let pair = h.service.issue("u1", "agentA", "1.1.1.1").await.unwrap();

        assert!(matches!(
            h.service.inspect(&pair.access_token).await.unwrap_err(),
            AppError::InvalidToken(TokenRejection::Expired)
        ));
        let err = h
            .service
            .refresh(&pair.access_token, &pair.refresh_token, "agentA", "1.1.1.1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidToken(TokenRejection::Expired)));

        let record = h.store.find_by_identity("u1").await.unwrap().unwrap();
        assert_eq!(h.store.history("u1").await.len(), 1);
        assert!(record.deleted_at.is_none());
    }

    #[tokio::test]
    async fn expired_session_cannot_be_rotated() {
        let h = harness_with(settings(Duration::minutes(15), Duration::seconds(-1)));
        let pair = h.service.issue("u1", "agentA", "1.1.1.1").await.unwrap();

        let err = h
            .service
            .refresh(&pair.access_token, &pair.refresh_token, "agentA", "1.1.1.1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidToken(TokenRejection::Expired)));
    }

    #[tokio::test]
    async fn device_change_forces_logout() {
        let h = harness();
        let pair = h.service.issue("u1", "agentA", "1.1.1.1").await.unwrap();

        let err = h
            .service
            .refresh(&pair.access_token, &pair.refresh_token, "agentB", "1.1.1.1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ForcedLogout));
        assert!(h.store.find_by_identity("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn origin_change_notifies_once_and_succeeds() {
        let mut h = harness();
        let pair = h.service.issue("u1", "agentA", "1.1.1.1").await.unwrap();

        h.service
            .refresh(&pair.access_token, &pair.refresh_token, "agentA", "2.2.2.2")
            .await
            .unwrap();

        let event = next_event(&mut h.events).await;
        assert_eq!(event.identity, "u1");
        assert_eq!(event.device_fingerprint, "agentA");
        assert_eq!(event.network_origin, "2.2.2.2");
        assert_eq!(event.event, "new_ip");

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(h.events.try_recv().is_err());

        let record = h.store.find_by_identity("u1").await.unwrap().unwrap();
        assert_eq!(record.network_origin, "2.2.2.2");
    }

    #[tokio::test]
    async fn unchanged_origin_does_not_notify() {
        let mut h = harness();
        let pair = h.service.issue("u1", "agentA", "1.1.1.1").await.unwrap();
        h.service
            .refresh(&pair.access_token, &pair.refresh_token, "agentA", "1.1.1.1")
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn inspect_and_logout() {
        let h = harness();
        let pair = h.service.issue("u1", "agentA", "1.1.1.1").await.unwrap();

        assert_eq!(h.service.inspect(&pair.access_token).await.unwrap(), "u1");

        h.service.logout(&pair.access_token).await.unwrap();
        assert!(matches!(
            h.service.inspect(&pair.access_token).await.unwrap_err(),
            AppError::NotFound
        ));
        assert!(matches!(
            h.service.logout(&pair.access_token).await.unwrap_err(),
            AppError::NotFound
        ));
    }

    #[tokio::test]
    async fn hijack_scenario() {
        let h = harness();

        let (a0, r0) = {
            let p = h.service.issue("u1", "agentA", "1.1.1.1").await.unwrap();
            (p.access_token, p.refresh_token)
        };

        let p1 = h
            .service
            .refresh(&a0, &r0, "agentA", "1.1.1.1")
            .await
            .unwrap();
        assert_ne!(p1.access_token, a0);
        assert_ne!(p1.refresh_token, r0);

        let replay = h
            .service
            .refresh(&a0, &r0, "agentA", "1.1.1.1")
            .await
            .unwrap_err();
        assert!(matches!(replay, AppError::InvalidPair | AppError::NotFound));

        let hijack = h
            .service
            .refresh(&p1.access_token, &p1.refresh_token, "agentB", "1.1.1.1")
            .await
            .unwrap_err();
        assert!(matches!(hijack, AppError::ForcedLogout));

        assert!(matches!(
            h.service.inspect(&p1.access_token).await.unwrap_err(),
            AppError::NotFound
        ));
    }

    #[tokio::test]
    async fn concurrent_refreshes_leave_one_live_session() {
        let h = harness();
        let pair = h.service.issue("u1", "agentA", "1.1.1.1").await.unwrap();

        let (a, b) = tokio::join!(
            h.service
                .refresh(&pair.access_token, &pair.refresh_token, "agentA", "1.1.1.1"),
            h.service
                .refresh(&pair.access_token, &pair.refresh_token, "agentA", "1.1.1.1"),
        );

        assert!(a.is_ok() || b.is_ok());
        assert_eq!(h.store.live_count().await, 1);
    }

    /// Holds every rotation at `replace` until two of them have arrived.
    struct RendezvousStore {
        inner: MemorySessionStore,
        barrier: Barrier,
    }

    #[async_trait]
    impl SessionStore for RendezvousStore {
        async fn create(&self, session: NewSession) -> Result<i64> {
            self.inner.create(session).await
        }

        async fn find_by_identity(&self, identity: &str) -> Result<Option<SessionRecord>> {
            self.inner.find_by_identity(identity).await
        }

        async fn delete_by_id(&self, id: i64) -> Result<()> {
            self.inner.delete_by_id(id).await
        }

        async fn replace(&self, expected: Option<i64>, session: NewSession) -> Result<i64> {
            if expected.is_some() {
                self.barrier.wait().await;
            }
            self.inner.replace(expected, session).await
        }
    }

    #[tokio::test]
    async fn interleaved_refreshes_lose_with_conflict() {
        let store = MemorySessionStore::new();
        let (tx, _events) = mpsc::unbounded_channel();
        let service = RotationService::new(
            settings(Duration::minutes(15), Duration::days(7)),
            Arc::new(RendezvousStore {
                inner: store.clone(),
                barrier: Barrier::new(2),
            }),
            Arc::new(MemoryIdentityDirectory::with_users(["u1"])),
            Arc::new(ChannelNotifier(tx)),
        );
        let pair = service.issue("u1", "agentA", "1.1.1.1").await.unwrap();

        let (a, b) = tokio::join!(
            service.refresh(&pair.access_token, &pair.refresh_token, "agentA", "1.1.1.1"),
            service.refresh(&pair.access_token, &pair.refresh_token, "agentA", "1.1.1.1"),
        );

        let (winner, loser) = if a.is_ok() { (a, b) } else { (b, a) };
        let winner = winner.unwrap();
        assert!(matches!(loser.unwrap_err(), AppError::Conflict(_)));

        assert_eq!(store.live_count().await, 1);
        assert_eq!(store.history("u1").await.len(), 2);
        assert_eq!(service.inspect(&winner.access_token).await.unwrap(), "u1");
    }
}
