//! 连接生命周期：认证、上线、下线

use crate::auth::Authenticator;
use crate::directory::UserDirectory;
use crate::error::AuthError;
use crate::hub::{CLOSE_SUPERSEDED, ConnectionHub, OutboundSender};
use crate::presence::PresenceRegistry;
use crate::protocol::ServerMessage;
use crate::types::Identity;
use callrelay_common::metrics::{AUTH_FAILURES, ONLINE_USERS};
use std::sync::Arc;
use tracing::{info, warn};

pub const SUPERSEDED_REASON: &str = "superseded by a newer connection";

pub struct ConnectionLifecycleManager {
    authenticator: Arc<dyn Authenticator>,
    directory: Arc<dyn UserDirectory>,
    presence: Arc<PresenceRegistry>,
    hub: Arc<ConnectionHub>,
}

impl ConnectionLifecycleManager {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        directory: Arc<dyn UserDirectory>,
        presence: Arc<PresenceRegistry>,
        hub: Arc<ConnectionHub>,
    ) -> Self {
        Self {
            authenticator,
            directory,
            presence,
            hub,
        }
    }

    /// 认证并上线一个连接
    ///
    /// 成功后 `outbox` 注册到 hub，其它连接收到 `user_connected`。
    /// 同一用户的旧连接被要求以 4000 关闭。
    pub async fn connect(
        &self,
        connection_id: &str,
        token: Option<&str>,
        outbox: OutboundSender,
    ) -> Result<Identity, AuthError> {
        let identity = match self.authenticate(token).await {
            Ok(identity) => identity,
            Err(e) => {
                AUTH_FAILURES.with_label_values(&[e.reason()]).inc();
                warn!("Connection {} failed authentication: {}", connection_id, e);
                return Err(e);
            }
        };

        self.hub.register(connection_id, outbox);
        if let Some(evicted) = self.presence.add(connection_id, identity.clone()) {
            self.hub
                .close(&evicted.connection_id, CLOSE_SUPERSEDED, SUPERSEDED_REASON);
        }

        if let Err(e) = self.directory.set_online(&identity.user_id, true).await {
            warn!("Failed to mark {} online: {}", identity, e);
        }

        let online_users = self.presence.online_users();
        ONLINE_USERS.set(online_users.len() as i64);
        self.hub.broadcast(
            &ServerMessage::UserConnected {
                user_id: identity.user_id.clone(),
                username: identity.username.clone(),
                online_count: online_users.len(),
                online_users,
            },
            Some(connection_id),
        );

        info!("User {} connected on {}", identity, connection_id);
        Ok(identity)
    }

    async fn authenticate(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?;
        let claims = self.authenticator.verify(token)?;

        self.directory
            .find_by_id(&claims.sub)
            .await?
            .ok_or(AuthError::UnknownUser(claims.sub))
    }

    /// 下线一个连接，可重复调用
    ///
    /// 该用户因此彻底离线时返回其身份；连接已被新连接取代或重复下线时返回 `None`。
    pub async fn disconnect(&self, connection_id: &str) -> Option<Identity> {
        self.hub.unregister(connection_id);

        let entry = self.presence.remove(connection_id)?;
        let identity = entry.identity;

        // 用户可能已经在新连接上重新上线
        let offline = self.presence.by_user(&identity.user_id).is_none();
        if offline && let Err(e) = self.directory.set_online(&identity.user_id, false).await {
            warn!("Failed to mark {} offline: {}", identity, e);
        }

        let online_users = self.presence.online_users();
        ONLINE_USERS.set(online_users.len() as i64);
        self.hub.broadcast(
            &ServerMessage::UserDisconnected {
                user_id: identity.user_id.clone(),
                username: identity.username.clone(),
                online_count: online_users.len(),
                online_users,
            },
            None,
        );

        info!("User {} disconnected from {}", identity, connection_id);
        offline.then_some(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use crate::clock::SystemClock;
    use crate::directory::InMemoryUserDirectory;
    use crate::hub::{Outbound, OutboundReceiver};
    use tokio::sync::mpsc;

    /// token 即用户 id
    struct PlainAuthenticator;

    impl Authenticator for PlainAuthenticator {
        fn verify(&self, token: &str) -> Result<Claims, AuthError> {
            if token == "expired" {
                return Err(AuthError::Expired);
            }
            Ok(Claims {
                sub: token.to_string(),
                username: None,
                exp: u64::MAX,
            })
        }
    }

    struct Harness {
        lifecycle: ConnectionLifecycleManager,
        directory: Arc<InMemoryUserDirectory>,
        presence: Arc<PresenceRegistry>,
        hub: Arc<ConnectionHub>,
    }

    fn harness() -> Harness {
        let directory = Arc::new(InMemoryUserDirectory::new());
        directory.insert(Identity::new("u1", "alice"));
        directory.insert(Identity::new("u2", "bob"));
        let presence = Arc::new(PresenceRegistry::new(Arc::new(SystemClock)));
        let hub = Arc::new(ConnectionHub::new());
        let lifecycle = ConnectionLifecycleManager::new(
            Arc::new(PlainAuthenticator),
            directory.clone(),
            presence.clone(),
            hub.clone(),
        );
        Harness {
            lifecycle,
            directory,
            presence,
            hub,
        }
    }

    async fn connect(h: &Harness, connection_id: &str, token: &str) -> OutboundReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        h.lifecycle
            .connect(connection_id, Some(token), tx)
            .await
            .unwrap();
        rx
    }

    #[tokio::test]
    async fn connect_registers_and_broadcasts() {
        let h = harness();
        let mut alice = connect(&h, "c1", "u1").await;
        let _bob = connect(&h, "c2", "u2").await;

        assert!(h.directory.is_online("u1"));
        assert_eq!(h.presence.count(), 2);
        assert_eq!(h.hub.len(), 2);

        let Ok(Outbound::Message(ServerMessage::UserConnected {
            user_id,
            online_count,
            online_users,
            ..
        })) = alice.try_recv()
        else {
            panic!("expected user_connected");
        };
        assert_eq!(user_id, "u2");
        assert_eq!(online_count, 2);
        assert_eq!(online_users.len(), 2);
    }

    #[tokio::test]
    async fn failed_authentication_registers_nothing() {
        let h = harness();
        for (token, expected) in [
            (None, "missing_token"),
            (Some("expired"), "expired"),
            (Some("u9"), "unknown_user"),
        ] {
            let (tx, _rx) = mpsc::unbounded_channel();
            let err = h.lifecycle.connect("c1", token, tx).await.unwrap_err();
            assert_eq!(err.reason(), expected);
        }
        assert_eq!(h.presence.count(), 0);
        assert!(h.hub.is_empty());
    }

    #[tokio::test]
    async fn reconnect_closes_superseded_connection() {
        let h = harness();
        let mut first = connect(&h, "c1", "u1").await;
        let _second = connect(&h, "c2", "u1").await;

        assert_eq!(
            first.try_recv().unwrap(),
            Outbound::Close {
                code: CLOSE_SUPERSEDED,
                reason: SUPERSEDED_REASON.to_string(),
            }
        );
        assert_eq!(h.presence.count(), 1);
        assert_eq!(h.presence.by_user("u1").unwrap().connection_id, "c2");

        // The superseded socket tearing down later must not take the user offline
        assert!(h.lifecycle.disconnect("c1").await.is_none());
        assert!(h.directory.is_online("u1"));
        assert_eq!(h.presence.count(), 1);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_broadcasts_once() {
        let h = harness();
        let _alice = connect(&h, "c1", "u1").await;
        let mut bob = connect(&h, "c2", "u2").await;

        assert_eq!(
            h.lifecycle.disconnect("c1").await,
            Some(Identity::new("u1", "alice"))
        );
        assert!(h.lifecycle.disconnect("c1").await.is_none());

        assert!(!h.directory.is_online("u1"));
        let Ok(Outbound::Message(ServerMessage::UserDisconnected {
            user_id,
            online_users,
            online_count,
            ..
        })) = bob.try_recv()
        else {
            panic!("expected user_disconnected");
        };
        assert_eq!(user_id, "u1");
        assert_eq!(online_users, vec![Identity::new("u2", "bob")]);
        assert_eq!(online_count, 1);
        assert!(bob.try_recv().is_err());
    }
}
