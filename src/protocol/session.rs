//! # Session Manager
//!
//! Tracks open sessions by token. Each session remembers the highest nonce it
//! has accepted and when it expires; every accepted packet slides the expiry
//! forward by the configured TTL.
//!
//! The table is a `DashMap`, so verification on one connection never waits on
//! a handshake running on another. Guards returned by the map are always
//! dropped before a row is removed.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_SESSION_TTL;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::SessionGrant;
use crate::utils::crypto::{self, is_no_session, SessionToken};

type CloseHook = Arc<dyn Fn(&SessionToken) + Send + Sync>;

#[derive(Debug, Clone)]
struct Session {
    last_nonce: u64,
    expires: Instant,
    created_at: Instant,
}

impl Session {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires
    }
}

pub struct SessionManager {
    sessions: DashMap<SessionToken, Session>,
    ttl: Duration,
    max_sessions: usize,
    close_hooks: RwLock<Vec<CloseHook>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL, 1024)
    }
}

impl SessionManager {
    pub fn new(ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            max_sessions: max_sessions.max(1),
            close_hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, token: &SessionToken) -> bool {
        self.sessions.contains_key(token)
    }

    /// Run `hook` whenever a session leaves the table, for any reason.
    pub fn on_close<F>(&self, hook: F) -> Result<()>
    where
        F: Fn(&SessionToken) + Send + Sync + 'static,
    {
        self.close_hooks
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?
            .push(Arc::new(hook));
        Ok(())
    }

    /// Create a session and return its grant.
    ///
    /// Expired sessions are purged first, so their close hooks run even if
    /// their peers never send another packet.
    pub fn open(&self) -> Result<SessionGrant> {
        let purged = self.purge_expired();
        if purged > 0 {
            debug!(purged, "Purged expired sessions");
        }
        if self.sessions.len() >= self.max_sessions {
            self.evict_oldest();
        }

        let token = loop {
            let candidate = crypto::generate_token()?;
            if !self.sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let now = Instant::now();
        self.sessions.insert(
            token,
            Session {
                last_nonce: 0,
                expires: now + self.ttl,
                created_at: now,
            },
        );

        let ttl_secs = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        debug!(sessions = self.sessions.len(), "Session opened");
        Ok(SessionGrant {
            token,
            expires_at: chrono::Utc::now().timestamp().saturating_add(ttl_secs),
        })
    }

    /// Accept a packet for `token` carrying `nonce`, or say why not.
    pub fn verify(&self, token: &SessionToken, nonce: u64) -> Result<()> {
        if is_no_session(token) {
            return Err(ProtocolError::Unauthenticated(
                constants::ERR_NO_SESSION.into(),
            ));
        }

        let now = Instant::now();
        let expired = {
            let Some(mut session) = self.sessions.get_mut(token) else {
                return Err(ProtocolError::Unauthenticated(
                    constants::ERR_UNKNOWN_SESSION.into(),
                ));
            };
            if session.is_expired(now) {
                true
            } else {
                if nonce <= session.last_nonce {
                    return Err(ProtocolError::ReplayDetected {
                        nonce,
                        last_nonce: session.last_nonce,
                    });
                }
                session.last_nonce = nonce;
                session.expires = now + self.ttl;
                false
            }
        };

        if expired {
            self.remove(token);
            info!("Rejected packet for expired session");
            return Err(ProtocolError::Unauthenticated(
                constants::ERR_EXPIRED_SESSION.into(),
            ));
        }
        Ok(())
    }

    /// Forget a session. Returns whether it existed.
    pub fn close(&self, token: &SessionToken) -> bool {
        let existed = self.remove(token);
        if existed {
            debug!(sessions = self.sessions.len(), "Session closed");
        }
        existed
    }

    /// Drop every expired session and return how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<SessionToken> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| *entry.key())
            .collect();
        expired.iter().filter(|token| self.remove(token)).count()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|entry| entry.value().created_at)
            .map(|entry| *entry.key());
        if let Some(token) = oldest {
            warn!(max = self.max_sessions, "Session table full, evicting oldest session");
            self.remove(&token);
        }
    }

    fn remove(&self, token: &SessionToken) -> bool {
        if self.sessions.remove(token).is_none() {
            return false;
        }
        if let Ok(hooks) = self.close_hooks.read() {
            for hook in hooks.iter() {
                hook(token);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::utils::crypto::NO_SESSION;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn nonces_must_strictly_increase() {
        let sessions = SessionManager::default();
        let grant = sessions.open().unwrap();
        sessions.verify(&grant.token, 10).unwrap();
        sessions.verify(&grant.token, 11).unwrap();
        assert!(matches!(
            sessions.verify(&grant.token, 11),
            Err(ProtocolError::ReplayDetected { nonce: 11, last_nonce: 11 })
        ));
        assert!(matches!(
            sessions.verify(&grant.token, 3),
            Err(ProtocolError::ReplayDetected { .. })
        ));
    }

    #[test]
    fn unknown_and_zero_tokens_are_unauthenticated() {
        let sessions = SessionManager::default();
        assert!(matches!(
            sessions.verify(&NO_SESSION, 1),
            Err(ProtocolError::Unauthenticated(_))
        ));
        assert!(matches!(
            sessions.verify(&[9u8; 32], 1),
            Err(ProtocolError::Unauthenticated(_))
        ));
    }

    #[test]
    fn expired_sessions_are_removed_on_use() {
        let sessions = SessionManager::new(Duration::from_millis(0), 8);
        let grant = sessions.open().unwrap();
        assert!(matches!(
            sessions.verify(&grant.token, 1),
            Err(ProtocolError::Unauthenticated(_))
        ));
        assert!(!sessions.contains(&grant.token));
    }

    #[test]
    fn closed_sessions_reject_later_packets() {
        let sessions = SessionManager::default();
        let grant = sessions.open().unwrap();
        assert!(sessions.close(&grant.token));
        assert!(!sessions.close(&grant.token));
        assert!(sessions.verify(&grant.token, 1).is_err());
    }

    #[test]
    fn full_table_evicts_the_oldest_session() {
        let sessions = SessionManager::new(Duration::from_secs(60), 2);
        let first = sessions.open().unwrap();
        let second = sessions.open().unwrap();
        let third = sessions.open().unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(!sessions.contains(&first.token));
        assert!(sessions.contains(&second.token));
        assert!(sessions.contains(&third.token));
    }

    #[test]
    fn close_hooks_fire_on_every_removal() {
        let sessions = SessionManager::new(Duration::from_secs(60), 1);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        sessions
            .on_close(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let first = sessions.open().unwrap();
        let second = sessions.open().unwrap();
        sessions.close(&second.token);
        assert!(!sessions.contains(&first.token));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn opening_a_session_purges_expired_ones() {
        let sessions = SessionManager::new(Duration::from_millis(1), 8);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        sessions
            .on_close(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let stale = sessions.open().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let fresh = sessions.open().unwrap();
        assert!(!sessions.contains(&stale.token));
        assert!(sessions.contains(&fresh.token));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn grant_expiry_is_in_the_future() {
        let sessions = SessionManager::default();
        let grant = sessions.open().unwrap();
        assert!(grant.expires_at > chrono::Utc::now().timestamp());
    }
}
