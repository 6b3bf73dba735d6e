//! Server-side sessions keyed by a cookie token, with sliding expiration

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "sysdash_session";
pub const FLASH_COOKIE: &str = "sysdash_flash";

/// An authenticated operator session
#[derive(Clone, Debug)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub last_seen: DateTime<Utc>,
}

pub trait SessionStore: Send + Sync {
    /// Start a new session for `username` and return its token
    fn create(&self, username: &str) -> String;

    /// Look up a live session, refreshing its inactivity window
    fn get(&self, token: &str) -> Option<Session>;

    /// Refresh a live session without reading it. Returns false if it is gone.
    fn touch(&self, token: &str) -> bool;

    fn remove(&self, token: &str);

    /// Drop every session idle for longer than the timeout; returns how many went
    fn purge_expired(&self) -> usize;
}

pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    idle_timeout: Duration,
}

impl MemorySessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    fn is_live(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now - session.last_seen <= self.idle_timeout
    }

    fn get_at(&self, token: &str, now: DateTime<Utc>) -> Option<Session> {
        let mut sessions = self.sessions.write();
        let live = match sessions.get(token) {
            Some(session) => self.is_live(session, now),
            None => return None,
        };
        if !live {
            sessions.remove(token);
            return None;
        }
        let session = sessions.get_mut(token)?;
        session.last_seen = now;
        Some(session.clone())
    }

    fn purge_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| now - s.last_seen <= self.idle_timeout);
        before - sessions.len()
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, username: &str) -> String {
        let purged = self.purge_expired();
        if purged > 0 {
            tracing::debug!("Purged {} expired sessions", purged);
        }

        let token = Uuid::new_v4().to_string();
        let session = Session {
            token: token.clone(),
            username: username.to_string(),
            last_seen: Utc::now(),
        };
        self.sessions.write().insert(token.clone(), session);
        token
    }

    fn get(&self, token: &str) -> Option<Session> {
        self.get_at(token, Utc::now())
    }

    fn touch(&self, token: &str) -> bool {
        self.get(token).is_some()
    }

    fn remove(&self, token: &str) {
        self.sessions.write().remove(token);
    }

    fn purge_expired(&self) -> usize {
        self.purge_at(Utc::now())
    }
}

/// Value of the named cookie, if the request carries a non-empty one
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|cookie| {
            let (key, value) = cookie.trim().split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.to_string())
        })
}

/// Get the session token from the request cookies
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, SESSION_COOKIE)
}

pub fn session_cookie(token: &str) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Strict", SESSION_COOKIE, token)
}

pub fn clear_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0", SESSION_COOKIE)
}

/// Flash codes travel in their own short-lived cookie so that a failed
/// login never allocates server-side state.
pub fn flash_from_headers(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, FLASH_COOKIE)
}

pub fn flash_cookie(code: &str) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age=60", FLASH_COOKIE, code)
}

pub fn clear_flash_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0", FLASH_COOKIE)
}
