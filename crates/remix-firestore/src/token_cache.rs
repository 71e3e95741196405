//! OAuth access tokens for the Firestore REST API.
//!
//! A token is reused until one minute before it expires. Only one caller
//! refreshes at a time; the others block on the write lock and pick up the
//! new token when it is released.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use gcp_auth::TokenProvider;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{FirestoreError, FirestoreResult};

/// OAuth scope for Firestore REST access.
pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

const REFRESH_BEFORE_EXPIRY: Duration = Duration::from_secs(60);
const FALLBACK_LIFETIME: Duration = Duration::from_secs(50 * 60);

struct Held {
    value: String,
    deadline: Instant,
}

impl Held {
    fn reusable(&self, now: Instant) -> bool {
        now + REFRESH_BEFORE_EXPIRY < self.deadline
    }
}

/// Convert the provider's wall-clock expiry into a monotonic deadline.
fn deadline_for(expires: DateTime<Utc>, now_wall: DateTime<Utc>, now: Instant) -> Instant {
    if expires <= now_wall {
        return now;
    }
    match (expires - now_wall).to_std() {
        Ok(left) => now + left,
        Err(_) => now + FALLBACK_LIFETIME,
    }
}

pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    held: RwLock<Option<Held>>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            held: RwLock::new(None),
        }
    }

    /// Forget the current token, e.g. after a 401.
    pub async fn invalidate(&self) {
        self.held.write().await.take();
    }

    /// Return a bearer token, fetching a new one when the held one is stale.
    pub async fn get_token(&self) -> FirestoreResult<String> {
        let reuse = |held: &Option<Held>| {
            held.as_ref()
                .filter(|h| h.reusable(Instant::now()))
                .map(|h| h.value.clone())
        };

        if let Some(token) = reuse(&*self.held.read().await) {
            return Ok(token);
        }

        let mut held = self.held.write().await;
        if let Some(token) = reuse(&*held) {
            return Ok(token);
        }

        let fetched = match self.provider.token(&[FIRESTORE_SCOPE]).await {
            Ok(fetched) => fetched,
            Err(e) => {
                // A token that has not actually expired is still worth sending.
                if let Some(h) = held.as_ref().filter(|h| Instant::now() < h.deadline) {
                    warn!("Token refresh failed, reusing current token: {}", e);
                    return Ok(h.value.clone());
                }
                return Err(FirestoreError::auth_error(format!(
                    "Failed to obtain auth token: {}",
                    e
                )));
            }
        };

        let value = fetched.as_str().to_string();
        *held = Some(Held {
            value: value.clone(),
            deadline: deadline_for(fetched.expires_at(), Utc::now(), Instant::now()),
        });
        debug!("Fetched new Firestore access token");
        Ok(value)
    }
}
