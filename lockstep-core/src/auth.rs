//! Connection admission.
//!
//! Resolves the credentials presented on a WebSocket upgrade into a stable
//! identity, before the protocol upgrade happens. Guest session tokens are
//! validated against the external room service; everything else requires a
//! bearer JWT signed with the shared secret.

use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use lockstep_model::{Participant, RoomId, UserId};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Budget for the guest validator round-trip.
const GUEST_VALIDATOR_TIMEOUT: Duration = Duration::from_millis(500);

/// Bearer token claims.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: i64,
    pub iat: i64,
}

/// Credentials presented on connection open, from query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    pub token: Option<String>,
    #[serde(rename = "guestToken")]
    pub guest_token: Option<String>,
    #[serde(rename = "guestName")]
    pub guest_name: Option<String>,
}

/// The resolved identity of an admitted connection.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
    pub is_guest: bool,
}

/// Guest validator response contract.
#[derive(Debug, Deserialize)]
struct GuestSession {
    valid: bool,
    room_id: Option<RoomId>,
    guest_name: Option<String>,
}

/// Resolves connection credentials into an [`Identity`].
#[derive(Debug, Clone)]
pub struct SessionAuthenticator {
    decoding_key: DecodingKey,
    http: reqwest::Client,
    guest_validator_url: String,
}

impl SessionAuthenticator {
    pub fn new(jwt_secret: &[u8], guest_validator_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(GUEST_VALIDATOR_TIMEOUT)
            .build()
            .expect("HTTP client construction must succeed at init");
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret),
            http,
            guest_validator_url: guest_validator_url.into(),
        }
    }

    /// Resolve credentials for a connection into `room`.
    ///
    /// Guest session tokens take precedence; otherwise a bearer JWT is
    /// required. Failures here deny the upgrade.
    pub async fn authenticate(&self, room: RoomId, credentials: &Credentials) -> Result<Identity> {
        if let Some(guest_token) = credentials.guest_token.as_deref() {
            return self
                .authenticate_guest(room, guest_token, credentials.guest_name.as_deref())
                .await;
        }

        match credentials.token.as_deref() {
            Some(token) => self.authenticate_bearer(token),
            None => Err(SyncError::Unauthenticated(
                "no token or guestToken provided".into(),
            )),
        }
    }

    fn authenticate_bearer(&self, token: &str) -> Result<Identity> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|err| {
            match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => SyncError::SessionExpired,
                _ => SyncError::Unauthenticated(err.to_string()),
            }
        })?;

        Ok(Identity {
            user_id: UserId(data.claims.sub),
            username: data.claims.username,
            is_guest: false,
        })
    }

    async fn authenticate_guest(
        &self,
        room: RoomId,
        guest_token: &str,
        guest_name: Option<&str>,
    ) -> Result<Identity> {
        let url = format!(
            "{}/api/v1/guest-sessions/validate",
            self.guest_validator_url.trim_end_matches('/')
        );
        let session: GuestSession = self
            .http
            .get(&url)
            .query(&[("token", guest_token)])
            .send()
            .await
            .map_err(|err| SyncError::Unauthenticated(format!("guest validation failed: {err}")))?
            .error_for_status()
            .map_err(|err| SyncError::Unauthenticated(format!("guest validation failed: {err}")))?
            .json()
            .await
            .map_err(|err| {
                SyncError::Unauthenticated(format!("guest validator returned bad payload: {err}"))
            })?;

        if !session.valid {
            return Err(SyncError::SessionExpired);
        }
        if session.room_id != Some(room) {
            debug!(room_id = %room, "guest session bound to a different room");
            return Err(SyncError::GuestRoomMismatch);
        }

        let name = session
            .guest_name
            .as_deref()
            .or(guest_name)
            .unwrap_or("Guest");

        // Guest identities are per-connection; a reconnect is a new participant.
        Ok(Identity {
            user_id: UserId::generate(),
            username: Participant::guest_username(name),
            is_guest: true,
        })
    }
}
