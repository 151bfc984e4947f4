//! Access-token expiry tracking.
//!
//! Access tokens are JWTs: three dot-separated base64url segments whose
//! middle segment is a JSON object. Only the `exp` (and, when present, `iat`)
//! claims are read. Signatures are not verified; the server does that.
//!
//! A token that cannot be decoded, or that carries no usable `exp`, has an
//! unknown expiry. Unknown expiry disables proactive refresh; a 401 still
//! triggers a reactive one.

use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer};
use tracing::trace;

use skypanel_core::Session;

/// Refresh once remaining lifetime is at most `1 / REFRESH_DIVISOR` of the span.
pub const REFRESH_DIVISOR: i32 = 10;

// ============================================================================
// Claims
// ============================================================================

/// Timing claims carried by an access token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    /// Expiry, Unix seconds.
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub exp: Option<i64>,
    /// Issue time, Unix seconds.
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub iat: Option<i64>,
}

/// Reads a seconds claim; values that are not a number (or numeric string)
/// decode as absent instead of failing the whole claims object.
#[allow(clippy::cast_possible_truncation)]
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

impl TokenClaims {
    /// Expiry as a timestamp. A zero or out-of-range `exp` is treated as absent.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp
            .filter(|&exp| exp > 0)
            .and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    /// Issue time as a timestamp.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat
            .filter(|&iat| iat > 0)
            .and_then(|iat| DateTime::from_timestamp(iat, 0))
    }
}

/// Decodes the claims segment of a JWT. `None` if the token is malformed.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        trace!("Token is not three dot-separated segments");
        return None;
    };

    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Decodes the expiry of a JWT. `None` when unknown.
pub fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    decode_claims(token).and_then(|c| c.expires_at())
}

// ============================================================================
// Token Clock
// ============================================================================

/// Decides whether an access token should be refreshed before use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenClock {
    issued_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl TokenClock {
    /// A clock with unknown expiry; never asks for a refresh.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Creates a clock from explicit bounds.
    pub fn new(issued_at: Option<DateTime<Utc>>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            issued_at,
            expires_at,
        }
    }

    /// Reads the token's claims. Without `iat`, `observed_at` starts the span.
    pub fn from_token(token: &str, observed_at: DateTime<Utc>) -> Self {
        match decode_claims(token) {
            Some(claims) => Self {
                issued_at: claims.issued_at().or(Some(observed_at)),
                expires_at: claims.expires_at(),
            },
            None => Self::unknown(),
        }
    }

    /// Bounds recorded on a session.
    pub fn for_session(session: &Session) -> Self {
        Self::new(session.issued_at, session.expires_at)
    }

    /// Known expiry.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Start of the token's lifetime.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// Returns true once less than a tenth of the token's span remains.
    ///
    /// The span is the token's full lifetime (`iat` to `exp`), not the time
    /// left from `now`, so a long-lived token a few milliseconds from expiry
    /// refreshes.
    ///
    /// Without a usable span (no start, or start not before expiry), returns
    /// true only once the token has expired. Unknown expiry is always false.
    pub fn should_refresh(&self, now: DateTime<Utc>) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        let remaining = expires_at - now;

        match self
            .issued_at
            .map(|issued| expires_at - issued)
            .filter(|span| *span > Duration::zero())
        {
            Some(span) => remaining <= span / REFRESH_DIVISOR,
            None => remaining <= Duration::zero(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
