//! Identity token port.

use chrono::TimeDelta;
use courier_core::{Error, Map, Result};

/// Outcome of verifying a token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedToken {
    /// The token is past its expiry.
    pub expired: bool,
    /// The token is malformed, forged or of another kind.
    pub invalid: bool,
    /// Subject the token was issued to.
    pub sub: Option<String>,
    /// Kind the token was issued for, such as `access` or `refresh`.
    pub kind: Option<String>,
    /// Claims issued with the token.
    pub extra: Map,
}

impl DecodedToken {
    /// A valid token.
    pub fn valid(sub: impl Into<String>, kind: impl Into<String>, extra: Map) -> Self {
        Self {
            sub: Some(sub.into()),
            kind: Some(kind.into()),
            extra,
            ..Self::default()
        }
    }

    /// An expired token.
    pub fn expired() -> Self {
        Self {
            expired: true,
            ..Self::default()
        }
    }

    /// A token that cannot be trusted.
    pub fn invalid() -> Self {
        Self {
            invalid: true,
            ..Self::default()
        }
    }

    /// Subject and claims, or `expired_token` / `invalid_token`.
    pub fn into_result(self) -> Result<(String, Map)> {
        if self.expired {
            return Err(Error::expired_token());
        }
        match self.sub {
            Some(sub) if !self.invalid && !sub.is_empty() => Ok((sub, self.extra)),
            _ => Err(Error::invalid_token()),
        }
    }
}

/// Issues and verifies signed identity tokens.
pub trait TokenIssuer: Send + Sync {
    /// A token for `subject` of the given `kind`, valid for `ttl`.
    fn issue(&self, subject: &str, kind: &str, ttl: TimeDelta, extra: Map) -> Result<String>;

    /// Decode `token`, expecting it to be of the given `kind`.
    fn verify(&self, token: &str, kind: &str) -> DecodedToken;
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::ErrorKind;

    #[test]
    fn decoded_tokens_map_to_errors() {
        let (sub, _) = DecodedToken::valid("ada", "access", Map::empty())
            .into_result()
            .unwrap();
        assert_eq!(sub, "ada");

        let err = DecodedToken::expired().into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExpiredToken);

        let err = DecodedToken::invalid().into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidToken);
    }
}
