//! Request authentication.
//!
//! A shared-token scheme: when the server is started with a token, every
//! `tools/call` must carry it (in `_meta.token` or `auth_token`).
//! Verification happens before dispatch; failure uses its own error code,
//! distinct from every dispatch error.

use serde_json::Value;

/// Token comparison in constant time over the shorter length is not
/// required here; tokens are local-process secrets, not network ones.
pub struct AuthHandler {
    token: Option<String>,
}

impl AuthHandler {
    /// Handler requiring the given token; `None` disables authentication.
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    /// Whether authentication is enabled.
    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Verify a `tools/call` params object.
    pub fn verify(&self, params: &Value) -> bool {
        let Some(expected) = &self.token else {
            return true;
        };
        let presented = params
            .get("_meta")
            .and_then(|m| m.get("token"))
            .or_else(|| params.get("auth_token"))
            .and_then(Value::as_str);
        presented == Some(expected.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn disabled_auth_accepts_everything() {
        let auth = AuthHandler::new(None);
        assert!(auth.verify(&json!({})));
    }

    #[test]
    fn enabled_auth_requires_matching_token() {
        let auth = AuthHandler::new(Some("secret".to_string()));
        assert!(!auth.verify(&json!({})));
        assert!(!auth.verify(&json!({ "auth_token": "wrong" })));
        assert!(auth.verify(&json!({ "auth_token": "secret" })));
        assert!(auth.verify(&json!({ "_meta": { "token": "secret" } })));
    }
}
