use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// OAuth2 grant used against the `/oauth` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Application-level credentials (client ID and optional secret).
    ClientCredentials,
    /// Resource-owner username and password.
    Password,
    /// Exchange a refresh token for a fresh token pair.
    RefreshToken,
}

/// Body of a token request.
#[derive(Debug, Serialize)]
pub struct TokenRequest<'a> {
    pub grant_type: GrantType,
    pub client_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<&'a str>,
}

/// Token endpoint reply.
#[derive(Debug, Deserialize)]
pub struct TokenReply {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Access token and optional refresh token, as returned by login and
/// validation. Persist these to skip the login next time.
#[derive(Debug)]
pub struct Tokens {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
}

impl Tokens {
    pub fn new(access_token: &str, refresh_token: Option<&str>) -> Self {
        Tokens {
            access_token: secret(access_token),
            refresh_token: refresh_token.filter(|r| !r.is_empty()).map(secret),
        }
    }
}

impl From<TokenReply> for Tokens {
    fn from(reply: TokenReply) -> Self {
        Tokens::new(&reply.access_token, reply.refresh_token.as_deref())
    }
}

/// OAuth2 client credentials, optionally with a resource-owner login.
///
/// When both a username and a password are present the `password` grant
/// is used; otherwise the `client_credentials` grant. A client without
/// secret is a public client.
pub struct ClientCredentials {
    client_id: String,
    client_secret: Option<SecretString>,
    username: Option<String>,
    password: Option<SecretString>,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>) -> Self {
        ClientCredentials {
            client_id: client_id.into(),
            client_secret: None,
            username: None,
            password: None,
        }
    }

    /// Sets the client secret. An empty secret means a public client.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        self.client_secret = (!secret.is_empty()).then(|| SecretString::from(secret));
        self
    }

    /// Sets the resource-owner username and password.
    pub fn user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::from(password.into()));
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Token request for an interactive login.
    pub(crate) fn login_request(&self) -> TokenRequest<'_> {
        let username = self.username.as_deref().filter(|u| !u.is_empty());
        let password = self
            .password
            .as_ref()
            .map(|p| p.expose_secret())
            .filter(|p| !p.is_empty());

        let mut request = TokenRequest {
            grant_type: GrantType::ClientCredentials,
            client_id: &self.client_id,
            client_secret: self.client_secret.as_ref().map(|s| s.expose_secret()),
            username: None,
            password: None,
            refresh_token: None,
        };
        if let (Some(username), Some(password)) = (username, password) {
            request.grant_type = GrantType::Password;
            request.username = Some(username);
            request.password = Some(password);
        }
        request
    }

    /// Token request exchanging `refresh_token` for a new pair.
    pub(crate) fn refresh_request<'a>(&'a self, refresh_token: &'a str) -> TokenRequest<'a> {
        TokenRequest {
            grant_type: GrantType::RefreshToken,
            client_id: &self.client_id,
            client_secret: self.client_secret.as_ref().map(|s| s.expose_secret()),
            username: None,
            password: None,
            refresh_token: Some(refresh_token),
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.is_some())
            .field("username", &self.username)
            .finish()
    }
}

pub(crate) fn secret(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_grant_selection() {
        let public = ClientCredentials::new("cli");
        assert_eq!(
            serde_json::to_value(public.login_request()).unwrap(),
            json!({ "grant_type": "client_credentials", "client_id": "cli" })
        );

        let app = ClientCredentials::new("cli").secret("s3cr3t");
        assert_eq!(
            serde_json::to_value(app.login_request()).unwrap(),
            json!({
                "grant_type": "client_credentials",
                "client_id": "cli",
                "client_secret": "s3cr3t"
            })
        );

        let owner = ClientCredentials::new("cli").user("admin", "pw");
        assert_eq!(
            serde_json::to_value(owner.login_request()).unwrap(),
            json!({
                "grant_type": "password",
                "client_id": "cli",
                "username": "admin",
                "password": "pw"
            })
        );

        // Half a user login falls back to client credentials.
        let partial = ClientCredentials::new("cli").user("admin", "");
        assert_eq!(partial.login_request().grant_type, GrantType::ClientCredentials);
    }

    #[test]
    fn test_refresh_request() {
        let creds = ClientCredentials::new("cli").secret("");
        assert_eq!(
            serde_json::to_value(creds.refresh_request("r-1")).unwrap(),
            json!({ "grant_type": "refresh_token", "client_id": "cli", "refresh_token": "r-1" })
        );
    }
}
