use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use http::Method;
use log::debug;
use reqwest::Client as ReqwestClient;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use url::Url;

use crate::api::endpoint::EndpointHandler;
use crate::api::guest::GuestHandler;
use crate::api::request::ApiRequestBuilder;
use crate::models::auth::{secret, ClientCredentials, TokenReply, TokenRequest, Tokens};
use crate::models::cookie::WebCookie;
use crate::transport::{Credential, Exchange, RestRequest, Transport, TransportConfig};
use crate::web::SESSION_COOKIE;
use crate::{CppmError, CppmResult};

/// Builder for a ClearPass client session.
///
/// Nothing is sent over the network while building; call
/// [`CppmClient::login`] or [`CppmClient::validate`] afterwards, or seed the
/// builder with a cached token.
#[derive(Default)]
pub struct CppmClientBuilder {
    address: Option<String>,
    accept_invalid_certs: bool,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    http_client: Option<ReqwestClient>,
    token: Option<String>,
    refresh_token: Option<String>,
    cookies: Vec<WebCookie>,
}

impl CppmClientBuilder {
    /// Seeds a builder from `CPPM_SERVER`, `CPPM_TOKEN`, `CPPM_REFRESH`,
    /// `CPPM_COOKIE` (JSON list of `{"Name", "Value"}` objects) and
    /// `CPPM_UNSAFE`. Unset variables leave the defaults alone.
    pub fn from_env() -> CppmResult<Self> {
        let mut builder = CppmClientBuilder::default();
        if let Ok(server) = std::env::var("CPPM_SERVER") {
            builder = builder.address(server);
        }
        if let Ok(token) = std::env::var("CPPM_TOKEN") {
            builder = builder.token(token);
        }
        if let Ok(refresh) = std::env::var("CPPM_REFRESH") {
            builder = builder.refresh_token(refresh);
        }
        if let Ok(cookie) = std::env::var("CPPM_COOKIE") {
            builder = builder.cookies_json(&cookie)?;
        }
        if let Ok(unsafe_tls) = std::env::var("CPPM_UNSAFE") {
            let flag = matches!(unsafe_tls.trim().to_lowercase().as_str(), "1" | "true" | "yes");
            builder = builder.accept_invalid_certs(flag);
        }
        Ok(builder)
    }

    /// Sets the appliance address, `host` or `host:port`.
    ///
    /// An address that already carries a scheme (`http://host:8080`) is
    /// used as is instead of being prefixed with `https://`.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Skips TLS certificate verification. Off by default; only meant for
    /// appliances with self-signed certificates.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Sets the connect and idle-read timeout of every request, which is
    /// also the total limit of a REST API exchange. Export downloads may
    /// run longer as long as data keeps arriving.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets a custom user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets a custom reqwest client.
    ///
    /// The session cookie store is not attached to such a client, so the
    /// web interface operations need the default one.
    pub fn http_client(mut self, http_client: ReqwestClient) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Reuses a previously obtained access token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Reuses a previously obtained refresh token.
    pub fn refresh_token(mut self, refresh: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh.into());
        self
    }

    /// Restores web session cookies.
    pub fn cookies(mut self, cookies: Vec<WebCookie>) -> Self {
        self.cookies = cookies;
        self
    }

    /// Restores web session cookies from their JSON persisted form.
    pub fn cookies_json(mut self, json: &str) -> CppmResult<Self> {
        if !json.trim().is_empty() {
            self.cookies = serde_json::from_str(json).map_err(|e| {
                CppmError::ConfigurationError(format!("Invalid cookie blob: {e}"))
            })?;
        }
        Ok(self)
    }

    pub fn build(self) -> CppmResult<CppmClient> {
        let address = self
            .address
            .map(|a| a.trim().trim_end_matches('/').to_string())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| CppmError::ConfigurationError("Server address is required".into()))?;
        let (api_url, web_url) = base_urls(&address)?;

        let config = TransportConfig {
            accept_invalid_certs: self.accept_invalid_certs,
            timeout: self.timeout.unwrap_or(Duration::from_secs(30)),
            user_agent: self
                .user_agent
                .unwrap_or_else(|| concat!("cppm-client/", env!("CARGO_PKG_VERSION")).to_string()),
        };
        let transport = match self.http_client {
            Some(custom_client) => Transport::with_client(custom_client),
            None => Transport::new(&config)?,
        };

        for cookie in &self.cookies {
            transport.cookies().add(cookie, &web_url);
        }

        let state = TokenState {
            token: self.token.as_deref().filter(|t| !t.is_empty()).map(secret),
            refresh: self.refresh_token.as_deref().filter(|r| !r.is_empty()).map(secret),
        };

        Ok(CppmClient {
            address,
            api_url,
            web_url,
            accept_invalid_certs: config.accept_invalid_certs,
            transport: Arc::new(transport),
            tokens: Arc::new(ArcSwap::from_pointee(state)),
            auth_lock: Arc::new(Mutex::new(())),
            web_lock: Arc::new(Mutex::new(())),
        })
    }
}

/// `https://<address>/api` and `https://<address>/tips`.
fn base_urls(address: &str) -> CppmResult<(Url, Url)> {
    let root = if address.contains("://") {
        address.to_string()
    } else {
        format!("https://{address}")
    };
    let parse = |suffix: &str| {
        Url::parse(&format!("{root}/{suffix}")).map_err(|e| {
            CppmError::ConfigurationError(format!("Invalid server address '{address}': {e}"))
        })
    };
    Ok((parse("api")?, parse("tips")?))
}

/// Token credential of the API session.
#[derive(Default)]
struct TokenState {
    token: Option<SecretString>,
    refresh: Option<SecretString>,
}

/// A session with one ClearPass appliance.
///
/// The session holds two independent credentials: an OAuth2 token for the
/// REST API and a cookie jar for the web interface. Clones share both.
#[derive(Clone)]
pub struct CppmClient {
    address: String,
    api_url: Url,
    web_url: Url,
    accept_invalid_certs: bool,
    transport: Arc<Transport>,
    tokens: Arc<ArcSwap<TokenState>>,
    // Serializes login/validate, and the web handshake against cookie jar readers.
    auth_lock: Arc<Mutex<()>>,
    web_lock: Arc<Mutex<()>>,
}

impl fmt::Debug for CppmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CppmClient")
            .field("address", &self.address)
            .field("api_url", &self.api_url.as_str())
            .field("web_url", &self.web_url.as_str())
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("has_token", &self.tokens.load().token.is_some())
            .finish()
    }
}

impl CppmClient {
    pub fn builder() -> CppmClientBuilder {
        CppmClientBuilder::default()
    }

    /// The appliance address this session is bound to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Base URL of the REST API.
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// Base URL of the web interface.
    pub fn web_url(&self) -> &Url {
        &self.web_url
    }

    pub fn accepts_invalid_certs(&self) -> bool {
        self.accept_invalid_certs
    }

    /// The current access token, if logged in.
    pub fn token(&self) -> Option<SecretString> {
        self.tokens
            .load()
            .token
            .as_ref()
            .map(|t| secret(t.expose_secret()))
    }

    /// The current refresh token, if any.
    pub fn refresh_token(&self) -> Option<SecretString> {
        self.tokens
            .load()
            .refresh
            .as_ref()
            .map(|r| secret(r.expose_secret()))
    }

    /// Web session cookies, when the jar holds a session cookie.
    pub fn cookies(&self) -> Option<Vec<WebCookie>> {
        let cookies = self.transport.cookies().list(&self.web_url);
        cookies
            .iter()
            .any(|c| c.name == SESSION_COOKIE)
            .then_some(cookies)
    }

    /// Logs into the REST API.
    ///
    /// Uses the `password` grant when the credentials carry a username and
    /// password, the `client_credentials` grant otherwise. On failure the
    /// session keeps whatever token it had before.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use cppm_client::{ClientCredentials, CppmClient};
    /// # async fn example() -> Result<(), cppm_client::CppmError> {
    /// let client = CppmClient::builder().address("cppm.example.com").build()?;
    /// let credentials = ClientCredentials::new("cli").secret("s3cr3t");
    /// let tokens = client.login(&credentials).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn login(&self, credentials: &ClientCredentials) -> CppmResult<Tokens> {
        let _guard = self.auth_lock.lock().await;
        let tokens = self.token_grant(&credentials.login_request()).await?;
        self.store_tokens(&tokens);
        debug!("logged into {} as client {}", self.address, credentials.client_id());
        Ok(tokens)
    }

    /// Checks that cached tokens still work.
    ///
    /// With a refresh token, a refresh grant is tried first and its new
    /// token pair adopted. Without one, or if the refresh fails, the access
    /// token is checked against the API client endpoint; the returned
    /// tokens then carry no refresh token. A rejected token clears the
    /// session and yields an error for which
    /// [`CppmError::is_not_authenticated`] is `true`.
    pub async fn validate(
        &self,
        credentials: &ClientCredentials,
        cached: &Tokens,
    ) -> CppmResult<Tokens> {
        let _guard = self.auth_lock.lock().await;

        if let Some(refresh) = cached
            .refresh_token
            .as_ref()
            .map(|r| r.expose_secret())
            .filter(|r| !r.is_empty())
        {
            match self.token_grant(&credentials.refresh_request(refresh)).await {
                Ok(tokens) => {
                    self.store_tokens(&tokens);
                    debug!("refreshed token for client {}", credentials.client_id());
                    return Ok(tokens);
                }
                Err(e) => debug!("token refresh failed, checking cached token: {e}"),
            }
        }

        let mut url = self.api_endpoint("api-client")?;
        url.path_segments_mut()
            .map_err(|_| CppmError::InvalidEndpoint(self.api_url.to_string()))?
            .push(credentials.client_id());
        let access_token = cached.access_token.expose_secret();
        let request = RestRequest::new(Method::GET, url, Credential::Bearer(secret(access_token)));

        match self.transport.exchange(&request).await {
            Ok(_) => {
                let tokens = Tokens::new(access_token, None);
                self.store_tokens(&tokens);
                Ok(tokens)
            }
            Err(e) => {
                if e.is_not_authenticated() {
                    self.tokens.store(Arc::new(TokenState::default()));
                }
                Err(e)
            }
        }
    }

    async fn token_grant(&self, grant: &TokenRequest<'_>) -> CppmResult<Tokens> {
        let url = self.api_endpoint("oauth")?;
        let mut request = RestRequest::new(Method::POST, url, Credential::Anonymous);
        request.body = Some(serde_json::to_value(grant)?);
        let reply: TokenReply = self.transport.exchange(&request).await?.json()?;
        Ok(Tokens::from(reply))
    }

    fn store_tokens(&self, tokens: &Tokens) {
        self.tokens.store(Arc::new(TokenState {
            token: Some(secret(tokens.access_token.expose_secret())),
            refresh: tokens.refresh_token.as_ref().map(|r| secret(r.expose_secret())),
        }));
    }

    /// Starts a generic API request against `path`, relative to the API
    /// base URL (e.g. `endpoint`, `guest/12`, `insight/endpoint/mac/...`).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use cppm_client::{CppmClient, Filter};
    /// # async fn example(client: &CppmClient) -> Result<(), cppm_client::CppmError> {
    /// let mut reply = client
    ///     .request(http::Method::GET, "endpoint")
    ///     .filter(Filter::new().equals("status", "Known"))
    ///     .page_size(25)
    ///     .send()
    ///     .await;
    /// while reply.advance().await {
    ///     println!("{}", reply.current().unwrap());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn request(&self, method: Method, path: impl Into<String>) -> ApiRequestBuilder {
        ApiRequestBuilder::new(self.clone(), method, path.into())
    }

    /// Gets the endpoint API interface.
    pub fn endpoints(&self) -> EndpointHandler {
        EndpointHandler::new(self.clone())
    }

    /// Gets the guest API interface.
    pub fn guests(&self) -> GuestHandler {
        GuestHandler::new(self.clone())
    }

    pub(crate) fn exchange(&self) -> Arc<dyn Exchange> {
        self.transport.clone()
    }

    pub(crate) fn transport(&self) -> &Transport {
        &self.transport
    }

    pub(crate) fn web_lock(&self) -> &Mutex<()> {
        &self.web_lock
    }

    /// Bearer credential for API calls, if logged in.
    pub(crate) fn bearer(&self) -> Option<Credential> {
        self.token().map(Credential::Bearer)
    }

    /// Full URL of an API path. Query strings and fragments are not
    /// accepted in `path`.
    pub(crate) fn api_endpoint(&self, path: &str) -> CppmResult<Url> {
        join(&self.api_url, path)
    }

    /// Full URL of a web interface page.
    pub(crate) fn web_endpoint(&self, path: &str) -> CppmResult<Url> {
        join(&self.web_url, path)
    }
}

fn join(base: &Url, path: &str) -> CppmResult<Url> {
    if path.contains('?') || path.contains('#') {
        return Err(CppmError::InvalidEndpoint(format!(
            "endpoint must not include query or fragment: {path}"
        )));
    }
    let full = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Ok(Url::parse(&full)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_urls() {
        let (api, web) = base_urls("cppm.example.com:8443").unwrap();
        assert_eq!(api.as_str(), "https://cppm.example.com:8443/api");
        assert_eq!(web.as_str(), "https://cppm.example.com:8443/tips");

        let (api, _) = base_urls("http://127.0.0.1:9000").unwrap();
        assert_eq!(api.as_str(), "http://127.0.0.1:9000/api");
    }

    #[test]
    fn test_join_rejects_query() {
        let base = Url::parse("https://cppm/api").unwrap();
        assert_eq!(join(&base, "/endpoint/3").unwrap().as_str(), "https://cppm/api/endpoint/3");
        assert!(matches!(join(&base, "endpoint?x=1"), Err(CppmError::InvalidEndpoint(_))));
    }
}
