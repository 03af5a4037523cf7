// HTTP transport shared by the API and the web interface.
//
// Every request goes through `Transport::send`, which captures what was
// sent before it leaves so that any failure can be reported as a
// `RestError` with the full exchange attached.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use log::{debug, trace, warn};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::{form_urlencoded, Url};

use crate::models::cookie::WebCookie;
use crate::{CppmError, CppmResult, RestCause, RestError};

/// Cookie store owned by a session.
///
/// Wraps a [`Jar`] so that it can be replaced wholesale (a web login
/// starts from an empty jar), listed and injected into. Writers take the
/// lock exclusively, so a reset never races with an in-flight request
/// reading cookies.
#[derive(Debug, Default)]
pub(crate) struct SessionCookies {
    jar: RwLock<Arc<Jar>>,
}

impl SessionCookies {
    fn current(&self) -> Arc<Jar> {
        Arc::clone(&self.jar.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Drops every cookie.
    pub(crate) fn reset(&self) {
        *self.jar.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(Jar::default());
    }

    /// Adds a cookie scoped to `url`.
    pub(crate) fn add(&self, cookie: &WebCookie, url: &Url) {
        trace!("adding cookie {} for {}", cookie.name, url);
        self.current()
            .add_cookie_str(&format!("{}={}", cookie.name, cookie.value), url);
    }

    /// Cookies that would be sent to `url`.
    pub(crate) fn list(&self, url: &Url) -> Vec<WebCookie> {
        self.current()
            .cookies(url)
            .and_then(|header| header.to_str().ok().map(WebCookie::parse_header))
            .unwrap_or_default()
    }
}

impl CookieStore for SessionCookies {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.current().set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.current().cookies(url)
    }
}

/// Everything about a request needed to reproduce it.
#[derive(Debug, Clone)]
pub(crate) struct RequestContext {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) query: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: String,
}

impl RequestContext {
    /// Context of a request that could not even be built.
    fn bare(method: Method, url: &Url) -> Self {
        let mut url = url.clone();
        let query = url.query().unwrap_or_default().to_string();
        url.set_query(None);
        RequestContext {
            method,
            url: url.to_string(),
            query,
            headers: HeaderMap::new(),
            body: String::new(),
        }
    }

    fn capture(request: &reqwest::Request) -> Self {
        let mut context = RequestContext::bare(request.method().clone(), request.url());
        context.headers = request.headers().clone();
        context.body = request
            .body()
            .and_then(|b| b.as_bytes())
            .map(|b| redact_body(context.headers.get(CONTENT_TYPE), &String::from_utf8_lossy(b)))
            .unwrap_or_default();
        context
    }

    /// Failure before any response arrived.
    pub(crate) fn error(self, cause: impl Into<RestCause>) -> Box<RestError> {
        Box::new(RestError {
            cause: cause.into(),
            method: self.method,
            url: self.url,
            query: self.query,
            request_headers: self.headers,
            body: self.body,
            status: None,
            response_headers: HeaderMap::new(),
            reply: String::new(),
        })
    }
}

/// Body fields whose values never leave the process in an error report.
const SECRET_FIELDS: [&str; 5] = [
    "password",
    "client_secret",
    "refresh_token",
    "access_token",
    "encyptionPassword",
];

const REDACTED: &str = "<redacted>";

/// Copy of a JSON or form request body with credential values masked.
/// Other bodies are kept as they are.
fn redact_body(content_type: Option<&HeaderValue>, body: &str) -> String {
    let content_type = content_type.and_then(|v| v.to_str().ok()).unwrap_or_default();
    if content_type.starts_with("application/json") {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(mut fields)) => {
                for (name, value) in fields.iter_mut() {
                    if SECRET_FIELDS.contains(&name.as_str()) {
                        *value = Value::String(REDACTED.into());
                    }
                }
                Value::Object(fields).to_string()
            }
            _ => body.to_string(),
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let mut redacted = form_urlencoded::Serializer::new(String::new());
        for (name, value) in form_urlencoded::parse(body.as_bytes()) {
            if SECRET_FIELDS.contains(&name.as_ref()) {
                redacted.append_pair(&name, REDACTED);
            } else {
                redacted.append_pair(&name, &value);
            }
        }
        redacted.finish()
    } else {
        body.to_string()
    }
}

/// A complete response, read into memory.
#[derive(Debug)]
pub struct RawResponse {
    pub(crate) context: RequestContext,
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl RawResponse {
    /// Reads the body of a live response.
    pub(crate) async fn read(
        context: RequestContext,
        response: Response,
    ) -> Result<Self, Box<RestError>> {
        let status = response.status();
        let headers = response.headers().clone();
        match response.bytes().await {
            Ok(body) => Ok(RawResponse {
                context,
                status,
                headers,
                body,
            }),
            Err(e) => {
                let mut err = context.error(e);
                err.status = Some(status);
                err.response_headers = headers;
                Err(err)
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turns this exchange into an error record.
    pub(crate) fn into_error(self, cause: impl Into<RestCause>) -> Box<RestError> {
        let reply = self.text();
        Box::new(RestError {
            cause: cause.into(),
            method: self.context.method,
            url: self.context.url,
            query: self.context.query,
            request_headers: self.context.headers,
            body: self.context.body,
            status: Some(self.status),
            response_headers: self.headers,
            reply,
        })
    }

    /// Fails with a handshake error unless the status is `expected`.
    pub(crate) fn expect_status(
        self,
        expected: StatusCode,
        step: &str,
    ) -> Result<Self, Box<RestError>> {
        if self.status == expected {
            Ok(self)
        } else {
            let message = format!("{step}: expected status {expected}, got {}", self.status);
            Err(self.into_error(RestCause::Handshake(message)))
        }
    }

    /// Fails unless the status is `expected`; 401 and 403 carry the
    /// not-authenticated cause.
    pub(crate) fn require_status(self, expected: StatusCode) -> Result<Self, Box<RestError>> {
        if self.status == expected {
            return Ok(self);
        }
        let cause = status_cause(self.status);
        Err(self.into_error(cause))
    }

    /// Maps 401/403 to the not-authenticated cause and any other
    /// non-success status to a status error.
    pub(crate) fn error_for_status(self) -> Result<Self, Box<RestError>> {
        if self.status.is_success() {
            return Ok(self);
        }
        let cause = status_cause(self.status);
        Err(self.into_error(cause))
    }

    /// Decodes the body as JSON.
    pub(crate) fn json<T: DeserializeOwned>(self) -> Result<T, Box<RestError>> {
        match serde_json::from_slice(&self.body) {
            Ok(value) => Ok(value),
            Err(e) => Err(self.into_error(e)),
        }
    }
}

/// Cause for an unwanted status.
pub(crate) fn status_cause(status: StatusCode) -> RestCause {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RestCause::NotAuthenticated,
        status => RestCause::Status(status),
    }
}

/// Credential attached to an API request.
#[derive(Debug)]
pub enum Credential {
    /// No credential; only valid for the token endpoint.
    Anonymous,
    /// OAuth2 bearer token.
    Bearer(SecretString),
}

/// One JSON API exchange.
#[derive(Debug)]
pub struct RestRequest {
    pub method: Method,
    pub url: Url,
    pub credential: Credential,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RestRequest {
    pub fn new(method: Method, url: Url, credential: Credential) -> Self {
        RestRequest {
            method,
            url,
            credential,
            query: Vec::new(),
            body: None,
        }
    }

    /// Request for a follow-up page: a plain GET against `url`, same
    /// credential, no query or body of its own.
    pub(crate) fn follow(&self, url: Url) -> Self {
        let credential = match &self.credential {
            Credential::Anonymous => Credential::Anonymous,
            Credential::Bearer(token) => {
                Credential::Bearer(crate::models::auth::secret(token.expose_secret()))
            }
        };
        RestRequest::new(Method::GET, url, credential)
    }
}

/// Executes JSON API exchanges. The paginator only talks to this seam.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Runs one exchange. Non-2xx replies are errors; 401 and 403 carry
    /// the not-authenticated cause.
    async fn exchange(&self, request: &RestRequest) -> CppmResult<RawResponse>;
}

/// HTTP settings for a session.
#[derive(Debug, Clone)]
pub(crate) struct TransportConfig {
    pub(crate) accept_invalid_certs: bool,
    /// Connect and idle-read limit for every request, and the total limit
    /// for JSON API exchanges. Streamed downloads have no total limit.
    pub(crate) timeout: Duration,
    pub(crate) user_agent: String,
}

/// Shared HTTP client plus the session cookie store.
#[derive(Debug, Clone)]
pub struct Transport {
    http: ReqwestClient,
    cookies: Arc<SessionCookies>,
    exchange_timeout: Option<Duration>,
}

impl Transport {
    pub(crate) fn new(config: &TransportConfig) -> CppmResult<Self> {
        if config.accept_invalid_certs {
            warn!("TLS certificate verification is disabled for this session");
        }
        let cookies = Arc::new(SessionCookies::default());
        let http = ReqwestClient::builder()
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .cookie_provider(Arc::clone(&cookies))
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| {
                CppmError::ConfigurationError(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(Transport {
            http,
            cookies,
            exchange_timeout: Some(config.timeout),
        })
    }

    /// Uses a caller-provided client. Cookies only reach the session store
    /// if that client was built with it as cookie provider, so web login
    /// needs the default client.
    pub(crate) fn with_client(http: ReqwestClient) -> Self {
        Transport {
            http,
            cookies: Arc::new(SessionCookies::default()),
            exchange_timeout: None,
        }
    }

    pub(crate) fn cookies(&self) -> &SessionCookies {
        &self.cookies
    }

    /// Sends a `method` request to `url`, shaped by `configure`, and hands
    /// back the live response with its body unread.
    pub(crate) async fn send_streaming<F>(
        &self,
        method: Method,
        url: Url,
        configure: F,
    ) -> Result<(RequestContext, Response), Box<RestError>>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let builder = configure(self.http.request(method.clone(), url.clone()));
        let request = match builder.build() {
            Ok(request) => request,
            Err(e) => return Err(RequestContext::bare(method, &url).error(e)),
        };
        let context = RequestContext::capture(&request);
        debug!("{} {}", context.method, context.url);

        match self.http.execute(request).await {
            Ok(response) => {
                trace!("{} {} -> {}", context.method, context.url, response.status());
                Ok((context, response))
            }
            Err(e) => Err(context.error(e)),
        }
    }

    /// Sends a request and reads the whole reply. Any status is returned
    /// as is; only a failure to complete the exchange is an error.
    pub(crate) async fn send<F>(
        &self,
        method: Method,
        url: Url,
        configure: F,
    ) -> Result<RawResponse, Box<RestError>>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let (context, response) = self.send_streaming(method, url, configure).await?;
        RawResponse::read(context, response).await
    }
}

#[async_trait]
impl Exchange for Transport {
    async fn exchange(&self, request: &RestRequest) -> CppmResult<RawResponse> {
        let reply = self
            .send(request.method.clone(), request.url.clone(), |mut builder| {
                builder = builder.header(ACCEPT, "application/json");
                if let Some(timeout) = self.exchange_timeout {
                    builder = builder.timeout(timeout);
                }
                if !request.query.is_empty() {
                    builder = builder.query(&request.query);
                }
                if let Credential::Bearer(token) = &request.credential {
                    builder = builder.bearer_auth(token.expose_secret());
                }
                if let Some(body) = &request.body {
                    builder = builder.json(body);
                }
                builder
            })
            .await?;
        Ok(reply.error_for_status()?)
    }
}
