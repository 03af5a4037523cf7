use http::Method;
use serde_json::Value;

use crate::pagination::Reply;
use crate::transport::RestRequest;
use crate::{CppmClient, CppmError, CppmResult, Filter};

/// A generic API request.
///
/// Built with [`CppmClient::request`]. Nothing is validated until
/// [`send`](Self::send); any problem found there (no token, bad path, bad
/// filter value, zero page size) is reported through the returned
/// [`Reply`] without a request leaving the client.
#[derive(Debug, Clone)]
pub struct ApiRequestBuilder {
    client: CppmClient,
    method: Method,
    path: String,
    filter: Filter,
    body: Option<Value>,
    page_size: Option<u32>,
    sort: Option<String>,
}

impl ApiRequestBuilder {
    pub(crate) fn new(client: CppmClient, method: Method, path: String) -> Self {
        Self {
            client,
            method,
            path,
            filter: Filter::new(),
            body: None,
            page_size: None,
            sort: None,
        }
    }

    /// Filter sent as the `filter` query parameter, normalized for the
    /// resource named by the first path segment.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// JSON request body.
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Items per page. Must be at least 1.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Sort expression, e.g. `+id` or `-mac_address`.
    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    fn prepare(&self) -> CppmResult<RestRequest> {
        let url = self.client.api_endpoint(&self.path)?;
        let credential = self.client.bearer().ok_or(CppmError::NotAuthenticated)?;

        let mut request = RestRequest::new(self.method.clone(), url, credential);
        if !self.filter.is_empty() {
            let filter = self.filter.clone().normalize(&self.path)?;
            request.query.push(("filter".into(), filter.to_query_value()?));
        }
        if let Some(sort) = self.sort.as_deref().filter(|s| !s.is_empty()) {
            request.query.push(("sort".into(), sort.to_string()));
        }
        if let Some(page_size) = self.page_size {
            if page_size == 0 {
                return Err(CppmError::PageTooSmall);
            }
            request.query.push(("limit".into(), page_size.to_string()));
            request.query.push(("calculate_count".into(), "false".into()));
        }
        request.body = self.body.clone();
        Ok(request)
    }

    /// Sends the request and returns an iterator over the reply items.
    pub async fn send(self) -> Reply {
        match self.prepare() {
            Ok(request) => Reply::open(self.client.exchange(), request).await,
            Err(e) => Reply::failed(e),
        }
    }
}
