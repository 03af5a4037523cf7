use http::Method;
use serde_json::Value;

use crate::api::request::ApiRequestBuilder;
use crate::pagination::Reply;
use crate::{CppmClient, Filter, MacAddress};

/// Provides access to the endpoint (device) repository.
#[derive(Debug)]
pub struct EndpointHandler {
    client: CppmClient,
}

impl EndpointHandler {
    pub(crate) fn new(client: CppmClient) -> Self {
        Self { client }
    }

    /// Lists endpoints, optionally narrowed down by MAC address or status.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use cppm_client::CppmClient;
    /// #
    /// # async fn example(client: &CppmClient) -> Result<(), cppm_client::CppmError> {
    /// let mut endpoints = client
    ///     .endpoints()
    ///     .list()
    ///     .mac("86:DF:11:22:33:44") // any notation works
    ///     .send()
    ///     .await;
    ///
    /// while endpoints.advance().await {
    ///     println!("{}", endpoints.current().unwrap());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn list(&self) -> ListEndpointsBuilder {
        ListEndpointsBuilder::new(self.client.clone())
    }

    /// Fetches one endpoint by its numeric ID.
    pub async fn get(&self, id: u64) -> Reply {
        self.client
            .request(Method::GET, format!("endpoint/{id}"))
            .send()
            .await
    }

    /// Fetches one endpoint by MAC address.
    pub async fn get_by_mac(&self, mac: &str) -> Reply {
        let mac = MacAddress::new(mac).bare_lower();
        self.client
            .request(Method::GET, format!("endpoint/mac-address/{mac}"))
            .send()
            .await
    }
}

#[derive(Debug, Clone)]
pub struct ListEndpointsBuilder {
    client: CppmClient,
    filter: Filter,
    page_size: Option<u32>,
    sort: Option<String>,
}

impl ListEndpointsBuilder {
    pub(crate) fn new(client: CppmClient) -> Self {
        Self {
            client,
            filter: Filter::new(),
            page_size: None,
            sort: None,
        }
    }

    pub fn mac(mut self, mac: impl Into<String>) -> Self {
        self.filter.insert("mac_address", Value::String(mac.into()));
        self
    }

    /// `Known`, `Unknown` or `Disabled`.
    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.filter.insert("status", Value::String(status.into()));
        self
    }

    /// Adds arbitrary filter fields on top of the ones set above.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter.merge(filter);
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub async fn send(self) -> Reply {
        let mut request: ApiRequestBuilder =
            self.client.request(Method::GET, "endpoint").filter(self.filter);
        if let Some(page_size) = self.page_size {
            request = request.page_size(page_size);
        }
        if let Some(sort) = self.sort {
            request = request.sort(sort);
        }
        request.send().await
    }
}
