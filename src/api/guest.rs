use http::Method;
use serde_json::Value;

use crate::pagination::Reply;
use crate::{CppmClient, Filter};

/// Provides access to guest accounts.
#[derive(Debug)]
pub struct GuestHandler {
    client: CppmClient,
}

impl GuestHandler {
    pub(crate) fn new(client: CppmClient) -> Self {
        Self { client }
    }

    /// Lists guest accounts.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use cppm_client::CppmClient;
    /// #
    /// # async fn example(client: &CppmClient) -> Result<(), cppm_client::CppmError> {
    /// // Guest MACs are stored as 86-DF-11-22-33-44; the filter is rewritten to match.
    /// let guests = client
    ///     .guests()
    ///     .list()
    ///     .mac("86df11223344")
    ///     .send()
    ///     .await
    ///     .try_collect()
    ///     .await?;
    /// println!("{} guests", guests.len());
    /// # Ok(())
    /// # }
    /// ```
    pub fn list(&self) -> ListGuestsBuilder {
        ListGuestsBuilder::new(self.client.clone())
    }

    pub async fn get(&self, id: u64) -> Reply {
        self.client
            .request(Method::GET, format!("guest/{id}"))
            .send()
            .await
    }
}

#[derive(Debug, Clone)]
pub struct ListGuestsBuilder {
    client: CppmClient,
    filter: Filter,
    page_size: Option<u32>,
}

impl ListGuestsBuilder {
    pub(crate) fn new(client: CppmClient) -> Self {
        Self {
            client,
            filter: Filter::new(),
            page_size: None,
        }
    }

    pub fn mac(mut self, mac: impl Into<String>) -> Self {
        self.filter.insert("mac", Value::String(mac.into()));
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.filter.insert("username", Value::String(username.into()));
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter.merge(filter);
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub async fn send(self) -> Reply {
        let request = self.client.request(Method::GET, "guest").filter(self.filter);
        match self.page_size {
            Some(page_size) => request.page_size(page_size).send().await,
            None => request.send().await,
        }
    }
}
