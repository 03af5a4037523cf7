//! Lazy iteration over paginated API replies.
//!
//! The first page is fetched when the iterator is opened. Following pages
//! are fetched by a background task that hands each page over through a
//! single-slot channel: it reserves the slot before fetching, so at most
//! one page is ever prefetched ahead of the consumer.
//!
//! ```no_run
//! # async fn example(client: &cppm_client::CppmClient) -> cppm_client::CppmResult<()> {
//! let mut reply = client.request(http::Method::GET, "endpoint").page_size(25).send().await;
//! while reply.advance().await {
//!     println!("{}", reply.current().unwrap());
//! }
//! if let Some(err) = reply.last_error() {
//!     eprintln!("iteration stopped: {err}");
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use log::{debug, trace};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::reply::ReplyPage;
use crate::transport::{Exchange, RestRequest};
use crate::{CppmError, CppmResult};

type PageResult = CppmResult<Vec<Value>>;

/// Background producer of follow-up pages.
struct PageFeed {
    rx: mpsc::Receiver<PageResult>,
    handle: Option<JoinHandle<()>>,
}

impl PageFeed {
    fn spawn(exchange: Arc<dyn Exchange>, request: RestRequest) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(produce(exchange, request, tx));
        PageFeed {
            rx,
            handle: Some(handle),
        }
    }

    /// Stops the producer after any fetch already in flight completes.
    async fn drain(mut self) {
        self.rx.close();
        while self.rx.recv().await.is_some() {}
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn produce(
    exchange: Arc<dyn Exchange>,
    mut request: RestRequest,
    tx: mpsc::Sender<PageResult>,
) {
    loop {
        // Reserve before fetching: no request goes out unless the consumer
        // is still there and has room for the page.
        let Ok(permit) = tx.reserve().await else {
            debug!("reply abandoned, not fetching {}", request.url);
            return;
        };
        let page = match fetch(exchange.as_ref(), &request).await {
            Ok(page) => page,
            Err(e) => {
                permit.send(Err(e));
                return;
            }
        };
        match page {
            ReplyPage::SingleItem(item) => {
                permit.send(Ok(vec![item]));
                return;
            }
            ReplyPage::CollectionPage { items, links } => {
                let next = links.next_url(&request.url);
                if items.is_empty() {
                    trace!("empty page at {}", request.url);
                    drop(permit);
                } else {
                    permit.send(Ok(items));
                }
                match next {
                    Some(url) => request = request.follow(url),
                    None => return,
                }
            }
        }
    }
}

async fn fetch(exchange: &dyn Exchange, request: &RestRequest) -> CppmResult<ReplyPage> {
    let raw = exchange.exchange(request).await?;
    let body: Value = raw.json()?;
    Ok(ReplyPage::parse(body))
}

/// Iterator over the items of an API reply.
///
/// A single-object reply yields that object once. A collection reply
/// yields every item of every page, following `next` links until the
/// last page. Errors are terminal: once [`last_error`](Self::last_error)
/// is set no further requests are made and [`advance`](Self::advance)
/// keeps returning `false`.
pub struct Reply {
    items: Vec<Value>,
    offset: Option<usize>,
    feed: Option<PageFeed>,
    error: Option<CppmError>,
}

impl Reply {
    /// Issues the first exchange and sets up pagination.
    pub(crate) async fn open(exchange: Arc<dyn Exchange>, request: RestRequest) -> Self {
        match fetch(exchange.as_ref(), &request).await {
            Err(e) => Reply::failed(e),
            Ok(ReplyPage::SingleItem(item)) => Reply::from_items(vec![item], None),
            Ok(ReplyPage::CollectionPage { items, links }) => {
                let feed = links
                    .next_url(&request.url)
                    .map(|url| PageFeed::spawn(exchange, request.follow(url)));
                Reply::from_items(items, feed)
            }
        }
    }

    /// An iterator that failed before anything was fetched.
    pub(crate) fn failed(error: CppmError) -> Self {
        Reply {
            items: Vec::new(),
            offset: None,
            feed: None,
            error: Some(error),
        }
    }

    fn from_items(items: Vec<Value>, feed: Option<PageFeed>) -> Self {
        Reply {
            items,
            offset: None,
            feed,
            error: None,
        }
    }

    /// Moves to the next item, fetching the next page if needed.
    ///
    /// Returns `false` once the reply is exhausted or has failed.
    pub async fn advance(&mut self) -> bool {
        if self.error.is_some() {
            return false;
        }
        let next = self.offset.map_or(0, |offset| offset + 1);
        if next < self.items.len() {
            self.offset = Some(next);
            return true;
        }
        loop {
            let Some(feed) = self.feed.as_mut() else {
                self.exhaust();
                return false;
            };
            match feed.rx.recv().await {
                Some(Ok(items)) if items.is_empty() => continue,
                Some(Ok(items)) => {
                    self.items = items;
                    self.offset = Some(0);
                    return true;
                }
                Some(Err(e)) => {
                    self.exhaust();
                    self.error = Some(e);
                    return false;
                }
                None => {
                    self.exhaust();
                    return false;
                }
            }
        }
    }

    fn exhaust(&mut self) {
        self.items.clear();
        self.offset = None;
        self.feed = None;
    }

    /// The item the iterator is positioned on.
    pub fn current(&self) -> Option<&Value> {
        self.offset.and_then(|offset| self.items.get(offset))
    }

    /// Deserializes the current item.
    pub fn current_as<T: DeserializeOwned>(&self) -> CppmResult<Option<T>> {
        self.current()
            .map(|item| serde_json::from_value(item.clone()).map_err(CppmError::from))
            .transpose()
    }

    /// The error that stopped iteration, if any.
    pub fn last_error(&self) -> Option<&CppmError> {
        self.error.as_ref()
    }

    /// Drains the remaining items into a vector.
    pub async fn try_collect(mut self) -> CppmResult<Vec<Value>> {
        let mut all = Vec::new();
        while self.advance().await {
            if let Some(item) = self.current() {
                all.push(item.clone());
            }
        }
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(all),
        }
    }

    /// Abandons iteration and waits for any in-flight page fetch to finish.
    ///
    /// Dropping a `Reply` also stops pagination, but without waiting.
    pub async fn close(mut self) {
        if let Some(feed) = self.feed.take() {
            feed.drain().await;
        }
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("items", &self.items.len())
            .field("offset", &self.offset)
            .field("paginating", &self.feed.is_some())
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode};
    use serde_json::json;
    use url::Url;

    use super::*;
    use crate::transport::{Credential, RawResponse, RequestContext};

    /// Serves canned JSON bodies keyed by URL and counts calls.
    struct StubExchange {
        pages: HashMap<String, (StatusCode, Value)>,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl StubExchange {
        fn new(pages: &[(&str, Value)]) -> Arc<Self> {
            Arc::new(StubExchange {
                pages: pages
                    .iter()
                    .map(|(url, body)| (url.to_string(), (StatusCode::OK, body.clone())))
                    .collect(),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Exchange for StubExchange {
        async fn exchange(&self, request: &RestRequest) -> CppmResult<RawResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let url = request.url.to_string();
            self.seen.lock().unwrap().push(url.clone());
            let (status, body) = self
                .pages
                .get(&url)
                .cloned()
                .unwrap_or((StatusCode::NOT_FOUND, Value::Null));
            let raw = RawResponse {
                context: RequestContext {
                    method: request.method.clone(),
                    url: url.clone(),
                    query: String::new(),
                    headers: HeaderMap::new(),
                    body: String::new(),
                },
                status,
                headers: HeaderMap::new(),
                body: Bytes::from(body.to_string()),
            };
            Ok(raw.error_for_status()?)
        }
    }

    fn page(self_href: &str, next_href: &str, items: Value) -> Value {
        json!({
            "_links": { "self": { "href": self_href }, "next": { "href": next_href } },
            "_embedded": { "items": items }
        })
    }

    fn get(url: &str) -> RestRequest {
        RestRequest::new(
            Method::GET,
            Url::parse(url).unwrap(),
            Credential::Bearer(crate::models::auth::secret("token")),
        )
    }

    #[tokio::test]
    async fn test_single_item_is_yielded_once() {
        let stub = StubExchange::new(&[("https://cppm/api/endpoint/1", json!({ "id": 1 }))]);
        let mut reply = Reply::open(stub.clone(), get("https://cppm/api/endpoint/1")).await;

        assert!(reply.current().is_none());
        assert!(reply.advance().await);
        assert_eq!(reply.current(), Some(&json!({ "id": 1 })));
        assert_eq!(reply.current(), Some(&json!({ "id": 1 })));
        assert!(!reply.advance().await);
        assert!(reply.last_error().is_none());
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_next_equal_to_self_stops() {
        let url = "https://cppm/api/endpoint";
        let stub = StubExchange::new(&[(url, page(url, url, json!([{ "id": 1 }, { "id": 2 }])))]);
        let mut reply = Reply::open(stub.clone(), get(url)).await;

        assert!(reply.advance().await);
        assert!(reply.advance().await);
        assert_eq!(reply.current(), Some(&json!({ "id": 2 })));
        assert!(!reply.advance().await);
        assert!(!reply.advance().await);
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_follows_links_and_skips_empty_pages() {
        let p1 = "https://cppm/api/endpoint?offset=0";
        let p2 = "https://cppm/api/endpoint?offset=2";
        let p3 = "https://cppm/api/endpoint?offset=4";
        let stub = StubExchange::new(&[
            (p1, page(p1, p2, json!([{ "id": 1 }, { "id": 2 }]))),
            (p2, page(p2, p3, json!([]))),
            (p3, page(p3, p3, json!([{ "id": 3 }]))),
        ]);

        let items = Reply::open(stub.clone(), get(p1)).await.try_collect().await.unwrap();
        assert_eq!(items, vec![json!({ "id": 1 }), json!({ "id": 2 }), json!({ "id": 3 })]);
        assert_eq!(stub.calls(), 3);
        assert_eq!(*stub.seen.lock().unwrap(), vec![p1, p2, p3]);
    }

    #[tokio::test]
    async fn test_empty_first_page_follows_next() {
        let p1 = "https://cppm/api/guest?offset=0";
        let p2 = "https://cppm/api/guest?offset=25";
        let stub = StubExchange::new(&[
            (p1, page(p1, p2, json!([]))),
            (p2, page(p2, "", json!([{ "id": 7 }]))),
        ]);

        let mut reply = Reply::open(stub.clone(), get(p1)).await;
        assert!(reply.advance().await);
        assert_eq!(reply.current(), Some(&json!({ "id": 7 })));
        assert!(!reply.advance().await);
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let p1 = "https://cppm/api/endpoint?offset=0";
        let p2 = "https://cppm/api/endpoint?offset=1";
        // p2 is not served, so the stub answers 404.
        let stub = StubExchange::new(&[(p1, page(p1, p2, json!([{ "id": 1 }])))]);

        let mut reply = Reply::open(stub.clone(), get(p1)).await;
        assert!(reply.advance().await);
        assert!(!reply.advance().await);
        assert!(reply.last_error().is_some());
        assert!(!reply.advance().await);
        assert!(reply.last_error().is_some());
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_initial_exchange() {
        let stub = StubExchange::new(&[]);
        let mut reply = Reply::open(stub.clone(), get("https://cppm/api/missing")).await;
        assert!(!reply.advance().await);
        let err = reply.last_error().unwrap();
        assert_eq!(err.rest().and_then(|e| e.status), Some(StatusCode::NOT_FOUND));
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_close_stops_fetching() {
        let p1 = "https://cppm/api/endpoint?offset=0";
        let p2 = "https://cppm/api/endpoint?offset=1";
        let p3 = "https://cppm/api/endpoint?offset=2";
        let stub = StubExchange::new(&[
            (p1, page(p1, p2, json!([{ "id": 1 }]))),
            (p2, page(p2, p3, json!([{ "id": 2 }]))),
            (p3, page(p3, p3, json!([{ "id": 3 }]))),
        ]);

        let mut reply = Reply::open(stub.clone(), get(p1)).await;
        assert!(reply.advance().await);
        reply.close().await;

        // At most the single prefetched page went out.
        assert!(stub.calls() <= 2);
        assert!(!stub.seen.lock().unwrap().iter().any(|u| u == p3));
    }
}
