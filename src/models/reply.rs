use serde::Deserialize;
use serde_json::Value;
use url::Url;

/// HAL link (`{"href": "..."}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HalLink {
    #[serde(default)]
    pub href: String,
}

/// Navigation links of a collection page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HalLinks {
    #[serde(rename = "self")]
    pub self_link: HalLink,
    pub first: HalLink,
    pub last: HalLink,
    pub prev: HalLink,
    pub next: HalLink,
}

impl HalLinks {
    /// The page to fetch after this one, resolved against `current`.
    ///
    /// `None` on the last page: either there is no `next` link, or it points
    /// back to `self`.
    pub fn next_url(&self, current: &Url) -> Option<Url> {
        let next = self.next.href.trim();
        if next.is_empty() || next == self.self_link.href.trim() {
            return None;
        }
        current.join(next).ok()
    }
}

#[derive(Deserialize)]
struct EmbeddedItems {
    items: Vec<Value>,
}

#[derive(Deserialize)]
struct WrappedReply {
    #[serde(rename = "_embedded")]
    embedded: EmbeddedItems,
    #[serde(rename = "_links", default)]
    links: HalLinks,
}

/// One reply from the API: either a plain resource or a page of a
/// collection.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyPage {
    SingleItem(Value),
    CollectionPage { items: Vec<Value>, links: HalLinks },
}

impl ReplyPage {
    /// Classifies a reply body. Anything that does not carry an
    /// `_embedded.items` list is a single item.
    pub fn parse(body: Value) -> Self {
        match WrappedReply::deserialize(&body) {
            Ok(wrapped) => ReplyPage::CollectionPage {
                items: wrapped.embedded.items,
                links: wrapped.links,
            },
            Err(_) => ReplyPage::SingleItem(body),
        }
    }
}
