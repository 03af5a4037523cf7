use serde::{Deserialize, Serialize};

/// A web session cookie in its persisted form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebCookie {
    pub name: String,
    pub value: String,
}

impl WebCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        WebCookie {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Splits a `Cookie` request header (`a=1; b=2`) into cookies.
    pub(crate) fn parse_header(header: &str) -> Vec<WebCookie> {
        header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                (!name.is_empty()).then(|| WebCookie::new(name, value))
            })
            .collect()
    }
}
