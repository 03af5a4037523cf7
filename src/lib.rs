//! # cppm-client
//!
//! An async client for Aruba ClearPass Policy Manager (CPPM).
//!
//! ClearPass exposes two surfaces, and this crate speaks both:
//!
//! - the REST API under `/api`, authenticated with OAuth2 bearer tokens
//!   ([`CppmClient::login`], [`CppmClient::validate`]);
//! - the web interface under `/tips`, authenticated with a cookie session
//!   ([`CppmClient::web_login`]), which is needed for bulk
//!   [`export`](CppmClient::export) and [`import`](CppmClient::import).
//!
//! Collection replies are paginated; [`Reply`] walks every page lazily.
//! Filters on MAC address fields are rewritten to the notation each
//! resource uses, see [`Filter`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use cppm_client::{ClientCredentials, CppmClient, Filter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CppmClient::builder()
//!         .address("cppm.example.com")
//!         .build()?;
//!
//!     let credentials = ClientCredentials::new("api-client").secret("s3cr3t");
//!     client.login(&credentials).await?;
//!
//!     let mut endpoints = client
//!         .request(http::Method::GET, "endpoint")
//!         .filter(Filter::new().equals("mac_address", "86:DF:11:22:33:44"))
//!         .send()
//!         .await;
//!     while endpoints.advance().await {
//!         println!("{}", endpoints.current().unwrap());
//!     }
//!     if let Some(err) = endpoints.last_error() {
//!         eprintln!("{err}");
//!     }
//!
//!     Ok(())
//! }
//! ```

mod api;
mod client;
mod error;
mod filter;
mod mac;
mod models;
mod pagination;
mod transport;
mod web;

pub use api::endpoint::{EndpointHandler, ListEndpointsBuilder};
pub use api::guest::{GuestHandler, ListGuestsBuilder};
pub use api::request::ApiRequestBuilder;
pub use client::{CppmClient, CppmClientBuilder};
pub use error::{CppmError, CppmResult, ErrorKind, RestCause, RestError};
pub use filter::Filter;
pub use mac::MacAddress;
pub use models::auth::{ClientCredentials, GrantType, TokenReply, TokenRequest, Tokens};
pub use models::cookie::WebCookie;
pub use models::reply::{HalLink, HalLinks, ReplyPage};
pub use pagination::Reply;
pub use transport::{Credential, Exchange, RawResponse, RestRequest};
pub use web::Export;
