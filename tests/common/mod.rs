#![allow(dead_code)]

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cppm_client::{ClientCredentials, CppmClient};

pub const TOKEN: &str = "test-token";
pub const REFRESH: &str = "test-refresh";

/// A client pointed at the mock server, not logged in.
pub fn setup_test_client(mock_server_uri: &str) -> CppmClient {
    CppmClient::builder()
        .address(mock_server_uri)
        .build()
        .expect("Failed to build CppmClient")
}

/// A client pointed at the mock server, seeded with `TOKEN`.
pub fn setup_authenticated_client(mock_server_uri: &str) -> CppmClient {
    CppmClient::builder()
        .address(mock_server_uri)
        .token(TOKEN)
        .build()
        .expect("Failed to build CppmClient")
}

pub fn credentials() -> ClientCredentials {
    ClientCredentials::new("test-client").secret("test-secret")
}

/// Mounts a token endpoint answering with `TOKEN` and `REFRESH`.
pub async fn setup_oauth(mock_server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/oauth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": TOKEN,
            "refresh_token": REFRESH,
            "expires_in": 28800,
            "token_type": "Bearer",
            "scope": null
        })))
        .mount(mock_server)
        .await;
}

/// A HAL collection page.
pub fn hal_page(self_href: &str, next_href: Option<&str>, items: Value) -> Value {
    let mut links = json!({ "self": { "href": self_href } });
    if let Some(next) = next_href {
        links["next"] = json!({ "href": next });
    }
    json!({ "_links": links, "_embedded": { "items": items } })
}
