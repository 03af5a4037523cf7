//! The ClearPass web interface (`/tips`).
//!
//! Some operations, bulk export and import in particular, only exist in the
//! web interface. It is driven with a session cookie obtained through the
//! same handshake a browser goes through, including the DWR (Direct Web
//! Remoting) calls the login page makes.

mod session;
mod transfer;

use http::header::CONTENT_TYPE;
use reqwest::RequestBuilder;

pub use transfer::Export;

/// Servlet session cookie; its presence marks a logged-in web session.
pub(crate) const SESSION_COOKIE: &str = "JSESSIONID";
/// DWR script session cookie, set by the client itself during login.
pub(crate) const DWR_COOKIE: &str = "DWRSESSIONID";

const LOGIN_PAGE: &str = "tipsLogin.action";
const LOGIN_SUBMIT: &str = "tipsLoginSubmit.action";
const LOGIN_CHECK: &str = "tipsLoginCheck.action";
const CONTENT_PAGE: &str = "tipsContent.action";
const EXPORT_ACTION: &str = "tipsExport.action";
const IMPORT_PAGE: &str = "tipsImport.action";
const IMPORT_UPLOAD: &str = "tipsUploadImport.action";

const DWR_GENERATE_ID: &str = "dwr/call/plaincall/__System.generateId.dwr";
const DWR_PUBLISHER_URL: &str = "dwr/call/plaincall/beforeLogin.getPublisherUrl.dwr";
const DWR_DESTROY_SESSION: &str = "dwr/call/plaincall/login.destroySession.dwr";

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// One DWR plain call.
struct DwrCall<'a> {
    script: &'a str,
    method: &'a str,
    batch_id: u32,
    /// Page the call pretends to come from, e.g. `tipsLogin.action`.
    page: &'a str,
    script_session_id: &'a str,
    reverse_ajax: bool,
}

impl DwrCall<'_> {
    /// Shapes a POST carrying this call.
    fn request(&self) -> impl FnOnce(RequestBuilder) -> RequestBuilder {
        let body = self.body();
        move |request| request.header(CONTENT_TYPE, "text/plain").body(body)
    }

    /// Plain-text body of the call.
    fn body(&self) -> String {
        let mut body = String::from("callCount=1\n");
        if self.reverse_ajax {
            body.push_str("nextReverseAjaxIndex=0\n");
        }
        body.push_str(&format!(
            "c0-scriptName={}\nc0-methodName={}\nc0-id=0\nbatchId={}\ninstanceId=0\n",
            self.script, self.method, self.batch_id
        ));
        body.push_str(&format!(
            "page=%2Ftips%2F{}\nscriptSessionId={}\n",
            self.page, self.script_session_id
        ));
        body
    }
}

/// Extracts the generated id from a `__System.generateId` reply, which
/// looks like `dwr.engine.remote.handleCallback("0","0","<id>");`.
fn parse_generated_id(reply: &str) -> Option<String> {
    const MARKER: &str = "dwr.engine.remote.handleCallback(";
    let (_, call) = reply.split_once(MARKER)?;
    call.split('"')
        .nth(5)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Extracts the form token from the import page.
fn parse_form_token(page: &str) -> Option<&str> {
    const MARKER: &str = r#"name="token" value=""#;
    let (_, rest) = page.split_once(MARKER)?;
    let (token, _) = rest.split_once('"')?;
    Some(token)
}

/// Filename from a `Content-Disposition` header value.
///
/// Only the final path component is kept, so the name is always safe to
/// create relative to a download directory.
fn parse_filename(disposition: &str) -> Option<String> {
    if !disposition.contains("filename=") {
        return None;
    }
    let name = disposition
        .split("filename=")
        .last()?
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == ';')
        .trim();
    let name = name.rsplit(['/', '\\']).next()?.trim();
    match name {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}
