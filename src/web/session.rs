use http::header::{ACCEPT, REFERER};
use http::{Method, StatusCode};
use log::{debug, info};

use super::{
    parse_generated_id, DwrCall, CONTENT_PAGE, DWR_COOKIE, DWR_DESTROY_SESSION, DWR_GENERATE_ID,
    DWR_PUBLISHER_URL, HTML_ACCEPT, LOGIN_CHECK, LOGIN_PAGE, LOGIN_SUBMIT, SESSION_COOKIE,
};
use crate::models::cookie::WebCookie;
use crate::{CppmClient, CppmError, CppmResult, RestCause};

impl CppmClient {
    /// Logs into the web interface and returns the session cookies.
    ///
    /// The cookie jar is emptied first, then the browser handshake is
    /// replayed: load the login page, obtain a DWR script session id,
    /// register it, submit the credentials and finally check the session
    /// with [`web_validate`](Self::web_validate). Any step answering with
    /// an unexpected status aborts the login without running later steps.
    pub async fn web_login(&self, username: &str, password: &str) -> CppmResult<Vec<WebCookie>> {
        let _guard = self.web_lock().lock().await;
        let transport = self.transport();
        transport.cookies().reset();

        let login_page = self.web_endpoint(LOGIN_PAGE)?;
        transport
            .send(Method::GET, login_page, |request| request)
            .await?
            .expect_status(StatusCode::OK, "login page")?;

        let generate_id = DwrCall {
            script: "__System",
            method: "generateId",
            batch_id: 0,
            page: LOGIN_PAGE,
            script_session_id: "",
            reverse_ajax: false,
        };
        let reply = transport
            .send(Method::POST, self.web_endpoint(DWR_GENERATE_ID)?, generate_id.request())
            .await?
            .expect_status(StatusCode::OK, "script session id")?;
        let Some(script_session_id) = parse_generated_id(&reply.text()) else {
            return Err(reply
                .into_error(RestCause::Handshake("no script session id in reply".into()))
                .into());
        };
        transport
            .cookies()
            .add(&WebCookie::new(DWR_COOKIE, script_session_id.as_str()), self.web_url());

        let publisher_url = DwrCall {
            script: "beforeLogin",
            method: "getPublisherUrl",
            batch_id: 1,
            page: LOGIN_PAGE,
            script_session_id: &script_session_id,
            reverse_ajax: true,
        };
        transport
            .send(Method::POST, self.web_endpoint(DWR_PUBLISHER_URL)?, publisher_url.request())
            .await?
            .expect_status(StatusCode::OK, "publisher url")?;

        let reply = transport
            .send(Method::POST, self.web_endpoint(LOGIN_SUBMIT)?, |request| {
                request.form(&[
                    ("F_password", "0"),
                    ("username", username),
                    ("password", password),
                ])
            })
            .await?;
        let status = reply.status();
        if !status.is_success() && !status.is_redirection() {
            let message = format!("credential submit: unexpected status {status}");
            return Err(reply.into_error(RestCause::Handshake(message)).into());
        }

        let cookies = self.check_web_session().await?;
        info!("web session established for {username}");
        Ok(cookies)
    }

    /// Checks that the cookie jar holds a live web session and returns its
    /// cookies.
    ///
    /// Fails with an error for which
    /// [`CppmError::is_not_authenticated`] is `true` when the session has
    /// expired, so callers know to run [`web_login`](Self::web_login).
    pub async fn web_validate(&self) -> CppmResult<Vec<WebCookie>> {
        let _guard = self.web_lock().lock().await;
        self.check_web_session().await
    }

    async fn check_web_session(&self) -> CppmResult<Vec<WebCookie>> {
        let transport = self.transport();
        let referer = self.web_endpoint(LOGIN_PAGE)?;
        let reply = transport
            .send(Method::GET, self.web_endpoint(CONTENT_PAGE)?, |request| {
                request
                    .header(REFERER, referer.as_str())
                    .header(ACCEPT, HTML_ACCEPT)
                    .header("Upgrade-Insecure-Requests", "1")
            })
            .await?;

        let cookies = transport.cookies().list(self.web_url());
        let has_session = cookies.iter().any(|c| c.name == SESSION_COOKIE);
        if reply.status() != StatusCode::OK || cookies.len() < 2 || !has_session {
            debug!(
                "web session check failed: status {}, {} cookies",
                reply.status(),
                cookies.len()
            );
            return Err(reply.into_error(RestCause::NotAuthenticated).into());
        }
        Ok(cookies)
    }

    /// Ends the web session.
    ///
    /// Best effort: the appliance does not always answer as expected, in
    /// which case an error is returned even though the session may be gone.
    pub async fn web_logout(&self) -> CppmResult<()> {
        let _guard = self.web_lock().lock().await;
        let transport = self.transport();

        let Some(dwr) = transport
            .cookies()
            .list(self.web_url())
            .into_iter()
            .find(|c| c.name == DWR_COOKIE)
        else {
            return Err(CppmError::AuthenticationError(format!(
                "no {DWR_COOKIE} cookie, not logged into the web interface"
            )));
        };

        let destroy = DwrCall {
            script: "login",
            method: "destroySession",
            batch_id: 1,
            page: CONTENT_PAGE,
            script_session_id: &dwr.value,
            reverse_ajax: true,
        };
        transport
            .send(Method::POST, self.web_endpoint(DWR_DESTROY_SESSION)?, destroy.request())
            .await?
            .expect_status(StatusCode::OK, "destroy session")?;

        transport
            .send(Method::GET, self.web_endpoint(LOGIN_CHECK)?, |request| request)
            .await?
            .expect_status(StatusCode::FOUND, "login check")?;
        debug!("web session closed");
        Ok(())
    }
}
