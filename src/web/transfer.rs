use std::fmt;
use std::path::Path;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_DISPOSITION, REFERER};
use http::{Method, StatusCode};
use log::{debug, info};
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{
    parse_filename, parse_form_token, CONTENT_PAGE, EXPORT_ACTION, HTML_ACCEPT, IMPORT_PAGE,
    IMPORT_UPLOAD,
};
use crate::transport::{status_cause, RawResponse, RequestContext};
use crate::{CppmClient, CppmError, CppmResult, RestCause};

/// A running export download.
///
/// The body is not buffered: read it with [`chunk`](Self::chunk), or
/// stream it somewhere with [`copy_to`](Self::copy_to).
pub struct Export {
    filename: String,
    context: RequestContext,
    response: Response,
}

impl Export {
    /// Filename suggested by the appliance.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Next piece of the body, `None` at the end.
    pub async fn chunk(&mut self) -> CppmResult<Option<Bytes>> {
        match self.response.chunk().await {
            Ok(chunk) => Ok(chunk),
            Err(e) => Err(self.context.clone().error(e).into()),
        }
    }

    /// Streams the rest of the body into `writer` and returns the number of
    /// bytes written.
    pub async fn copy_to<W>(&mut self, writer: &mut W) -> CppmResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0u64;
        while let Some(chunk) = self.chunk().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }

    /// Reads the rest of the body into memory.
    pub async fn bytes(mut self) -> CppmResult<Vec<u8>> {
        let mut body = Vec::new();
        self.copy_to(&mut body).await?;
        Ok(body)
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Export")
            .field("filename", &self.filename)
            .field("url", &self.context.url)
            .finish()
    }
}

impl CppmClient {
    /// Exports all items of a resource type (e.g. `Endpoint`, `GuestUser`)
    /// through the web interface. An empty `password` leaves the export
    /// unencrypted.
    ///
    /// Needs a web session, see [`web_login`](Self::web_login).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # async fn example(client: &cppm_client::CppmClient) -> cppm_client::CppmResult<()> {
    /// let mut export = client.export("Endpoint", "").await?;
    /// let mut file = tokio::fs::File::create(export.filename()).await?;
    /// let size = export.copy_to(&mut file).await?;
    /// println!("wrote {size} bytes to {}", export.filename());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn export(&self, resource: &str, password: &str) -> CppmResult<Export> {
        let (context, response) = self
            .transport()
            .send_streaming(Method::POST, self.web_endpoint(EXPORT_ACTION)?, |request| {
                // Field name as the appliance spells it.
                request.form(&[("type", resource), ("encyptionPassword", password)])
            })
            .await?;

        let status = response.status();
        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let filename = disposition.as_deref().and_then(parse_filename);

        let cause = match (status, filename) {
            (StatusCode::OK, Some(filename)) => {
                info!("exporting {resource} to {filename}");
                return Ok(Export {
                    filename,
                    context,
                    response,
                });
            }
            (StatusCode::OK, None) => RestCause::Malformed(format!(
                "export reply has no usable Content-Disposition header: {:?}",
                disposition.unwrap_or_default()
            )),
            (status, _) => status_cause(status),
        };
        Err(RawResponse::read(context, response).await?.into_error(cause).into())
    }

    /// Imports a previously exported file through the web interface.
    ///
    /// The upload form is loaded first for its anti-forgery token; the file
    /// is only read once that succeeded. Needs a web session.
    pub async fn import(
        &self,
        file: impl AsRef<Path>,
        resource: &str,
        password: &str,
    ) -> CppmResult<()> {
        let file = file.as_ref();
        let transport = self.transport();
        let referer = self.web_endpoint(CONTENT_PAGE)?;

        let page = transport
            .send(Method::GET, self.web_endpoint(IMPORT_PAGE)?, |request| {
                request
                    .header(ACCEPT, HTML_ACCEPT)
                    .header(REFERER, referer.as_str())
            })
            .await?
            .error_for_status()?;
        let text = page.text();
        let Some(token) = parse_form_token(&text) else {
            return Err(page
                .into_error(RestCause::Malformed("no form token on the import page".into()))
                .into());
        };
        debug!("import form token acquired");

        let contents = tokio::fs::read(file).await?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                CppmError::ConfigurationError(format!("not a file: {}", file.display()))
            })?;

        let mut form = Form::new()
            .text("struts.token.name", "token")
            .text("token", token.to_string())
            .text("type", resource.to_string());
        if !password.is_empty() {
            form = form.text("password", password.to_string());
        }
        form = form.part("upload", Part::bytes(contents).file_name(file_name));

        transport
            .send(Method::POST, self.web_endpoint(IMPORT_UPLOAD)?, |request| {
                request.multipart(form)
            })
            .await?
            .require_status(StatusCode::OK)?;
        info!("imported {} as {resource}", file.display());
        Ok(())
    }
}
