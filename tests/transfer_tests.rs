use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

use common::setup_test_client;
use cppm_client::{CppmClient, CppmError, ErrorKind};

const IMPORT_PAGE: &str = r#"<html><form action="tipsUploadImport.action" method="post">
<input type="hidden" name="struts.token.name" value="token"/>
<input type="hidden" name="token" value="T0K3N-42"/>
</form></html>"#;

#[tokio::test]
async fn test_export_streams_the_body() -> Result<(), CppmError> {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tips/tipsExport.action"))
        .and(body_string_contains("type=Endpoint"))
        .and(body_string_contains("encyptionPassword=s3cr3t"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-disposition", r#"attachment; filename="Endpoint.zip""#)
                .set_body_bytes(b"PK\x03\x04export-data".to_vec()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = setup_test_client(&mock_server.uri());
    let export = client.export("Endpoint", "s3cr3t").await?;

    assert_eq!(export.filename(), "Endpoint.zip");
    assert_eq!(export.bytes().await?, b"PK\x03\x04export-data".to_vec());
    Ok(())
}

#[tokio::test]
async fn test_export_copy_to_file() -> Result<(), CppmError> {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tips/tipsExport.action"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-disposition", "attachment; filename=GuestUser.xml")
                .set_body_string("<guests/>"),
        )
        .mount(&mock_server)
        .await;

    let client = setup_test_client(&mock_server.uri());
    let mut export = client.export("GuestUser", "").await?;

    let dir = tempfile::tempdir()?;
    let target = dir.path().join(export.filename());
    let mut file = tokio::fs::File::create(&target).await?;
    let written = export.copy_to(&mut file).await?;
    drop(file);

    let mut contents = String::new();
    tokio::fs::File::open(&target).await?.read_to_string(&mut contents).await?;
    assert_eq!(written, 9);
    assert_eq!(contents, "<guests/>");
    Ok(())
}

#[tokio::test]
async fn test_export_without_filename() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tips/tipsExport.action"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>session expired</html>"))
        .mount(&mock_server)
        .await;

    let client = setup_test_client(&mock_server.uri());
    let err = client.export("Endpoint", "").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    assert!(err.to_string().contains("session expired"));
}

#[tokio::test]
async fn test_export_error_status() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tips/tipsExport.action"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let client = setup_test_client(&mock_server.uri());
    let err = client.export("Endpoint", "").await.unwrap_err();

    assert_eq!(err.rest().and_then(|e| e.status).map(|s| s.as_u16()), Some(500));
}

#[tokio::test]
async fn test_export_forbidden_is_not_authenticated() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tips/tipsExport.action"))
        .respond_with(ResponseTemplate::new(403).set_body_string("<html>denied</html>"))
        .mount(&mock_server)
        .await;

    let client = setup_test_client(&mock_server.uri());
    let err = client.export("Endpoint", "").await.unwrap_err();

    assert!(err.is_not_authenticated());
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(err.rest().and_then(|e| e.status).map(|s| s.as_u16()), Some(403));
}

/// Serves one export whose body trickles in over about a second.
async fn serve_slow_export(listener: TcpListener, chunks: usize) -> std::io::Result<()> {
    let (mut socket, _) = listener.accept().await?;

    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    let header_end = loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..n]);
        if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&request[..header_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while request.len() < header_end + content_length {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
    }

    socket
        .write_all(
            b"HTTP/1.1 200 OK\r\n\
              Content-Type: application/octet-stream\r\n\
              Content-Disposition: attachment; filename=\"slow.zip\"\r\n\
              Transfer-Encoding: chunked\r\n\
              Connection: close\r\n\r\n",
        )
        .await?;
    for _ in 0..chunks {
        tokio::time::sleep(Duration::from_millis(100)).await;
        socket.write_all(b"8\r\nslowdata\r\n").await?;
        socket.flush().await?;
    }
    socket.write_all(b"0\r\n\r\n").await?;
    socket.flush().await
}

#[tokio::test]
async fn test_export_outlives_the_request_timeout() -> Result<(), CppmError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = format!("http://{}", listener.local_addr()?);
    let server = tokio::spawn(serve_slow_export(listener, 10));

    // Every gap between chunks is well under the timeout, the whole
    // download is well over it.
    let client = CppmClient::builder()
        .address(address)
        .timeout(Duration::from_millis(400))
        .build()?;
    let export = client.export("Endpoint", "").await?;

    assert_eq!(export.filename(), "slow.zip");
    assert_eq!(export.bytes().await?, b"slowdata".repeat(10));
    server.await.unwrap()?;
    Ok(())
}

#[tokio::test]
async fn test_import_uploads_with_form_token() -> Result<(), CppmError> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tips/tipsImport.action"))
        .respond_with(ResponseTemplate::new(200).set_body_string(IMPORT_PAGE))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tips/tipsUploadImport.action"))
        .and(body_string_contains("T0K3N-42"))
        .and(body_string_contains(r#"name="struts.token.name""#))
        .and(body_string_contains(r#"name="type""#))
        .and(body_string_contains(r#"filename="endpoints.zip""#))
        .and(body_string_contains("zip-payload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir()?;
    let file = dir.path().join("endpoints.zip");
    tokio::fs::write(&file, "zip-payload").await?;

    let client = setup_test_client(&mock_server.uri());
    client.import(&file, "Endpoint", "").await?;

    let requests = mock_server.received_requests().await.unwrap();
    let upload = String::from_utf8_lossy(&requests[1].body).into_owned();
    assert!(!upload.contains(r#"name="password""#));
    Ok(())
}

#[tokio::test]
async fn test_import_without_form_token() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tips/tipsImport.action"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>no form</html>"))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tips/tipsUploadImport.action"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = setup_test_client(&mock_server.uri());
    // The file is never opened when the token is missing.
    let err = client
        .import("/nonexistent/endpoints.zip", "Endpoint", "")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
}

#[tokio::test]
async fn test_import_missing_file() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tips/tipsImport.action"))
        .respond_with(ResponseTemplate::new(200).set_body_string(IMPORT_PAGE))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tips/tipsUploadImport.action"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = setup_test_client(&mock_server.uri());
    let err = client
        .import("/nonexistent/endpoints.zip", "Endpoint", "pw")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Io);
}

#[tokio::test]
async fn test_import_upload_unauthorized_is_not_authenticated() -> Result<(), CppmError> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tips/tipsImport.action"))
        .respond_with(ResponseTemplate::new(200).set_body_string(IMPORT_PAGE))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tips/tipsUploadImport.action"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir()?;
    let file = dir.path().join("endpoints.zip");
    tokio::fs::write(&file, "zip-payload").await?;

    let client = setup_test_client(&mock_server.uri());
    let err = client.import(&file, "Endpoint", "").await.unwrap_err();

    assert!(err.is_not_authenticated());
    assert_eq!(err.rest().and_then(|e| e.status).map(|s| s.as_u16()), Some(401));
    Ok(())
}
