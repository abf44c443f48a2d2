use bytes::{Bytes, BytesMut};
use http_body_util::{BodyExt, Empty};
use hyper::{Method, StatusCode, Uri};
#[cfg(not(feature = "rustls-platform-verifier"))]
use hyper_rustls::ConfigBuilderExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use once_cell::sync::Lazy;
#[cfg(feature = "rustls-platform-verifier")]
use rustls_platform_verifier::BuilderVerifierExt;
use std::{collections::HashMap, fmt};

type HttpError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
pub struct ResponseData {
    pub status: u16,
    pub body: Option<Bytes>,
}

impl fmt::Display for ResponseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Response status: {}, body: {} bytes",
            self.status,
            self.body.as_ref().map_or(0, |body| body.len()),
        )
    }
}

/// Progress observer for streaming downloads: (received_bytes, total_bytes).
/// Lifetime-parameterized so callers can pass borrowing closures.
pub type ProgressFn<'a> = dyn Fn(u64, Option<u64>) + Send + Sync + 'a;

/// GET a URL and buffer the full response body.
pub async fn fetch(url: Uri, header_map: &HashMap<String, String>) -> Result<ResponseData, HttpError> {
    request(Method::GET, url, header_map, false, None).await
}

/// GET a URL, reporting progress per received frame.
pub async fn fetch_with_progress(
    url: Uri,
    header_map: &HashMap<String, String>,
    progress: &ProgressFn<'_>,
) -> Result<ResponseData, HttpError> {
    request(Method::GET, url, header_map, false, Some(progress)).await
}

/// HEAD a URL; only the status is populated.
pub async fn fetch_head(
    url: Uri,
    header_map: &HashMap<String, String>,
) -> Result<ResponseData, HttpError> {
    request(Method::HEAD, url, header_map, true, None).await
}

static PROVIDER: Lazy<std::sync::Arc<rustls::crypto::CryptoProvider>> =
    Lazy::new(|| std::sync::Arc::new(rustls::crypto::ring::default_provider()));

fn tls_connector() -> Result<hyper_rustls::HttpsConnector<HttpConnector>, HttpError> {
    let provider = PROVIDER.clone();
    let tls: rustls::ClientConfig;
    #[cfg(feature = "rustls-platform-verifier")]
    {
        tls = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_platform_verifier()?
            .with_no_client_auth();
    }
    #[cfg(all(feature = "webpki-roots", not(feature = "rustls-platform-verifier")))]
    {
        tls = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_webpki_roots()
            .with_no_client_auth();
    }
    #[cfg(all(
        feature = "native-tokio",
        not(feature = "webpki-roots"),
        not(feature = "rustls-platform-verifier")
    ))]
    {
        tls = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_native_roots()?
            .with_no_client_auth();
    }
    #[cfg(all(
        not(feature = "native-tokio"),
        not(feature = "webpki-roots"),
        not(feature = "rustls-platform-verifier")
    ))]
    {
        compile_error!("No TLS backend enabled");
    }

    // https_or_http lets a single connector serve both schemes, so plain
    // http test servers work with the same client.
    Ok(hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build())
}

async fn request(
    method: Method,
    url: Uri,
    header_map: &HashMap<String, String>,
    only_status: bool,
    progress: Option<&ProgressFn<'_>>,
) -> Result<ResponseData, HttpError> {
    let connector = tls_connector()?;
    let client = Client::builder(TokioExecutor::new()).build(connector);

    let mut req = hyper::Request::builder().method(method).uri(url.clone());
    for (key, value) in header_map {
        req = req.header(key, value);
    }
    let req = req.body(Empty::<Bytes>::new())?;

    tracing::debug!(%url, "sending request");
    let mut res = client.request(req).await?;
    let status = res.status();
    if only_status {
        return Ok(ResponseData {
            status: status.as_u16(),
            body: None,
        });
    }

    let total = res
        .headers()
        .get(hyper::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut body = BytesMut::new();
    while let Some(next) = res.frame().await {
        let frame = next?;
        if let Some(chunk) = frame.data_ref() {
            body.extend_from_slice(chunk);
            if let Some(progress) = progress {
                progress(body.len() as u64, total);
            }
        }
    }
    Ok(ResponseData {
        status: status.as_u16(),
        body: Some(body.freeze()),
    })
}

pub fn http_status_is_ok(status: u16) -> bool {
    if let Ok(status) = StatusCode::from_u16(status) {
        !(status.is_client_error() || status.is_server_error())
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_is_ok() {
        assert!(http_status_is_ok(200));
        assert!(http_status_is_ok(304));
        assert!(!http_status_is_ok(404));
        assert!(!http_status_is_ok(500));
        assert!(!http_status_is_ok(1000));
    }

    #[tokio::test]
    async fn test_https_fetch() {
        let url = "https://example.com".parse().unwrap();
        let result = fetch(url, &HashMap::new()).await;
        assert!(result.is_ok());
        assert!(!result.unwrap().body.unwrap().is_empty());
    }
}
