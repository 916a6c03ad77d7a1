//! Signed HTTP transport built on reqwest.

use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use frostvault_core::GLACIER_API_VERSION;
use frostvault_core::transport::{Method, Request, Response, Transport};
use frostvault_signer::signer::{API_VERSION_HEADER, HOST_HEADER};
use frostvault_signer::{SigV4Signer, SignableRequest};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Url;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::{Duration, Instant};
use time::OffsetDateTime;

/// Query characters sent unencoded; matches what the signer leaves unencoded.
const QUERY_UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Service name used in the signing scope.
pub const SERVICE: &str = "glacier";

/// Public endpoint of `region`.
pub fn endpoint_for_region(region: &str) -> String {
    format!("https://glacier.{region}.amazonaws.com")
}

/// Sends engine requests over HTTPS, signing each one.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: Url,
    host: String,
    signer: SigV4Signer,
}

impl HttpTransport {
    pub fn new(endpoint: &str, signer: SigV4Signer, timeout: Duration) -> TransportResult<Self> {
        let invalid = |message: &str| TransportError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            message: message.to_string(),
        };
        let endpoint_url = Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(endpoint_url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        // Request paths are signed exactly as sent.
        if endpoint_url.path() != "/" {
            return Err(invalid("endpoint must not carry a path"));
        }
        if endpoint_url.query().is_some() || endpoint_url.fragment().is_some() {
            return Err(invalid("endpoint must not carry a query or fragment"));
        }
        let host = endpoint_url
            .host_str()
            .ok_or_else(|| invalid("missing host"))?;
        let host = match endpoint_url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("frostvault/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint_url,
            host,
            signer,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, request: &Request) -> TransportResult<Url> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        let mut url =
            Url::parse(&format!("{base}{}", request.path)).map_err(|e| {
                TransportError::InvalidEndpoint {
                    endpoint: base.to_string(),
                    message: e.to_string(),
                }
            })?;
        if !request.query.is_empty() {
            let query = request
                .query
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}={}",
                        utf8_percent_encode(k, QUERY_UNRESERVED),
                        utf8_percent_encode(v, QUERY_UNRESERVED)
                    )
                })
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&query));
        }
        Ok(url)
    }

    async fn send_signed(&self, request: Request) -> TransportResult<Response> {
        let url = self.url(&request)?;

        let mut headers = request.headers.clone();
        headers.push((HOST_HEADER.to_string(), self.host.clone()));
        headers.push((API_VERSION_HEADER.to_string(), GLACIER_API_VERSION.to_string()));
        let signable = SignableRequest {
            method: request.method.as_str(),
            path: &request.path,
            query: &request.query,
            headers: &headers,
            signed_headers: &request.signed_headers,
            body: &request.body,
        };
        let added = self.signer.sign(&signable, OffsetDateTime::now_utc())?;

        let mut header_map = HeaderMap::new();
        for (name, value) in headers.iter().chain(added.iter()) {
            if name.eq_ignore_ascii_case(HOST_HEADER) {
                continue;
            }
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| TransportError::InvalidHeader(name.clone()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| TransportError::InvalidHeader(name.clone()))?;
            header_map.insert(header_name, header_value);
        }

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let started = Instant::now();
        let response = self
            .http
            .request(method, url)
            .headers(header_map)
            .body(request.body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?;

        tracing::debug!(
            method = %request.method,
            path = %request.path,
            status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
        Ok(Response::new(status, headers, body))
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.signer.region())
            .finish()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> frostvault_core::Result<Response> {
        let method = request.method;
        let path = request.path.clone();
        self.send_signed(request).await.map_err(|err| {
            tracing::warn!(%method, %path, error = %err, "request failed before a response");
            frostvault_core::Error::from(err)
        })
    }
}
