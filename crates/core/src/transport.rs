//! The request/response seam between the upload engine and the network.
//!
//! The engine never talks to the network itself. It builds [`Request`]s with
//! the exact headers the store expects and hands them to a [`Transport`],
//! which is responsible for TLS, request signing and timeouts.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Header carrying the hex tree hash of the request body.
pub const TREE_HASH_HEADER: &str = "x-amz-sha256-tree-hash";
/// Header carrying the hex flat SHA-256 of the request body.
pub const CONTENT_HASH_HEADER: &str = "x-amz-content-sha256";
/// Header carrying the multipart part size on initiate.
pub const PART_SIZE_HEADER: &str = "x-amz-part-size";
/// Header carrying the total archive size on complete.
pub const ARCHIVE_SIZE_HEADER: &str = "x-amz-archive-size";
/// Header carrying the optional archive description.
pub const DESCRIPTION_HEADER: &str = "x-amz-archive-description";
/// Response header carrying the assigned archive id.
pub const ARCHIVE_ID_HEADER: &str = "x-amz-archive-id";
/// Response header carrying the multipart upload id.
pub const UPLOAD_ID_HEADER: &str = "x-amz-multipart-upload-id";

pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_RANGE: &str = "Content-Range";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Status codes the store answers with on success.
pub mod status {
    pub const OK: u16 = 200;
    pub const CREATED: u16 = 201;
    pub const NO_CONTENT: u16 = 204;
}

/// HTTP method of a store request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request ready to be signed and sent.
#[derive(Clone)]
pub struct Request {
    pub method: Method,
    /// Absolute path, e.g. `/-/vaults/photos/multipart-uploads`.
    pub path: String,
    /// Query parameters in insertion order.
    pub query: Vec<(String, String)>,
    /// Headers in insertion order. Names keep the casing they were added with.
    pub headers: Vec<(String, String)>,
    /// Extra header names the signer must include in the signature.
    pub signed_headers: Vec<String>,
    pub body: Bytes,
}

impl Request {
    /// Create a request with no headers and an empty body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            signed_headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Append a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append a header and mark it as signed.
    pub fn signed_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.signed_headers.push(name.clone());
        self.headers.push((name, value.into()));
        self
    }

    /// Append a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Look up a header value by case-insensitive name.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("signed_headers", &self.signed_headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// A response as returned by the transport.
#[derive(Clone, Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Look up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The body as text, lossily decoded.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Sends requests to the store.
///
/// Implementations own TLS, signing and timeouts. A transport failure (no
/// response received) is reported as an error; any response, whatever its
/// status, is returned as `Ok` and validated by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> crate::Result<Response>;
}
