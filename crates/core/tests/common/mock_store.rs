use async_trait::async_trait;
use bytes::Bytes;
use frostvault_core::transport::{
    ARCHIVE_ID_HEADER, ARCHIVE_SIZE_HEADER, CONTENT_HASH_HEADER, CONTENT_RANGE,
    DESCRIPTION_HEADER, Method, PART_SIZE_HEADER, Request, Response, TREE_HASH_HEADER, Transport,
    UPLOAD_ID_HEADER,
};
use frostvault_core::{ContentRange, Digest, tree_hash_of};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

/// In-memory store speaking the vault upload protocol.
///
/// Validates hashes the way the real service does, records every request,
/// and can be scripted to fail or slow down specific operations.
#[allow(dead_code)]
pub struct MockGlacier {
    state: Mutex<State>,
    requests: Mutex<Vec<Request>>,
    scripted: Mutex<Vec<Scripted>>,
    part_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    list_page_size: usize,
}

struct Scripted {
    method: Method,
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
    delay: Option<Duration>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    uploads: HashMap<String, MockUpload>,
    archives: HashMap<String, Bytes>,
}

pub struct MockUpload {
    pub part_size: u64,
    pub description: Option<String>,
    /// Part bytes keyed by start offset.
    pub parts: BTreeMap<u64, Bytes>,
}

#[allow(dead_code)]
impl MockGlacier {
    pub fn new() -> Arc<Self> {
        Self::with_list_page_size(1000)
    }

    pub fn with_list_page_size(list_page_size: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            requests: Mutex::new(Vec::new()),
            scripted: Mutex::new(Vec::new()),
            part_delay: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            list_page_size,
        })
    }

    /// Answer the next request with `method` with `status` instead of handling it.
    pub fn fail_next(&self, method: Method, status: u16) {
        self.respond_next(method, status, Vec::new());
    }

    /// Answer the next request with `method` with a canned response.
    pub fn respond_next(&self, method: Method, status: u16, headers: Vec<(&str, &str)>) {
        self.scripted.lock().unwrap().push(Scripted {
            method,
            status,
            headers: headers
                .into_iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body: Bytes::from_static(b"{\"code\":\"Scripted\"}"),
            delay: None,
        });
    }

    /// Like [`respond_next`](Self::respond_next), holding the response back for `delay`.
    pub fn respond_next_after(
        &self,
        method: Method,
        status: u16,
        headers: Vec<(&str, &str)>,
        delay: Duration,
    ) {
        self.respond_next(method, status, headers);
        if let Some(last) = self.scripted.lock().unwrap().last_mut() {
            last.delay = Some(delay);
        }
    }

    /// Answer the next request with `method` with `status` and a JSON body.
    pub fn respond_next_json(&self, method: Method, status: u16, body: serde_json::Value) {
        self.scripted.lock().unwrap().push(Scripted {
            method,
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(body.to_string()),
            delay: None,
        });
    }

    /// Hold every part upload for `delay` before answering.
    pub fn set_part_delay(&self, delay: Duration) {
        *self.part_delay.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_with(&self, method: Method) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Create an upload directly, as if another process had initiated it.
    pub fn seed_upload(&self, part_size: u64) -> String {
        let mut state = self.state.lock().unwrap();
        let id = next_upload_id(&mut state);
        state.uploads.insert(
            id.clone(),
            MockUpload {
                part_size,
                description: None,
                parts: BTreeMap::new(),
            },
        );
        id
    }

    /// Store a part directly.
    pub fn seed_part(&self, upload_id: &str, start: u64, bytes: Bytes) {
        let mut state = self.state.lock().unwrap();
        state
            .uploads
            .get_mut(upload_id)
            .expect("seeded upload exists")
            .parts
            .insert(start, bytes);
    }

    pub fn upload_exists(&self, upload_id: &str) -> bool {
        self.state.lock().unwrap().uploads.contains_key(upload_id)
    }

    pub fn part_starts(&self, upload_id: &str) -> Vec<u64> {
        self.state
            .lock()
            .unwrap()
            .uploads
            .get(upload_id)
            .map(|u| u.parts.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn upload_description(&self, upload_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .uploads
            .get(upload_id)
            .and_then(|u| u.description.clone())
    }

    pub fn archive(&self, archive_id: &str) -> Option<Bytes> {
        self.state.lock().unwrap().archives.get(archive_id).cloned()
    }

    fn take_scripted(&self, method: Method) -> Option<Scripted> {
        let mut scripted = self.scripted.lock().unwrap();
        let pos = scripted.iter().position(|s| s.method == method)?;
        Some(scripted.remove(pos))
    }

    async fn handle(&self, request: &Request) -> Response {
        let segments: Vec<&str> = request.path.trim_start_matches('/').split('/').collect();
        match (request.method, segments.as_slice()) {
            (Method::Post, [_, "vaults", _, "archives"]) => self.upload_archive(request),
            (Method::Post, [_, "vaults", _, "multipart-uploads"]) => self.initiate(request),
            (Method::Get, [_, "vaults", _, "multipart-uploads"]) => self.list_uploads(request),
            (Method::Put, [_, "vaults", _, "multipart-uploads", id]) => {
                self.upload_part(id, request).await
            }
            (Method::Post, [_, "vaults", _, "multipart-uploads", id]) => {
                self.complete(id, request)
            }
            (Method::Delete, [_, "vaults", _, "multipart-uploads", id]) => self.abort(id),
            (Method::Get, [_, "vaults", _, "multipart-uploads", id]) => {
                self.list_parts(id, request)
            }
            _ => error(404, "UnknownPath"),
        }
    }

    fn upload_archive(&self, request: &Request) -> Response {
        if let Err(response) = check_hashes(request, &request.body) {
            return response;
        }
        let mut state = self.state.lock().unwrap();
        let id = next_archive_id(&mut state);
        state.archives.insert(id.clone(), request.body.clone());
        created(vec![(ARCHIVE_ID_HEADER, id)])
    }

    fn initiate(&self, request: &Request) -> Response {
        let Some(part_size) = request
            .header_value(PART_SIZE_HEADER)
            .and_then(|v| v.parse::<u64>().ok())
        else {
            return error(400, "MissingParameterValueException");
        };
        let mut state = self.state.lock().unwrap();
        let id = next_upload_id(&mut state);
        state.uploads.insert(
            id.clone(),
            MockUpload {
                part_size,
                description: request.header_value(DESCRIPTION_HEADER).map(str::to_string),
                parts: BTreeMap::new(),
            },
        );
        created(vec![(UPLOAD_ID_HEADER, id)])
    }

    async fn upload_part(&self, id: &str, request: &Request) -> Response {
        let Some(range) = request
            .header_value(CONTENT_RANGE)
            .and_then(|v| ContentRange::parse(v).ok())
        else {
            return error(400, "InvalidParameterValueException");
        };
        if range.length() != request.body.len() as u64 {
            return error(400, "InvalidParameterValueException");
        }
        if let Err(response) = check_hashes(request, &request.body) {
            return response;
        }
        {
            let state = self.state.lock().unwrap();
            let Some(upload) = state.uploads.get(id) else {
                return error(404, "ResourceNotFoundException");
            };
            if range.start % upload.part_size != 0 || range.length() > upload.part_size {
                return error(400, "InvalidParameterValueException");
            }
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let delay = *self.part_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        // Parts already in flight are still stored after an abort.
        if let Some(upload) = state.uploads.get_mut(id) {
            upload.parts.insert(range.start, request.body.clone());
        }
        Response::new(204, Vec::new(), Bytes::new())
    }

    fn complete(&self, id: &str, request: &Request) -> Response {
        let Some(size) = request
            .header_value(ARCHIVE_SIZE_HEADER)
            .and_then(|v| v.parse::<u64>().ok())
        else {
            return error(400, "MissingParameterValueException");
        };
        let Some(tree_hash) = request.header_value(TREE_HASH_HEADER) else {
            return error(400, "MissingParameterValueException");
        };

        let mut state = self.state.lock().unwrap();
        let Some(upload) = state.uploads.get(id) else {
            return error(404, "ResourceNotFoundException");
        };
        let mut assembled = Vec::with_capacity(size as usize);
        for (start, bytes) in &upload.parts {
            if *start != assembled.len() as u64 {
                return error(400, "InvalidParameterValueException");
            }
            assembled.extend_from_slice(bytes);
        }
        if assembled.len() as u64 != size || tree_hash_of(&assembled).to_hex() != tree_hash {
            return error(400, "InvalidParameterValueException");
        }

        state.uploads.remove(id);
        let archive_id = next_archive_id(&mut state);
        state
            .archives
            .insert(archive_id.clone(), Bytes::from(assembled));
        created(vec![(ARCHIVE_ID_HEADER, archive_id)])
    }

    fn abort(&self, id: &str) -> Response {
        let mut state = self.state.lock().unwrap();
        match state.uploads.remove(id) {
            Some(_) => Response::new(204, Vec::new(), Bytes::new()),
            None => error(404, "ResourceNotFoundException"),
        }
    }

    fn list_parts(&self, id: &str, request: &Request) -> Response {
        let state = self.state.lock().unwrap();
        let Some(upload) = state.uploads.get(id) else {
            return error(404, "ResourceNotFoundException");
        };
        let skip = marker(request);
        let parts: Vec<_> = upload.parts.iter().skip(skip).take(self.list_page_size).collect();
        let next = (skip + parts.len() < upload.parts.len()).then(|| (skip + parts.len()).to_string());
        let body = serde_json::json!({
            "ArchiveDescription": upload.description,
            "CreationDate": "2024-01-01T00:00:00.000Z",
            "Marker": next,
            "MultipartUploadId": id,
            "PartSizeInBytes": upload.part_size,
            "Parts": parts.iter().map(|(start, bytes)| serde_json::json!({
                "RangeInBytes": format!("{}-{}", start, *start + bytes.len() as u64 - 1),
                "SHA256TreeHash": tree_hash_of(bytes).to_hex(),
            })).collect::<Vec<_>>(),
            "VaultARN": "arn:aws:glacier:us-east-1:012345678901:vaults/test",
        });
        ok_json(body)
    }

    fn list_uploads(&self, request: &Request) -> Response {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<_> = state.uploads.keys().cloned().collect();
        ids.sort();
        let skip = marker(request);
        let page: Vec<_> = ids.iter().skip(skip).take(self.list_page_size).collect();
        let next = (skip + page.len() < ids.len()).then(|| (skip + page.len()).to_string());
        let body = serde_json::json!({
            "Marker": next,
            "UploadsList": page.iter().map(|id| serde_json::json!({
                "ArchiveDescription": state.uploads[*id].description,
                "CreationDate": "2024-01-01T00:00:00.000Z",
                "MultipartUploadId": id,
                "PartSizeInBytes": state.uploads[*id].part_size,
                "VaultARN": "arn:aws:glacier:us-east-1:012345678901:vaults/test",
            })).collect::<Vec<_>>(),
        });
        ok_json(body)
    }
}

#[async_trait]
impl Transport for MockGlacier {
    async fn send(&self, request: Request) -> frostvault_core::Result<Response> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(scripted) = self.take_scripted(request.method) {
            if let Some(delay) = scripted.delay {
                tokio::time::sleep(delay).await;
            }
            return Ok(Response::new(scripted.status, scripted.headers, scripted.body));
        }
        Ok(self.handle(&request).await)
    }
}

fn check_hashes(request: &Request, body: &[u8]) -> Result<(), Response> {
    let tree = request.header_value(TREE_HASH_HEADER);
    let content = request.header_value(CONTENT_HASH_HEADER);
    match (tree, content) {
        (Some(tree), Some(content))
            if tree == tree_hash_of(body).to_hex() && content == Digest::compute(body).to_hex() =>
        {
            Ok(())
        }
        _ => Err(error(400, "InvalidParameterValueException")),
    }
}

fn marker(request: &Request) -> usize {
    request
        .query
        .iter()
        .find(|(n, _)| n == "marker")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0)
}

fn next_upload_id(state: &mut State) -> String {
    state.next_id += 1;
    format!("upload-{:04}", state.next_id)
}

fn next_archive_id(state: &mut State) -> String {
    state.next_id += 1;
    format!("archive-{:0130}", state.next_id)
}

fn created(headers: Vec<(&str, String)>) -> Response {
    Response::new(
        201,
        headers
            .into_iter()
            .map(|(n, v)| (n.to_string(), v))
            .collect(),
        Bytes::new(),
    )
}

fn ok_json(body: serde_json::Value) -> Response {
    Response::new(
        200,
        vec![("content-type".to_string(), "application/json".to_string())],
        Bytes::from(body.to_string()),
    )
}

fn error(status: u16, code: &str) -> Response {
    Response::new(
        status,
        vec![("content-type".to_string(), "application/json".to_string())],
        Bytes::from(format!("{{\"code\":\"{code}\",\"type\":\"Client\"}}")),
    )
}
