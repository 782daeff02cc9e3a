#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use httpmock::prelude::*;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

pub const ORGANIZER: &str = "demo";
pub const EVENT: &str = "summer";
pub const TOKEN: &str = "secret-token";
pub const DAV_USER: &str = "sync";
pub const DAV_PASSWORD: &str = "dav-password";

pub fn event_path(suffix: &str) -> String {
    format!("/api/v1/organizers/{}/events/{}/{}", ORGANIZER, EVENT, suffix)
}

pub fn position(id: u64, item: u64, given: &str, family: &str, town: &str) -> Value {
    json!({
        "id": id,
        "item": item,
        "price": "25.00",
        "attendee_name_parts": { "given_name": given, "family_name": family },
        "answers": [
            { "question": 7, "question_identifier": "town", "answer": town, "options": [] }
        ],
        "canceled": false
    })
}

pub fn order(code: &str, status: &str, positions: Vec<Value>) -> Value {
    json!({
        "code": code,
        "status": status,
        "email": format!("{}@example.com", code.to_lowercase()),
        "datetime": "2025-03-01T09:30:00Z",
        "positions": positions
    })
}

/// Question catalogue: a town choice and a diet question nobody answers.
pub async fn mock_questions(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET).path(event_path("questions/"));
            then.status(200).json_body(json!({
                "count": 2,
                "next": null,
                "previous": null,
                "results": [
                    {
                        "id": 7,
                        "identifier": "town",
                        "question": { "de": "Ortschaft", "en": "Town" },
                        "position": 1,
                        "options": [
                            { "position": 2, "answer": { "de": "Berg" } },
                            { "position": 1, "answer": { "de": "Aach" } },
                            { "position": 3, "answer": { "de": "Zell" } }
                        ]
                    },
                    {
                        "id": 8,
                        "identifier": null,
                        "question": { "de": "Ernährung" },
                        "position": 2,
                        "options": []
                    }
                ]
            }));
        })
        .await;
}

/// Three orders over two pages: paid (two positions), pending, canceled.
pub async fn mock_event(server: &MockServer) {
    mock_questions(server).await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(event_path("items/"))
                .header("Authorization", format!("Token {}", TOKEN));
            then.status(200).json_body(json!({
                "count": 2,
                "next": null,
                "previous": null,
                "results": [
                    { "id": 10, "name": { "de": "Teilnehmer", "en": "Participant" } },
                    { "id": 11, "name": { "en": "Staff" } }
                ]
            }));
        })
        .await;

    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(event_path("orders/"))
                .header("Authorization", format!("Token {}", TOKEN));
            then.status(200).json_body(json!({
                "count": 3,
                "next": server.url(event_path("orders-page-2/")),
                "previous": null,
                "results": [
                    order("A1", "p", vec![
                        position(1, 10, "Anna", "Berg", "Aach"),
                        position(2, 11, "Ben", "Berg", "Aach"),
                    ]),
                    order("B2", "n", vec![position(3, 10, "Clara", "Zeller", "Berg")]),
                ]
            }));
        })
        .await;

    server
        .mock_async(|when, then| {
            when.method(GET).path(event_path("orders-page-2/"));
            then.status(200).json_body(json!({
                "count": 3,
                "next": null,
                "previous": server.url(event_path("orders/")),
                "results": [
                    order("C3", "c", vec![position(4, 10, "Dora", "Alt", "Berg")]),
                ]
            }));
        })
        .await;
}

/// Reads one part of an `.xlsx` package.
pub fn xlsx_part(bytes: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut file = archive.by_name(name).unwrap();
    let mut content = String::new();
    file.read_to_string(&mut content).unwrap();
    content
}

pub fn sheet_xml(bytes: &[u8]) -> String {
    xlsx_part(bytes, "xl/worksheets/sheet1.xml")
}

/// In-memory WebDAV collection tree with Nextcloud status codes.
#[derive(Debug, Default)]
pub struct FakeDav {
    pub dirs: BTreeSet<String>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub log: Vec<String>,
    pub fail_puts_with: Option<StatusCode>,
}

impl FakeDav {
    fn parent_exists(&self, path: &str) -> bool {
        match path.rsplit_once('/') {
            Some((parent, _)) => self.dirs.contains(parent),
            None => true,
        }
    }
}

pub type SharedDav = Arc<Mutex<FakeDav>>;

const DAV_PREFIX: &str = "/remote.php/dav/files/sync/";

fn relative(path: &str) -> Option<String> {
    path.strip_prefix(DAV_PREFIX)
        .map(|p| p.trim_end_matches('/').to_string())
}

async fn handle(
    State(dav): State<SharedDav>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let expected_auth = format!(
        "Basic {}",
        base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            format!("{}:{}", DAV_USER, DAV_PASSWORD)
        )
    );
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some(expected_auth.as_str())
    {
        return StatusCode::UNAUTHORIZED;
    }
    let Some(path) = relative(uri.path()) else {
        return StatusCode::NOT_FOUND;
    };

    let mut dav = dav.lock().unwrap();
    dav.log.push(format!("{} {}", method, path));

    match method.as_str() {
        "MKCOL" => {
            if dav.dirs.contains(&path) {
                StatusCode::METHOD_NOT_ALLOWED
            } else if !dav.parent_exists(&path) {
                StatusCode::CONFLICT
            } else {
                dav.dirs.insert(path);
                StatusCode::CREATED
            }
        }
        "PUT" => {
            if let Some(status) = dav.fail_puts_with {
                return status;
            }
            if !dav.parent_exists(&path) {
                return StatusCode::CONFLICT;
            }
            match dav.files.insert(path, body.to_vec()) {
                Some(_) => StatusCode::NO_CONTENT,
                None => StatusCode::CREATED,
            }
        }
        "MOVE" => {
            let destination = headers
                .get("destination")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| url::Url::parse(v).ok())
                .and_then(|u| relative(u.path()));
            let Some(destination) = destination else {
                return StatusCode::BAD_REQUEST;
            };
            let overwrite = headers.get("overwrite").and_then(|v| v.to_str().ok()) == Some("T");
            let existed = dav.files.contains_key(&destination);
            if existed && !overwrite {
                return StatusCode::PRECONDITION_FAILED;
            }
            let Some(data) = dav.files.remove(&path) else {
                return StatusCode::NOT_FOUND;
            };
            dav.files.insert(destination, data);
            if existed {
                StatusCode::NO_CONTENT
            } else {
                StatusCode::CREATED
            }
        }
        _ => StatusCode::METHOD_NOT_ALLOWED,
    }
}

/// Starts the fake server; returns its base URL and shared state.
pub async fn start_fake_dav() -> (String, SharedDav) {
    let dav: SharedDav = Arc::new(Mutex::new(FakeDav::default()));
    let app = Router::new().fallback(handle).with_state(dav.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), dav)
}
