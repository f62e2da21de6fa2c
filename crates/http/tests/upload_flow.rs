//! End-to-end: the transfer engine driving the HTTP client against a live
//! upload server.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use hoist_http::HttpUploadClient;
use hoist_transfer::{BackoffSchedule, TransferEvent, TransferOutcome, UploadConfig, Uploader};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Minimal upload server speaking the offset dialect: `POST` opens a
/// session, `PATCH` appends at the committed offset, `HEAD` reports it.
#[derive(Default)]
struct UploadServer {
    committed: AtomicU64,
    fail_next_patch: AtomicBool,
    requests: Mutex<Vec<String>>,
}

impl UploadServer {
    fn committed(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }

    fn patch_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.starts_with("PATCH"))
            .count()
    }
}

async fn start_server() -> (String, Arc<UploadServer>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let endpoint = format!("http://127.0.0.1:{port}/files");
    let server = Arc::new(UploadServer::default());

    let state = server.clone();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let request = read_request(&mut stream).await;
            let reply = state.respond(&request);
            let _ = stream.write_all(reply.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    (endpoint, server, handle)
}

impl UploadServer {
    fn respond(&self, request: &str) -> String {
        let first_line = request.lines().next().unwrap_or_default().to_string();
        self.requests.lock().unwrap().push(first_line.clone());

        if first_line.starts_with("POST") {
            return response("201 Created", &[("Location", "/files/it")]);
        }
        if first_line.starts_with("HEAD") {
            let committed = self.committed().to_string();
            return response("200 OK", &[("Upload-Offset", &committed)]);
        }
        if first_line.starts_with("PATCH") {
            if self.fail_next_patch.swap(false, Ordering::SeqCst) {
                return response("503 Service Unavailable", &[]);
            }
            let offset = header_value(request, "upload-offset").unwrap_or(u64::MAX);
            let body_len = header_value(request, "content-length").unwrap_or(0);
            let committed = self.committed();
            if offset != committed {
                return response("409 Conflict", &[("Upload-Offset", &committed.to_string())]);
            }
            let committed = committed + body_len;
            self.committed.store(committed, Ordering::SeqCst);
            return response("204 No Content", &[("Upload-Offset", &committed.to_string())]);
        }
        response("405 Method Not Allowed", &[])
    }
}

fn header_value(request: &str, name: &str) -> Option<u64> {
    request
        .to_lowercase()
        .lines()
        .find_map(|line| line.strip_prefix(&format!("{name}:")).map(str::to_string))
        .and_then(|value| value.trim().parse().ok())
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let Ok(n) = stream.read(&mut chunk).await else {
            break;
        };
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..header_end]).into_owned();
            let body_len = header_value(&headers, "content-length").unwrap_or(0) as usize;
            if buf.len() >= header_end + 4 + body_len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn response(status: &str, headers: &[(&str, &str)]) -> String {
    let mut resp = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in headers {
        resp.push_str(&format!("{name}: {value}\r\n"));
    }
    resp.push_str("Content-Length: 0\r\nConnection: close\r\n\r\n");
    resp
}

fn quick_config(chunk_size: u64) -> UploadConfig {
    UploadConfig {
        chunk_size,
        backoff: BackoffSchedule::new(vec![Duration::ZERO; 5]),
        ..UploadConfig::default()
    }
}

#[tokio::test]
async fn upload_completes_over_http() {
    let (endpoint, server, handle) = start_server().await;
    let client = HttpUploadClient::new(&endpoint, "integration-token").unwrap();
    let mut uploader = Uploader::new(Arc::new(client));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payload.bin");
    std::fs::write(&path, b"0123456789").unwrap();

    let mut rx = uploader.start(&path, quick_config(4)).unwrap();
    let mut last_percentage = 0;
    while let Some(event) = rx.recv().await {
        if let TransferEvent::Progress(progress) = event {
            last_percentage = progress.percentage;
        }
    }

    assert_eq!(last_percentage, 100);
    assert_eq!(server.committed(), 10);
    assert_eq!(server.patch_count(), 3);
    assert!(matches!(
        uploader.outcome(),
        Some(TransferOutcome::Completed { .. })
    ));
    handle.abort();
}

#[tokio::test]
async fn transient_server_error_is_retried_over_http() {
    let (endpoint, server, handle) = start_server().await;
    server.fail_next_patch.store(true, Ordering::SeqCst);

    let client = HttpUploadClient::new(&endpoint, "integration-token").unwrap();
    let mut uploader = Uploader::new(Arc::new(client));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payload.bin");
    std::fs::write(&path, b"0123456789").unwrap();

    let mut rx = uploader.start(&path, quick_config(4)).unwrap();
    while rx.recv().await.is_some() {}

    assert_eq!(server.committed(), 10);
    assert_eq!(server.patch_count(), 4);
    assert!(matches!(
        uploader.outcome(),
        Some(TransferOutcome::Completed { .. })
    ));
    handle.abort();
}
