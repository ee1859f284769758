//! Test-only fakes for the generator and illustrator seams, plus a loopback
//! HTTP server for the real http backends.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};

use crate::core::types::{Dialog, GenerationParams, Message, Role};
use crate::io::generator::Generator;
use crate::io::image::Illustrator;

/// Join fragments as `{a}, {b}, ...`.
pub fn braced(fragments: &[&str]) -> String {
    fragments
        .iter()
        .map(|fragment| format!("{{{fragment}}}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Answers each request according to the kind of dialog it sees.
///
/// Decomposition prompts get six braced fragments, compression prompts get a
/// braced summary, everything else gets a line of prose that echoes the request.
#[derive(Debug, Clone)]
pub struct PaperResponder {
    pub fanout: usize,
    pub summary: String,
}

impl Default for PaperResponder {
    fn default() -> Self {
        Self {
            fanout: 6,
            summary: "Summary: A compact account of the section.".to_string(),
        }
    }
}

impl PaperResponder {
    pub fn respond(&self, dialog: &Dialog) -> String {
        let system = system_prompt(dialog);
        if system.contains("break down the paper writing task") {
            let parts: Vec<String> = (1..=self.fanout)
                .map(|k| format!("Part {k}: covers topic {k}"))
                .collect();
            return braced(&parts.iter().map(String::as_str).collect::<Vec<_>>());
        }
        if system.contains("sub-subtasks") {
            let parts: Vec<String> = (1..=self.fanout)
                .map(|k| format!("Point {k}: details point {k}"))
                .collect();
            return braced(&parts.iter().map(String::as_str).collect::<Vec<_>>());
        }
        if system.contains("condensing") {
            return format!("Here it is: {{{}}}", self.summary);
        }
        let request = dialog
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
            .unwrap_or_default();
        format!("Prose written for: {request}")
    }
}

fn system_prompt(dialog: &Dialog) -> &str {
    dialog
        .iter()
        .find(|message| message.role == Role::System)
        .map(|message| message.content.as_str())
        .unwrap_or_default()
}

enum Script {
    Queue(RefCell<VecDeque<String>>),
    Responder(PaperResponder),
}

/// Generator that replays canned replies and records every dialog it was sent.
pub struct ScriptedGenerator {
    script: Script,
    requests: RefCell<Vec<Dialog>>,
    fail_on: Option<usize>,
}

impl ScriptedGenerator {
    /// Reply with `replies` in order; errors once they run out.
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            script: Script::Queue(RefCell::new(replies.into())),
            requests: RefCell::new(Vec::new()),
            fail_on: None,
        }
    }

    pub fn responding(responder: PaperResponder) -> Self {
        Self {
            script: Script::Responder(responder),
            requests: RefCell::new(Vec::new()),
            fail_on: None,
        }
    }

    /// Fail the request with this zero-based sequence number.
    pub fn failing_on(mut self, request: usize) -> Self {
        self.fail_on = Some(request);
        self
    }

    pub fn requests(&self) -> Vec<Dialog> {
        self.requests.borrow().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Generator for ScriptedGenerator {
    fn chat(&self, dialog: &Dialog, _params: &GenerationParams) -> Result<Message> {
        let seq = self.request_count();
        self.requests.borrow_mut().push(dialog.clone());
        if self.fail_on == Some(seq) {
            bail!("scripted failure on request {seq}");
        }
        let content = match &self.script {
            Script::Queue(queue) => queue
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| anyhow!("no scripted reply for request {seq}"))?,
            Script::Responder(responder) => responder.respond(dialog),
        };
        Ok(Message::new(Role::Assistant, content))
    }
}

/// Illustrator that records prompts and writes a placeholder image.
#[derive(Default)]
pub struct RecordingIllustrator {
    pub prompts: RefCell<Vec<String>>,
    pub downloads: RefCell<Vec<PathBuf>>,
}

impl RecordingIllustrator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Illustrator for RecordingIllustrator {
    fn generate(&self, prompt: &str) -> Result<String> {
        let mut prompts = self.prompts.borrow_mut();
        prompts.push(prompt.to_string());
        Ok(format!("https://images.test/{}.png", prompts.len()))
    }

    fn download(&self, _url: &str, path: &Path) -> Result<()> {
        fs::write(path, b"\x89PNG")?;
        self.downloads.borrow_mut().push(path.to_path_buf());
        Ok(())
    }
}

/// One scripted HTTP response.
#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    /// Wait this long after reading the request before answering.
    pub delay: Duration,
}

impl CannedResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: "application/octet-stream",
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    /// A 200 response carrying `value`.
    pub fn json(value: serde_json::Value) -> Self {
        Self {
            content_type: "application/json",
            ..Self::new(200, value.to_string())
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A request as received by [`LocalServer`].
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    /// Header names are lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> Result<serde_json::Value> {
        serde_json::from_slice(&self.body).context("request body is not JSON")
    }
}

/// Loopback HTTP/1.1 server answering one connection per canned response.
///
/// Every response closes its connection, so each request the client makes
/// consumes the next response in order.
pub struct LocalServer {
    addr: SocketAddr,
    handle: JoinHandle<Result<Vec<CapturedRequest>>>,
}

impl LocalServer {
    pub fn start(responses: Vec<CannedResponse>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").context("bind local server")?;
        let addr = listener.local_addr().context("local server address")?;
        let handle = thread::spawn(move || {
            responses
                .iter()
                .map(|response| serve_one(&listener, response))
                .collect::<Result<Vec<_>>>()
        });
        Ok(Self { addr, handle })
    }

    /// Base URL without a trailing slash, e.g. `http://127.0.0.1:4242`.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url())
    }

    /// Wait until every canned response was served and return the requests.
    pub fn finish(self) -> Result<Vec<CapturedRequest>> {
        self.handle
            .join()
            .map_err(|_| anyhow!("local server thread panicked"))?
    }
}

fn serve_one(listener: &TcpListener, response: &CannedResponse) -> Result<CapturedRequest> {
    let (mut stream, _) = listener.accept().context("accept connection")?;
    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).context("read request head")?;
        if n == 0 {
            bail!("connection closed before the request head ended");
        }
        raw.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).into_owned();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    let length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = raw.split_off(header_end);
    while body.len() < length {
        let n = stream.read(&mut chunk).context("read request body")?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    if !response.delay.is_zero() {
        thread::sleep(response.delay);
    }
    let reply_head = format!(
        "HTTP/1.1 {} Canned\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        response.content_type,
        response.body.len()
    );
    // The client may have given up already.
    let _ = stream
        .write_all(reply_head.as_bytes())
        .and_then(|()| stream.write_all(&response.body));

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}
