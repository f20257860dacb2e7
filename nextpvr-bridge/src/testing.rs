//! In-process fake backend and scratch fixtures for tests.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::host::{ConnectionState, HostNotifier, SyncHooks};
use crate::settings::InstanceSettings;

struct Route {
    pattern: String,
    status: u16,
    body: Vec<u8>,
}

/// Minimal HTTP server answering canned responses, one connection at a
/// time.  Routes match by substring of the request target, first match
/// wins.
pub(crate) struct FakeBackend {
    addr: SocketAddr,
    routes: Arc<Mutex<Vec<Route>>>,
    hits: Arc<Mutex<Vec<String>>>,
    header_blocks: Arc<Mutex<Vec<String>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FakeBackend {
    pub fn start() -> FakeBackend {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake backend");
        let addr = listener.local_addr().expect("local addr");
        let routes: Arc<Mutex<Vec<Route>>> = Arc::new(Mutex::new(Vec::new()));
        let hits: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let header_blocks: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = std::thread::spawn({
            let routes = Arc::clone(&routes);
            let hits = Arc::clone(&hits);
            let header_blocks = Arc::clone(&header_blocks);
            let stop = Arc::clone(&stop);
            move || {
                for connection in listener.incoming() {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Ok(stream) = connection {
                        serve_one(stream, &routes, &hits, &header_blocks);
                    }
                }
            }
        });

        FakeBackend {
            addr,
            routes,
            hits,
            header_blocks,
            stop,
            handle: Some(handle),
        }
    }

    pub fn on(&self, pattern: &str, status: u16, body: &str) {
        self.routes.lock().push(Route {
            pattern: pattern.to_string(),
            status,
            body: body.as_bytes().to_vec(),
        });
    }

    /// Replaces the canned response for a pattern.
    pub fn replace(&self, pattern: &str, status: u16, body: &str) {
        let mut routes = self.routes.lock();
        routes.retain(|route| route.pattern != pattern);
        routes.push(Route {
            pattern: pattern.to_string(),
            status,
            body: body.as_bytes().to_vec(),
        });
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Settings pointing at this fake, with test-friendly timeouts.
    pub fn settings(&self) -> InstanceSettings {
        InstanceSettings {
            host: "127.0.0.1".to_string(),
            port: self.port(),
            rpc_timeout_secs: 5,
            connect_timeout_secs: 2,
            ..Default::default()
        }
    }

    /// Request targets in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.hits.lock().clone()
    }

    /// Header blocks in arrival order.
    pub fn headers(&self) -> Vec<String> {
        self.header_blocks.lock().clone()
    }

    pub fn requests_matching(&self, pattern: &str) -> usize {
        self.hits
            .lock()
            .iter()
            .filter(|target| target.contains(pattern))
            .count()
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Unblock the accept loop.
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve_one(
    stream: TcpStream,
    routes: &Mutex<Vec<Route>>,
    hits: &Mutex<Vec<String>>,
    header_blocks: &Mutex<Vec<String>>,
) {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() || request_line.trim().is_empty() {
        return;
    }
    let target = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("")
        .to_string();

    let mut headers = String::new();
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) if line == "\r\n" || line == "\n" => break,
            Ok(_) => headers.push_str(&line),
            Err(_) => return,
        }
    }

    hits.lock().push(target.clone());
    header_blocks.lock().push(headers);

    let canned = {
        let routes = routes.lock();
        routes
            .iter()
            .find(|route| target.contains(&route.pattern))
            .map(|route| (route.status, route.body.clone()))
    };
    let (status, body) = canned.unwrap_or((404, b"no route".to_vec()));
    let reason = match status {
        200 => "OK",
        206 => "Partial Content",
        404 => "Not Found",
        _ => "Response",
    };

    let mut stream = reader.into_inner();
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type: text/xml\r\nConnection: close\r\n\r\n",
        status,
        reason,
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

/// Creates a unique writable directory under the system temp dir.
pub(crate) fn scratch_dir(tag: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let dir = std::env::temp_dir().join(format!(
        "nextpvr-{}-{}-{}",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

/// Notifier that records every callback as a flat string.
#[derive(Default)]
pub(crate) struct CollectingNotifier {
    events: Mutex<Vec<String>>,
}

impl CollectingNotifier {
    pub fn new() -> Arc<CollectingNotifier> {
        Arc::new(CollectingNotifier::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|entry| entry.as_str() == event || entry.starts_with(event))
            .count()
    }
}

impl HostNotifier for CollectingNotifier {
    fn connection_state_changed(&self, _connection: &str, state: ConnectionState, _message: &str) {
        self.events.lock().push(format!("state:{}", state));
    }

    fn trigger_channel_update(&self) {
        self.events.lock().push("channels".to_string());
    }

    fn trigger_channel_groups_update(&self) {
        self.events.lock().push("groups".to_string());
    }

    fn trigger_recording_update(&self) {
        self.events.lock().push("recordings".to_string());
    }

    fn trigger_timer_update(&self) {
        self.events.lock().push("timers".to_string());
    }

    fn trigger_epg_update(&self, channel_uid: u32) {
        self.events.lock().push(format!("epg:{}", channel_uid));
    }
}

/// Hooks with a settable timer clock.
#[derive(Default)]
pub(crate) struct FixedHooks {
    pub last_timer: AtomicI64,
    pub resume_refreshes: AtomicU64,
}

impl FixedHooks {
    pub fn new(last_timer: i64) -> Arc<FixedHooks> {
        let hooks = FixedHooks::default();
        hooks.last_timer.store(last_timer, Ordering::SeqCst);
        Arc::new(hooks)
    }
}

impl SyncHooks for FixedHooks {
    fn last_timer_update(&self) -> i64 {
        self.last_timer.load(Ordering::SeqCst)
    }

    fn refresh_resume_positions(&self) {
        self.resume_refreshes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Canned XML fragments shared by tests.
pub(crate) mod xml {
    pub const SESSION_INITIATE: &str =
        r#"<rsp stat="ok"><salt>5f2e!</salt><sid>cafe01</sid></rsp>"#;
    pub const OK: &str = r#"<rsp stat="ok"/>"#;
    pub const SETTINGS: &str =
        r#"<rsp stat="ok"><NextPVRVersion>60205</NextPVRVersion></rsp>"#;
    pub const SETTINGS_OLD: &str =
        r#"<rsp stat="ok"><NextPVRVersion>40205</NextPVRVersion></rsp>"#;

    pub const CHANNELS_TWO_TV_ONE_RADIO: &str = r#"<rsp stat="ok"><channels>
        <channel><id>7</id><type>0x1</type><name>Seven</name><number>7</number><minor>0</minor>
          <groups><group>HD</group><group>News</group></groups></channel>
        <channel><id>8</id><type>0x1</type><name>Eight</name><number>8</number><minor>0</minor>
          <epg>None</epg><groups><group>HD</group></groups></channel>
        <channel><id>9</id><type>0xa</type><name>Jazz</name><number>901</number><minor>0</minor></channel>
      </channels></rsp>"#;

    pub const GROUPS_BACKEND: &str = r#"<rsp stat="ok"><groups>
        <group><name>HD</name></group>
        <group><name>News</name></group>
        <group><name>Empty</name></group>
      </groups></rsp>"#;

    pub fn last_update(value: i64) -> String {
        format!(r#"<rsp stat="ok"><last_update>{}</last_update></rsp>"#, value)
    }
}
