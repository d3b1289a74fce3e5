#![allow(dead_code)]

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::routing::get;
use axum::Router;
use sonoff_lan::EngineConfig;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

// --- Fake devices served by axum on loopback addresses ---

/// Identification body of a well-behaved device
pub fn identity(deviceid: &str, model: &str) -> String {
    serde_json::json!({
        "deviceid": deviceid,
        "name": format!("Switch {}", deviceid),
        "model": model,
        "mac": "AA:BB:CC:00:11:22",
        "fwVersion": "3.6.0",
        "hwVersion": "1.0",
    })
    .to_string()
}

/// Address of a fake host on the loopback /24
pub fn loopback(last_octet: u8) -> Ipv4Addr {
    Ipv4Addr::new(127, 0, 0, last_octet)
}

struct FakeState {
    // Body served on /device; `None` answers 404
    identity: Option<String>,
    power_on: AtomicBool,
    fail_control: AtomicBool,
    stall_status: AtomicBool,
    control_reply: Mutex<Option<String>>,
    status_reply: Mutex<Option<String>>,
    requests: AtomicUsize,
    control_requests: AtomicUsize,
    last_control_uri: Mutex<Option<String>>,
}

impl FakeState {
    fn hit(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// Handle to one fake host
#[derive(Clone)]
pub struct FakeDevice {
    pub ip: Ipv4Addr,
    pub port: u16,
    state: Arc<FakeState>,
    task: Arc<JoinHandle<()>>,
}

impl FakeDevice {
    async fn spawn(ip: Ipv4Addr, port: u16, identity: Option<String>) -> Self {
        let listener = TcpListener::bind(SocketAddr::from((ip, port)))
            .await
            .expect("bind fake device");
        Self::serve(listener, identity)
    }

    fn serve(listener: TcpListener, identity: Option<String>) -> Self {
        let addr = listener.local_addr().expect("local addr");
        let ip = match addr.ip() {
            std::net::IpAddr::V4(ip) => ip,
            other => panic!("unexpected address {}", other),
        };

        let state = Arc::new(FakeState {
            identity,
            power_on: AtomicBool::new(false),
            fail_control: AtomicBool::new(false),
            stall_status: AtomicBool::new(false),
            control_reply: Mutex::new(None),
            status_reply: Mutex::new(None),
            requests: AtomicUsize::new(0),
            control_requests: AtomicUsize::new(0),
            last_control_uri: Mutex::new(None),
        });

        let app = Router::new()
            .route("/device", get(device_info))
            .route("/status", get(status))
            .route("/switch/on", get(switch_on))
            .route("/switch/off", get(switch_off))
            .route("/toggle", get(toggle))
            .fallback(not_found)
            .with_state(state.clone());

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            ip,
            port: addr.port(),
            state,
            task: Arc::new(task),
        }
    }

    /// Every HTTP request the host received
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Requests to the control paths
    pub fn control_requests(&self) -> usize {
        self.state.control_requests.load(Ordering::SeqCst)
    }

    /// Path and query of the last control request
    pub fn last_control_uri(&self) -> Option<String> {
        self.state.last_control_uri.lock().unwrap().clone()
    }

    pub fn is_on(&self) -> bool {
        self.state.power_on.load(Ordering::SeqCst)
    }

    /// Answer control requests with HTTP 500
    pub fn fail_control(&self, fail: bool) {
        self.state.fail_control.store(fail, Ordering::SeqCst);
    }

    /// Answer control requests with 200 and this body
    pub fn set_control_reply(&self, body: &str) {
        *self.state.control_reply.lock().unwrap() = Some(body.to_string());
    }

    /// Answer `/status` with this body instead of the switch position
    pub fn set_status_reply(&self, body: &str) {
        *self.state.status_reply.lock().unwrap() = Some(body.to_string());
    }

    /// Accept `/status` requests but never answer them
    pub fn stall_status(&self, stall: bool) {
        self.state.stall_status.store(stall, Ordering::SeqCst);
    }

    /// Stop listening; further connections are refused
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

async fn device_info(State(state): State<Arc<FakeState>>) -> (StatusCode, String) {
    state.hit();
    match &state.identity {
        Some(body) => (StatusCode::OK, body.clone()),
        None => (StatusCode::NOT_FOUND, "not found".to_string()),
    }
}

async fn status(State(state): State<Arc<FakeState>>) -> (StatusCode, String) {
    state.hit();
    if state.stall_status.load(Ordering::SeqCst) {
        std::future::pending::<()>().await;
    }
    if let Some(body) = state.status_reply.lock().unwrap().clone() {
        return (StatusCode::OK, body);
    }
    let switch = if state.power_on.load(Ordering::SeqCst) { "on" } else { "off" };
    (StatusCode::OK, format!(r#"{{"switch":"{}"}}"#, switch))
}

async fn switch_on(State(state): State<Arc<FakeState>>, uri: Uri) -> (StatusCode, String) {
    control(&state, uri, |_| true)
}

async fn switch_off(State(state): State<Arc<FakeState>>, uri: Uri) -> (StatusCode, String) {
    control(&state, uri, |_| false)
}

async fn toggle(State(state): State<Arc<FakeState>>, uri: Uri) -> (StatusCode, String) {
    control(&state, uri, |on| !on)
}

fn control(state: &FakeState, uri: Uri, next: impl Fn(bool) -> bool) -> (StatusCode, String) {
    state.hit();
    state.control_requests.fetch_add(1, Ordering::SeqCst);
    *state.last_control_uri.lock().unwrap() = Some(uri.to_string());

    if state.fail_control.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "relay fault".to_string());
    }
    if let Some(body) = state.control_reply.lock().unwrap().clone() {
        return (StatusCode::OK, body);
    }

    let on = next(state.power_on.load(Ordering::SeqCst));
    state.power_on.store(on, Ordering::SeqCst);
    (StatusCode::OK, r#"{"success":true}"#.to_string())
}

async fn not_found(State(state): State<Arc<FakeState>>) -> (StatusCode, String) {
    state.hit();
    (StatusCode::NOT_FOUND, "not found".to_string())
}

/// A loopback /24 with fake hosts all listening on one port
///
/// `127.0.0.1` always runs a plain web server with no device signature; it
/// also reserves the port for the lifetime of the network.
pub struct FakeNetwork {
    pub port: u16,
    pub gateway: FakeDevice,
}

impl FakeNetwork {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind gateway");
        let gateway = FakeDevice::serve(listener, None);
        Self {
            port: gateway.port,
            gateway,
        }
    }

    /// Start a device answering `/device` with `identity`
    pub async fn device(&self, last_octet: u8, identity: &str) -> FakeDevice {
        FakeDevice::spawn(loopback(last_octet), self.port, Some(identity.to_string())).await
    }

    /// Start an HTTP host with no identification endpoint
    pub async fn plain_host(&self, last_octet: u8) -> FakeDevice {
        FakeDevice::spawn(loopback(last_octet), self.port, None).await
    }

    /// Engine configuration scanning this network with short timeouts
    pub fn config(&self) -> EngineConfig {
        EngineConfig {
            subnet: "127.0.0.0/24".to_string(),
            device_port: self.port,
            probe_timeout_ms: 200,
            chunk_timeout_ms: 3_000,
            fallback_timeout_ms: 3_000,
            discovery_timeout_ms: 8_000,
            identify_timeout_ms: 1_000,
            identify_alt_timeout_ms: 500,
            control_timeout_ms: 1_000,
            status_timeout_ms: 1_000,
            refresh_cycle_timeout_ms: 2_000,
            refresh_interval_secs: 1,
            ..EngineConfig::default()
        }
    }
}

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
