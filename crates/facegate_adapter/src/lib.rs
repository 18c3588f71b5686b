#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tokio::sync::broadcast::error::RecvError;

use facegate_kernel_contracts::access::{
    AccessDecisionRequest, AccessDecisionResult, AccessFailureKind, ActuationAction,
    ActuationCommand, DecisionCycleState,
};
use facegate_kernel_contracts::device::{DeviceLocation, DeviceMac, DeviceRecord};
use facegate_kernel_contracts::history::UNKNOWN_REQUESTER_IP;
use facegate_kernel_contracts::identity::{EmailAddress, FaceEncoding, NationalId, PermissionLevel};
use facegate_os::access_engine::{AccessDecisionEngine, EngineCountersSnapshot};
use facegate_os::clock::SystemClock;
use facegate_os::config::AccessEngineConfig;
use facegate_os::device_session::{DeviceChannel, DeviceChannelError, LoopbackDeviceChannel};
use facegate_os::registry::{shared_store, SharedAccessStore};
use facegate_storage::access_store::AccessStore;
use facegate_storage::identity_admin::{IdentityAdminRuntime, IdentityDraft};

pub mod reason_codes {
    use facegate_kernel_contracts::ReasonCodeId;

    pub const ADAPTER_BAD_DEVICE_MAC: ReasonCodeId = ReasonCodeId(0xFA70_0001);
    pub const ADAPTER_REGISTRY_NOT_LOADED: ReasonCodeId = ReasonCodeId(0xFA70_0002);
}

const DEFAULT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_DEVICE_PORT: u16 = 80;
const DEFAULT_DEVICE_ACTUATE_PATH: &str = "/unlock";
const ADAPTER_USER_AGENT: &str = "facegate-adapter/0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChannelKind {
    Http,
    Loopback,
}

impl DeviceChannelKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "loopback" => Some(Self::Loopback),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdapterConfig {
    pub bind: SocketAddr,
    pub engine: AccessEngineConfig,
    pub device_channel: DeviceChannelKind,
    pub device_port: u16,
    pub device_actuate_path: String,
    pub seed_path: Option<PathBuf>,
}

impl AdapterConfig {
    pub fn mvp_v1() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            engine: AccessEngineConfig::mvp_v1(),
            device_channel: DeviceChannelKind::Http,
            device_port: DEFAULT_DEVICE_PORT,
            device_actuate_path: DEFAULT_DEVICE_ACTUATE_PATH.to_string(),
            seed_path: None,
        }
    }

    pub fn from_env() -> Result<Self, String> {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    /// Out-of-range or unparseable overrides fall back to the default; only
    /// an unusable bind address is an error.
    pub fn from_env_var_map<F>(get: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::mvp_v1();
        let bind = get("FACEGATE_HTTP_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        config.bind = bind
            .trim()
            .parse()
            .map_err(|_| format!("FACEGATE_HTTP_BIND is not a socket address: '{bind}'"))?;

        let engine = &mut config.engine;
        engine.arbiter.allow_threshold =
            parse_u64_in_range(&get, "FACEGATE_ALLOW_THRESHOLD", 1..=100)
                .map(|v| v as u8)
                .unwrap_or(engine.arbiter.allow_threshold);
        engine.face_match.rejection_ceiling =
            parse_f64_in_range(&get, "FACEGATE_REJECTION_CEILING", 0.01..=4.0)
                .unwrap_or(engine.face_match.rejection_ceiling);
        if let Some(list) = get("FACEGATE_TRUSTED_LOCATIONS") {
            engine.trust.trusted_locations = parse_location_list(&list);
        }
        if let Some(ms) = parse_u64_in_range(&get, "FACEGATE_ACTUATION_TIMEOUT_MS", 1..=60_000) {
            engine.devices.actuation_timeout_ms = ms;
            engine.devices.turn_wait_timeout_ms = engine.devices.turn_wait_timeout_ms.max(ms);
        }
        engine.ledger_timeout_ms = parse_u64_in_range(&get, "FACEGATE_LEDGER_TIMEOUT_MS", 1..=60_000)
            .unwrap_or(engine.ledger_timeout_ms);
        engine.registry_refresh_interval_ms =
            parse_u64_in_range(&get, "FACEGATE_REGISTRY_REFRESH_MS", 100..=3_600_000)
                .unwrap_or(engine.registry_refresh_interval_ms);

        config.device_channel = get("FACEGATE_DEVICE_CHANNEL")
            .and_then(|v| DeviceChannelKind::parse(&v))
            .unwrap_or(config.device_channel);
        config.device_port = parse_u64_in_range(&get, "FACEGATE_DEVICE_PORT", 1..=65_535)
            .map(|v| v as u16)
            .unwrap_or(config.device_port);
        config.device_actuate_path = get("FACEGATE_DEVICE_ACTUATE_PATH")
            .map(|v| v.trim().to_string())
            .filter(|v| v.starts_with('/') && !v.contains(char::is_whitespace))
            .unwrap_or(config.device_actuate_path);
        config.seed_path = get("FACEGATE_SEED_PATH")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        config.engine.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }
}

fn parse_u64_in_range<F>(get: &F, key: &str, range: RangeInclusive<u64>) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| range.contains(v))
}

fn parse_f64_in_range<F>(get: &F, key: &str, range: RangeInclusive<f64>) -> Option<f64>
where
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && range.contains(v))
}

fn parse_location_list(list: &str) -> BTreeSet<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Body POSTed to a lock controller.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceUnlockPayload {
    pub cycle_id: u64,
    pub device_mac: String,
    pub action: ActuationAction,
    pub validity_window_ms: u64,
}

impl DeviceUnlockPayload {
    pub fn from_command(command: &ActuationCommand) -> Self {
        Self {
            cycle_id: command.cycle_id.0,
            device_mac: command.device_mac.as_str().to_string(),
            action: command.action,
            validity_window_ms: command.validity_window_ms,
        }
    }
}

/// Sends unlock commands to the lock controller at the requester address.
///
/// Every request runs against a deadline shorter than the actuation timeout,
/// so the blocking call has ended before the engine gives up on the device
/// and lets the next cycle through. A request whose deadline passed while it
/// was queued is never sent.
pub struct HttpDeviceChannel {
    agent: ureq::Agent,
    port: u16,
    path: String,
    request_budget: Duration,
    in_flight: Arc<AtomicUsize>,
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl HttpDeviceChannel {
    pub fn new(port: u16, path: impl Into<String>, actuation_timeout: Duration) -> Self {
        let request_budget = request_budget_for(actuation_timeout);
        let agent = ureq::AgentBuilder::new()
            .timeout(request_budget)
            .user_agent(ADAPTER_USER_AGENT)
            .try_proxy_from_env(false)
            .build();
        Self {
            agent,
            port,
            path: path.into(),
            request_budget,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn endpoint(&self, command: &ActuationCommand) -> String {
        format!("http://{}:{}{}", command.requester_ip, self.port, self.path)
    }

    /// Total time one unlock request may take, connect through response.
    pub fn request_budget(&self) -> Duration {
        self.request_budget
    }

    /// Blocking requests that have not yet returned.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Four fifths of the actuation timeout.
fn request_budget_for(actuation_timeout: Duration) -> Duration {
    actuation_timeout.saturating_sub(actuation_timeout / 5)
}

#[async_trait]
impl DeviceChannel for HttpDeviceChannel {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn actuate(&self, command: &ActuationCommand) -> Result<(), DeviceChannelError> {
        if command.requester_ip.as_str() == UNKNOWN_REQUESTER_IP {
            return Err(DeviceChannelError::Unreachable(
                "requester address unknown".to_string(),
            ));
        }
        let url = self.endpoint(command);
        let body = serde_json::to_value(DeviceUnlockPayload::from_command(command))
            .map_err(|e| DeviceChannelError::Rejected(e.to_string()))?;
        let agent = self.agent.clone();
        let deadline = Instant::now() + self.request_budget;
        let guard = InFlight::enter(&self.in_flight);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DeviceChannelError::TimedOut(
                    "deadline passed before send".to_string(),
                ));
            }
            match agent
                .post(&url)
                .timeout(remaining)
                .set("Content-Type", "application/json")
                .send_json(body)
            {
                Ok(_) => Ok(()),
                Err(ureq::Error::Status(code, _)) => {
                    Err(DeviceChannelError::Rejected(format!("http status {code}")))
                }
                Err(ureq::Error::Transport(transport)) if is_timeout(&transport) => {
                    Err(DeviceChannelError::TimedOut(transport.to_string()))
                }
                Err(ureq::Error::Transport(transport)) => {
                    Err(DeviceChannelError::Unreachable(transport.to_string()))
                }
            }
        })
        .await
        .map_err(|e| DeviceChannelError::Unreachable(format!("device call aborted: {e}")))?
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    use std::error::Error as _;
    transport
        .source()
        .and_then(|e| e.downcast_ref::<std::io::Error>())
        .is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        })
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SeedIdentity {
    pub nome: String,
    pub alias: String,
    pub cpf: String,
    pub email: String,
    pub matricula: Option<String>,
    pub credential: Option<String>,
    pub icon_path: Option<String>,
    pub permission_level: Option<String>,
    /// Comma-separated column text, as stored in the `encodings` column.
    pub encoding: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SeedDevice {
    pub mac: String,
    pub local: String,
}

/// Registry contents loaded into the in-memory store at startup.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RegistrySeed {
    #[serde(default)]
    pub identities: Vec<SeedIdentity>,
    #[serde(default)]
    pub devices: Vec<SeedDevice>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub identities: usize,
    pub devices: usize,
}

pub fn load_seed(store: &mut AccessStore, seed: RegistrySeed) -> Result<SeedSummary, String> {
    let mut summary = SeedSummary::default();
    for d in seed.devices {
        let record = DeviceMac::new(d.mac.as_str())
            .and_then(|mac| DeviceRecord::v1(mac, DeviceLocation::new(d.local.as_str())?))
            .map_err(|v| format!("seed device '{}': {v}", d.mac))?;
        store
            .insert_device(record)
            .map_err(|e| format!("seed device '{}': {e}", d.mac))?;
        summary.devices += 1;
    }
    let mut rng = rand::thread_rng();
    for i in seed.identities {
        let alias = i.alias.clone();
        let draft = identity_draft(i).map_err(|e| format!("seed identity '{alias}': {e}"))?;
        IdentityAdminRuntime::enroll(store, draft, &mut rng)
            .map_err(|e| format!("seed identity '{alias}': {e}"))?;
        summary.identities += 1;
    }
    Ok(summary)
}

fn identity_draft(i: SeedIdentity) -> Result<IdentityDraft, String> {
    let permission_level = match i.permission_level.as_deref() {
        None => PermissionLevel::default(),
        Some(level) => PermissionLevel::parse(level).map_err(|v| v.to_string())?,
    };
    Ok(IdentityDraft {
        nome: i.nome,
        alias: i.alias,
        cpf: NationalId::new(i.cpf).map_err(|v| v.to_string())?,
        email: EmailAddress::new(i.email).map_err(|v| v.to_string())?,
        matricula: i.matricula,
        credential: i.credential,
        icon_path: i.icon_path,
        permission_level,
        encoding: FaceEncoding::from_column_text(&i.encoding).map_err(|v| v.to_string())?,
    })
}

pub fn read_seed_file(path: &Path) -> Result<RegistrySeed, String> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("failed to read seed file '{}': {e}", path.display()))?;
    serde_json::from_str(&text)
        .map_err(|e| format!("failed to parse seed file '{}': {e}", path.display()))
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccessDecideAdapterRequest {
    pub device_mac: String,
    pub encoding: Vec<f64>,
    pub requester_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AccessDecideAdapterResponse {
    pub status: String,
    pub outcome: String,
    pub cycle_id: Option<u64>,
    pub trust: u8,
    pub identity_id: Option<String>,
    pub distance: Option<f64>,
    pub final_state: String,
    pub actuation: String,
    pub failure: Option<String>,
    pub reason_code: Option<u32>,
    pub degraded: bool,
    pub history_row_id: Option<u64>,
    pub reason: Option<String>,
}

impl AccessDecideAdapterResponse {
    fn from_result(result: &AccessDecisionResult) -> Self {
        let status = if result.final_state == DecisionCycleState::Failed {
            "error"
        } else {
            "ok"
        };
        Self {
            status: status.to_string(),
            outcome: result.decision.as_str().to_ascii_uppercase(),
            cycle_id: Some(result.cycle_id.0),
            trust: result.trust.value(),
            identity_id: result.matched_identity.as_ref().map(|id| id.as_str().to_string()),
            distance: result.distance,
            final_state: result.final_state.as_str().to_string(),
            actuation: result.actuation.as_str().to_string(),
            failure: result.failure.as_ref().map(|f| f.kind.as_str().to_string()),
            reason_code: result.failure.as_ref().map(|f| f.reason_code.0),
            degraded: result.degraded,
            history_row_id: result.history_row_id.map(|r| r.0),
            reason: result.failure.as_ref().map(|f| f.detail.clone()),
        }
    }

    fn bad_device_mac(reason: String) -> Self {
        Self {
            status: "error".to_string(),
            outcome: "DENY".to_string(),
            cycle_id: None,
            trust: 0,
            identity_id: None,
            distance: None,
            final_state: DecisionCycleState::Failed.as_str().to_string(),
            actuation: "not_requested".to_string(),
            failure: Some(AccessFailureKind::UnknownDevice.as_str().to_string()),
            reason_code: Some(reason_codes::ADAPTER_BAD_DEVICE_MAC.0),
            degraded: false,
            history_row_id: None,
            reason: Some(reason),
        }
    }
}

fn status_for(result: &AccessDecisionResult) -> StatusCode {
    match result.failure.as_ref().map(|f| f.kind) {
        Some(AccessFailureKind::MalformedObservation) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(AccessFailureKind::UnknownDevice) => StatusCode::NOT_FOUND,
        Some(AccessFailureKind::StoreUnavailable) | Some(AccessFailureKind::LedgerUnavailable) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Some(AccessFailureKind::LedgerRejected) => StatusCode::INTERNAL_SERVER_ERROR,
        Some(AccessFailureKind::ActuationTimeout) | Some(AccessFailureKind::ActuationFailed) | None => {
            StatusCode::OK
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeviceHeartbeatRequest {
    pub device_mac: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterAckResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct AdapterCycleCounters {
    pub cycles: u64,
    pub allowed: u64,
    pub denied: u64,
    pub failed: u64,
    pub actuation_timeouts: u64,
    pub ledger_failures: u64,
    pub alerts: u64,
}

impl AdapterCycleCounters {
    fn from_engine(c: EngineCountersSnapshot, alerts: u64) -> Self {
        Self {
            cycles: c.cycles,
            allowed: c.allowed,
            denied: c.denied,
            failed: c.failed,
            actuation_timeouts: c.actuation_timeouts,
            ledger_failures: c.ledger_failures,
            alerts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub registry_generation: Option<u64>,
    pub registry_dirty: bool,
    pub device_count: usize,
    pub devices_alive: usize,
    pub device_channel: String,
    pub counters: AdapterCycleCounters,
}

pub struct AdapterRuntime {
    engine: Arc<AccessDecisionEngine>,
    store: SharedAccessStore,
    alerts_seen: Arc<AtomicU64>,
}

impl AdapterRuntime {
    pub fn new(config: &AdapterConfig) -> Result<Self, String> {
        let mut store = AccessStore::new_in_memory();
        if let Some(path) = config.seed_path.as_ref() {
            let summary = load_seed(&mut store, read_seed_file(path)?)?;
            tracing::info!(
                path = %path.display(),
                identities = summary.identities,
                devices = summary.devices,
                "registry seed loaded"
            );
        }
        let channel: Arc<dyn DeviceChannel> = match config.device_channel {
            DeviceChannelKind::Http => Arc::new(HttpDeviceChannel::new(
                config.device_port,
                config.device_actuate_path.clone(),
                config.engine.devices.actuation_timeout(),
            )),
            DeviceChannelKind::Loopback => Arc::new(LoopbackDeviceChannel::new()),
        };
        let store = shared_store(store);
        let engine = AccessDecisionEngine::over_store(
            config.engine.clone(),
            store.clone(),
            channel,
            Arc::new(SystemClock::new()),
        )
        .map_err(|e| e.to_string())?;
        Ok(Self::with_parts(Arc::new(engine), store))
    }

    pub fn with_parts(engine: Arc<AccessDecisionEngine>, store: SharedAccessStore) -> Self {
        Self {
            engine,
            store,
            alerts_seen: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn default_from_env() -> Result<Self, String> {
        Self::new(&AdapterConfig::from_env()?)
    }

    pub fn engine(&self) -> &Arc<AccessDecisionEngine> {
        &self.engine
    }

    pub fn store(&self) -> &SharedAccessStore {
        &self.store
    }

    /// Registry refresh worker plus the alert watcher.
    pub fn spawn_background_workers(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut alerts = self.engine.subscribe_alerts();
        let seen = self.alerts_seen.clone();
        let watcher = tokio::spawn(async move {
            loop {
                match alerts.recv().await {
                    Ok(_) => {
                        seen.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        seen.fetch_add(missed, Ordering::Relaxed);
                        tracing::warn!(missed, "alert watcher lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        vec![self.engine.clone().spawn_registry_worker(), watcher]
    }

    pub async fn run_access_decide(
        &self,
        request: AccessDecideAdapterRequest,
    ) -> (StatusCode, AccessDecideAdapterResponse) {
        let mac = match DeviceMac::new(request.device_mac.as_str()) {
            Ok(mac) => mac,
            Err(v) => {
                tracing::info!(device_mac = %request.device_mac, error = %v, "rejected unparseable device address");
                return (
                    StatusCode::NOT_FOUND,
                    AccessDecideAdapterResponse::bad_device_mac(v.to_string()),
                );
            }
        };
        let result = self
            .engine
            .decide(AccessDecisionRequest::v1(mac, request.encoding, request.requester_ip))
            .await;
        (status_for(&result), AccessDecideAdapterResponse::from_result(&result))
    }

    pub fn invalidate_registry(&self) -> AdapterAckResponse {
        self.engine.invalidate_registry();
        AdapterAckResponse {
            status: "ok".to_string(),
            outcome: "INVALIDATED".to_string(),
            reason: None,
        }
    }

    pub fn device_heartbeat(&self, request: DeviceHeartbeatRequest) -> (StatusCode, AdapterAckResponse) {
        let acked = DeviceMac::new(request.device_mac.as_str())
            .map_err(|v| v.to_string())
            .and_then(|mac| self.engine.heartbeat(&mac).map_err(|e| e.to_string()));
        match acked {
            Ok(()) => (
                StatusCode::OK,
                AdapterAckResponse {
                    status: "ok".to_string(),
                    outcome: "ACKED".to_string(),
                    reason: None,
                },
            ),
            Err(reason) => (
                StatusCode::NOT_FOUND,
                AdapterAckResponse {
                    status: "error".to_string(),
                    outcome: "REJECTED".to_string(),
                    reason: Some(reason),
                },
            ),
        }
    }

    pub fn health_report(&self) -> (StatusCode, AdapterHealthResponse) {
        let h = self.engine.health();
        let (code, status, outcome, reason) = match (h.registry_generation, h.registry_dirty) {
            (None, _) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "error",
                "UNHEALTHY",
                Some(format!(
                    "registry snapshot not loaded (reason_code={:#x})",
                    reason_codes::ADAPTER_REGISTRY_NOT_LOADED.0
                )),
            ),
            (Some(_), true) => (StatusCode::OK, "ok", "DEGRADED", Some("registry reload pending".to_string())),
            (Some(_), false) => (StatusCode::OK, "ok", "HEALTHY", None),
        };
        (
            code,
            AdapterHealthResponse {
                status: status.to_string(),
                outcome: outcome.to_string(),
                reason,
                registry_generation: h.registry_generation,
                registry_dirty: h.registry_dirty,
                device_count: h.device_count,
                devices_alive: h.devices_alive,
                device_channel: h.device_channel.to_string(),
                counters: AdapterCycleCounters::from_engine(
                    h.counters,
                    self.alerts_seen.load(Ordering::Relaxed),
                ),
            },
        )
    }
}

pub fn router(runtime: Arc<AdapterRuntime>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/access/decide", post(access_decide))
        .route("/v1/registry/invalidate", post(registry_invalidate))
        .route("/v1/devices/heartbeat", post(device_heartbeat))
        .with_state(runtime)
}

async fn healthz(
    State(runtime): State<Arc<AdapterRuntime>>,
) -> (StatusCode, Json<AdapterHealthResponse>) {
    let (code, body) = runtime.health_report();
    (code, Json(body))
}

async fn access_decide(
    State(runtime): State<Arc<AdapterRuntime>>,
    Json(request): Json<AccessDecideAdapterRequest>,
) -> (StatusCode, Json<AccessDecideAdapterResponse>) {
    let (code, body) = runtime.run_access_decide(request).await;
    (code, Json(body))
}

async fn registry_invalidate(
    State(runtime): State<Arc<AdapterRuntime>>,
) -> (StatusCode, Json<AdapterAckResponse>) {
    (StatusCode::OK, Json(runtime.invalidate_registry()))
}

async fn device_heartbeat(
    State(runtime): State<Arc<AdapterRuntime>>,
    Json(request): Json<DeviceHeartbeatRequest>,
) -> (StatusCode, Json<AdapterAckResponse>) {
    let (code, body) = runtime.device_heartbeat(request);
    (code, Json(body))
}
