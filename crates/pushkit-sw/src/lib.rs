//! # PushKit Service Worker Agent
//!
//! Background agent combining push notification routing with an
//! offline navigation fallback.
//!
//! ## Features
//!
//! - **Lifecycle**: install → waiting → activating → active, with
//!   stale cache garbage collection on activation
//! - **Fetch interception**: network-first for navigations, cached
//!   fallback document when the client is offline
//! - **Notification router**: push payload decode, display, and
//!   click-to-focus resolution
//! - **Clients API**: enumeration, focus, open, claim
//!
//! ## Architecture
//!
//! ```text
//! Host runtime
//!     │  install / activate / push / notificationclick / fetch
//!     ▼
//! ServiceWorkerAgent
//!     ├── CacheStorage ── "offline-page-<version>" → /offline.html
//!     ├── Clients ────── open window views (focus / open / claim)
//!     ├── Notifications ─ shown records with click-routing data
//!     ├── Network ─────── injected fetch capability
//!     └── Connectivity ── injected offline flag
//! ```
//!
//! The host awaits every handler future to completion before it may
//! tear the worker down; nothing here is fire-and-forget.

use hashbrown::HashMap;
use pushkit_cache::{bucket_name, CacheEntry, CacheError, CacheStorage};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

// ==================== Errors ====================

/// Errors that can occur in agent operations.
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Network timeout after {0:?}")]
    Timeout(Duration),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

// ==================== Constants ====================

/// Naming prefix shared by every fallback bucket version.
pub const CACHE_PREFIX: &str = "offline-page-";

/// Default bucket version. Bump when the fallback document changes.
pub const DEFAULT_CACHE_VERSION: &str = "v1";

/// Well-known path of the precached fallback document.
pub const OFFLINE_URL: &str = "/offline.html";

/// Icon shown on notifications that carry none of their own.
pub const DEFAULT_ICON: &str =
    "https://static-00.iconduck.com/assets.00/notification-icon-512x512-0sa5r440.png";

const DEFAULT_SCOPE: &str = "https://example.com/";

// ==================== Config ====================

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Bucket naming prefix.
    pub cache_prefix: String,

    /// Current bucket version.
    pub cache_version: String,

    /// Path of the fallback document.
    pub fallback_url: String,

    /// Default notification icon URL.
    pub notification_icon: String,

    /// Scope the worker controls; relative URLs resolve against it.
    pub scope: String,

    /// Optional deadline for the network race in fetch interception.
    /// `None` means a hanging request delays fallback indefinitely.
    pub fetch_timeout: Option<Duration>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cache_prefix: CACHE_PREFIX.to_string(),
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
            fallback_url: OFFLINE_URL.to_string(),
            notification_icon: DEFAULT_ICON.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            fetch_timeout: None,
        }
    }
}

impl AgentConfig {
    /// Set the bucket version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.cache_version = version.into();
        self
    }

    /// Set the fetch deadline.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Name of the current-version bucket.
    pub fn bucket(&self) -> String {
        bucket_name(&self.cache_prefix, &self.cache_version)
    }

    /// Resolve a possibly-relative URL against the worker scope.
    pub fn resolve(&self, target: &str) -> String {
        Url::parse(&self.scope)
            .ok()
            .and_then(|base| base.join(target).ok())
            .map(String::from)
            .unwrap_or_else(|| target.to_string())
    }
}

// ==================== Lifecycle ====================

/// Worker lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerPhase {
    /// Initial phase, before install is dispatched.
    #[default]
    Parsed,
    /// Install handler running (populating the fallback bucket).
    Installing,
    /// Installed; waiting for the runtime to promote this worker.
    Installed,
    /// Activate handler running (purging stale buckets, claiming).
    Activating,
    /// Steady state; fetch interception is live.
    Activated,
    /// Superseded or failed; never promoted.
    Redundant,
}

impl WorkerPhase {
    /// Whether a phase transition is legal.
    pub fn can_transition(from: WorkerPhase, to: WorkerPhase) -> bool {
        use WorkerPhase::*;

        matches!(
            (from, to),
            (Parsed, Installing)
                | (Installing, Installed)
                | (Installing, Redundant)
                | (Installed, Activating)
                | (Activating, Activated)
                | (Activating, Redundant)
                | (Activated, Redundant)
        )
    }

    /// Check if the worker is in its steady state.
    pub fn is_active(&self) -> bool {
        *self == WorkerPhase::Activated
    }
}

// ==================== Push Payload ====================

/// Structured message decoded from a push event.
///
/// Field names follow the wire contract with the sending server; only
/// `title` and `body` are required.
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
    /// Notification title.
    pub title: String,

    /// Notification body.
    pub body: String,

    /// URL to navigate to on click.
    #[serde(default)]
    pub navigate: Option<String>,

    /// Icon override (64x64).
    #[serde(default)]
    pub icon: Option<String>,

    /// Hero image.
    #[serde(default)]
    pub image: Option<String>,

    /// Same tag replaces the previously shown notification.
    #[serde(default)]
    pub tag: Option<String>,

    /// Re-alert even when a tagged notification is replaced.
    #[serde(default)]
    pub renotify: bool,

    /// Keep the notification on screen until dismissed.
    #[serde(default, rename = "requireInteraction")]
    pub require_interaction: bool,
}

/// A push event as delivered by the host runtime.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    /// Raw message data; `None` when the push carried no payload.
    pub data: Option<String>,
}

impl PushEvent {
    /// Create a push event carrying raw data.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }

    /// Create a push event with no payload.
    pub fn empty() -> Self {
        Self { data: None }
    }
}

// ==================== Notifications ====================

/// Unique identifier for a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A shown notification record.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Unique ID.
    pub id: NotificationId,

    /// Title line.
    pub title: String,

    /// Body text.
    pub body: String,

    /// Icon URL.
    pub icon: String,

    /// Hero image URL.
    pub image: Option<String>,

    /// Replacement tag.
    pub tag: Option<String>,

    /// Re-alert on tag replacement.
    pub renotify: bool,

    /// Stays on screen until dismissed.
    pub require_interaction: bool,

    /// Opaque click-routing data: the URL to open or focus.
    pub data_url: Option<String>,
}

impl Notification {
    /// Build a notification from a decoded payload.
    pub fn from_payload(payload: PushPayload, default_icon: &str) -> Self {
        Self {
            id: NotificationId::new(),
            title: payload.title,
            body: payload.body,
            icon: payload.icon.unwrap_or_else(|| default_icon.to_string()),
            image: payload.image,
            tag: payload.tag,
            renotify: payload.renotify,
            require_interaction: payload.require_interaction,
            data_url: payload.navigate,
        }
    }
}

/// Registry of currently shown notifications.
///
/// Stands in for the platform's notification center; the agent only
/// creates records and reads them back during click handling.
#[derive(Debug, Default)]
pub struct Notifications {
    shown: HashMap<NotificationId, Notification>,
}

impl Notifications {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a notification. A repeated tag replaces the previous
    /// notification carrying it.
    pub fn show(&mut self, notification: Notification) -> NotificationId {
        if let Some(tag) = notification.tag.clone() {
            self.shown
                .retain(|_, existing| existing.tag.as_deref() != Some(tag.as_str()));
        }
        let id = notification.id;
        self.shown.insert(id, notification);
        id
    }

    /// Get a shown notification.
    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.shown.get(&id)
    }

    /// Dismiss a notification, returning its record.
    pub fn close(&mut self, id: NotificationId) -> Option<Notification> {
        self.shown.remove(&id)
    }

    /// Number of shown notifications.
    pub fn len(&self) -> usize {
        self.shown.len()
    }

    /// Whether nothing is shown.
    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }
}

// ==================== Clients ====================

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    All,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Hidden,
    Visible,
}

/// A client view (window/tab) associated with this agent.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Current URL (absolute).
    pub url: String,

    /// Client type.
    pub client_type: ClientType,

    /// Visibility state.
    pub visibility_state: VisibilityState,

    /// Whether focused.
    pub focused: bool,

    /// Whether controlled by this worker.
    pub controlled: bool,
}

impl Client {
    /// Create a window client at the given URL.
    pub fn window(url: &str) -> Self {
        Self {
            id: format!("client-{}", uuid_simple()),
            url: url.to_string(),
            client_type: ClientType::Window,
            visibility_state: VisibilityState::Visible,
            focused: false,
            controlled: false,
        }
    }

    /// Whether this client supports being focused.
    pub fn can_focus(&self) -> bool {
        self.client_type == ClientType::Window
    }
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    /// Also return clients not controlled by this worker.
    pub include_uncontrolled: bool,
    /// Restrict to a client type.
    pub client_type: ClientType,
}

/// Registry of open client views.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Enumerate clients matching the options.
    pub fn match_all(&self, options: &ClientMatchOptions) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controlled)
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect()
    }

    /// Bring a client to the foreground.
    pub fn focus(&mut self, id: &str) -> Result<(), AgentError> {
        let client = self
            .clients
            .get_mut(id)
            .ok_or_else(|| AgentError::NotFound(format!("client {id}")))?;
        if !client.can_focus() {
            return Err(AgentError::Client(
                "only window clients can be focused".to_string(),
            ));
        }
        client.focused = true;
        client.visibility_state = VisibilityState::Visible;
        Ok(())
    }

    /// Open a new window at the given URL. The new window is focused
    /// and controlled by this worker.
    pub fn open_window(&mut self, url: &str) -> Client {
        let mut client = Client::window(url);
        client.focused = true;
        client.controlled = true;
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Take control of every open view without requiring a reload.
    /// Returns the IDs of newly claimed clients.
    pub fn claim(&mut self) -> Vec<String> {
        let mut claimed = Vec::new();
        for client in self.clients.values_mut() {
            if !client.controlled {
                client.controlled = true;
                claimed.push(client.id.clone());
            }
        }
        claimed
    }

    /// Number of open clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no clients are open.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

// ==================== Fetch ====================

/// A fetch event delivered by the host runtime.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Request headers.
    pub headers: HashMap<String, String>,

    /// Originating client, when known.
    pub client_id: Option<String>,

    /// Whether this is a top-level navigation.
    pub is_navigation: bool,

    /// Whether this is a reload.
    pub is_reload: bool,
}

impl FetchEvent {
    /// Create a navigation request.
    pub fn navigation(url: &str) -> Self {
        Self {
            url: url.to_string(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            client_id: None,
            is_navigation: true,
            is_reload: false,
        }
    }

    /// Create a subresource request.
    pub fn subresource(url: &str) -> Self {
        Self {
            is_navigation: false,
            ..Self::navigation(url)
        }
    }
}

/// A response produced by the network or the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    /// Status code.
    pub status: u16,

    /// Status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Whether served from cache.
    pub from_cache: bool,
}

impl FetchResponse {
    /// Create a successful network response.
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            headers: HashMap::new(),
            body,
            from_cache: false,
        }
    }

    /// Create a response from a cache entry.
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            status: entry.status,
            status_text: "OK".to_string(),
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            from_cache: true,
        }
    }
}

// ==================== Capabilities ====================

/// Injected network capability.
///
/// Install and fetch interception drive all traffic through this so
/// tests can script success, failure, and hangs deterministically.
#[allow(async_fn_in_trait)]
pub trait Network {
    /// Attempt a request against the network.
    async fn fetch(&self, request: &FetchEvent) -> Result<FetchResponse, AgentError>;
}

/// Injected connectivity capability.
///
/// A point-in-time flag read synchronously at failure time; a race
/// where connectivity flips mid-request is accepted as best-effort.
pub trait Connectivity {
    /// Whether the client is known to be offline.
    fn is_offline(&self) -> bool;
}

// ==================== Agent Events ====================

/// Observability events emitted by the agent.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Lifecycle phase changed.
    PhaseChange { from: WorkerPhase, to: WorkerPhase },
    /// A stale bucket was deleted during activation.
    CachePurged { bucket: String },
    /// The cached fallback was served for a navigation.
    FallbackServed { url: String },
    /// A notification was shown.
    NotificationShown { id: NotificationId },
    /// A notification was dismissed.
    NotificationClosed { id: NotificationId },
    /// An existing view was focused from a notification click.
    ClientFocused { client_id: String },
    /// A new view was opened from a notification click.
    WindowOpened { client_id: String, url: String },
    /// Open views were claimed during activation.
    ClientsClaimed { count: usize },
}

/// Result of resolving a notification click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// An already-open view with the exact target URL was focused.
    Focused { client_id: String },
    /// No view matched; a new one was opened at the target URL.
    Opened { client_id: String },
}

// ==================== Agent ====================

/// The process-wide background agent.
///
/// Constructed once at process start; the host dispatches install,
/// activate, push, notificationclick, and fetch events to it and
/// awaits each handler before considering the event handled. There is
/// no teardown mid-lifetime except full process termination.
pub struct ServiceWorkerAgent<N: Network, C: Connectivity> {
    /// Agent configuration.
    pub config: AgentConfig,

    /// Cache buckets.
    pub caches: RwLock<CacheStorage>,

    /// Open client views.
    pub clients: RwLock<Clients>,

    /// Shown notifications.
    pub notifications: RwLock<Notifications>,

    phase: RwLock<WorkerPhase>,
    skip_waiting: AtomicBool,
    network: N,
    connectivity: C,
    event_tx: mpsc::UnboundedSender<AgentEvent>,
}

impl<N: Network, C: Connectivity> ServiceWorkerAgent<N, C> {
    /// Create a new agent with injected capabilities.
    pub fn new(
        config: AgentConfig,
        network: N,
        connectivity: C,
    ) -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                config,
                caches: RwLock::new(CacheStorage::new()),
                clients: RwLock::new(Clients::new()),
                notifications: RwLock::new(Notifications::new()),
                phase: RwLock::new(WorkerPhase::Parsed),
                skip_waiting: AtomicBool::new(false),
                network,
                connectivity,
                event_tx,
            },
            event_rx,
        )
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> WorkerPhase {
        *self.phase.read().await
    }

    /// Whether the worker asked to be promoted without waiting for
    /// controlled views to close.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Relaxed)
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn set_phase(&self, to: WorkerPhase) -> Result<(), AgentError> {
        let mut phase = self.phase.write().await;
        let from = *phase;
        if !WorkerPhase::can_transition(from, to) {
            return Err(AgentError::Lifecycle(format!(
                "invalid transition {from:?} -> {to:?}"
            )));
        }
        *phase = to;
        debug!(?from, ?to, "worker phase change");
        self.emit(AgentEvent::PhaseChange { from, to });
        Ok(())
    }

    /// Handle the install event: populate the current-version bucket
    /// with the fallback document.
    ///
    /// Install does not complete until the fetch+store succeeds; on
    /// fetch failure the worker is marked redundant and the previous
    /// version (if any) remains active. Re-running install for the
    /// same version repopulates the bucket and leaves exactly one
    /// entry for the fallback path.
    pub async fn handle_install(&self) -> Result<(), AgentError> {
        let phase = self.phase().await;
        match phase {
            WorkerPhase::Parsed => self.set_phase(WorkerPhase::Installing).await?,
            // Reinstall of the same version just repopulates.
            WorkerPhase::Installing | WorkerPhase::Installed => {}
            other => {
                return Err(AgentError::Lifecycle(format!(
                    "install dispatched in phase {other:?}"
                )))
            }
        }

        let fallback = self.config.resolve(&self.config.fallback_url);
        let request = FetchEvent::subresource(&fallback);

        let response = match self.network.fetch(&request).await {
            Ok(response) => response,
            Err(err) => {
                // All-or-nothing: never leave a half-populated bucket
                // behind a promoted worker.
                let _ = self.set_phase(WorkerPhase::Redundant).await;
                warn!(url = %fallback, error = %err, "fallback precache failed; install aborted");
                return Err(AgentError::InstallFailed(err.to_string()));
            }
        };

        let bucket = self.config.bucket();
        let entry = CacheEntry::new(&fallback, response.status, response.body)
            .with_headers(response.headers);
        self.caches.write().await.open(&bucket).put(entry);

        if self.phase().await == WorkerPhase::Installing {
            self.set_phase(WorkerPhase::Installed).await?;
        }

        // Activate immediately instead of waiting for controlled views
        // to close: mid-session version skew is accepted so the
        // fallback is always current.
        self.skip_waiting.store(true, Ordering::Relaxed);
        info!(bucket = %bucket, url = %fallback, "fallback document precached");
        Ok(())
    }

    /// Handle the activate event: delete stale-version buckets and
    /// claim all open views.
    pub async fn handle_activate(&self) -> Result<(), AgentError> {
        self.set_phase(WorkerPhase::Activating).await?;

        let bucket = self.config.bucket();
        let purged = self
            .caches
            .write()
            .await
            .purge_versions(&self.config.cache_prefix, &bucket);
        for name in purged {
            self.emit(AgentEvent::CachePurged { bucket: name });
        }

        let claimed = self.clients.write().await.claim();
        if !claimed.is_empty() {
            self.emit(AgentEvent::ClientsClaimed {
                count: claimed.len(),
            });
        }

        self.set_phase(WorkerPhase::Activated).await?;
        info!(bucket = %bucket, "worker activated");
        Ok(())
    }

    /// Run install and, once the runtime promotes the worker, activate.
    ///
    /// Stands in for the host's lifecycle ordering: each phase is
    /// awaited to completion before the next begins.
    pub async fn start(&self) -> Result<(), AgentError> {
        self.handle_install().await?;
        if self.skip_waiting_requested() {
            self.handle_activate().await?;
        }
        Ok(())
    }

    /// Handle a push event.
    ///
    /// No payload is a silent no-op. A malformed payload is logged and
    /// dropped rather than surfaced; the sender contract is not
    /// enforceable from this side. Returns the ID of the shown
    /// notification, if any.
    pub async fn handle_push(&self, event: &PushEvent) -> Result<Option<NotificationId>, AgentError> {
        let raw = match &event.data {
            Some(raw) => raw,
            None => {
                debug!("push event without payload; ignoring");
                return Ok(None);
            }
        };

        let payload: PushPayload = match serde_json::from_str(raw) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "dropping malformed push payload");
                return Ok(None);
            }
        };

        let notification = Notification::from_payload(payload, &self.config.notification_icon);
        debug!(title = %notification.title, navigate = ?notification.data_url, "showing notification");
        let id = self.notifications.write().await.show(notification);
        self.emit(AgentEvent::NotificationShown { id });
        Ok(Some(id))
    }

    /// Handle a notification click.
    ///
    /// The notification is dismissed first, independent of how the
    /// routing below turns out. The target URL is the click-routing
    /// data attached at display time, defaulting to the root path. An
    /// open window view whose URL exactly equals the target is
    /// focused; otherwise a new view opens at the target.
    pub async fn handle_notification_click(
        &self,
        id: NotificationId,
    ) -> Result<ClickOutcome, AgentError> {
        let notification = self
            .notifications
            .write()
            .await
            .close(id)
            .ok_or_else(|| AgentError::NotFound(format!("notification {id:?}")))?;
        self.emit(AgentEvent::NotificationClosed { id });

        let target = self
            .config
            .resolve(notification.data_url.as_deref().unwrap_or("/"));

        let mut clients = self.clients.write().await;
        let options = ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        };
        let matched = clients
            .match_all(&options)
            .into_iter()
            .find(|c| c.url == target && c.can_focus())
            .map(|c| c.id.clone());

        match matched {
            Some(client_id) => {
                clients.focus(&client_id)?;
                debug!(client = %client_id, url = %target, "focused existing view");
                self.emit(AgentEvent::ClientFocused {
                    client_id: client_id.clone(),
                });
                Ok(ClickOutcome::Focused { client_id })
            }
            None => {
                let client = clients.open_window(&target);
                debug!(client = %client.id, url = %target, "opened new view");
                self.emit(AgentEvent::WindowOpened {
                    client_id: client.id.clone(),
                    url: target,
                });
                Ok(ClickOutcome::Opened { client_id: client.id })
            }
        }
    }

    /// Handle a fetch event.
    ///
    /// Only top-level navigations are intercepted, and only once the
    /// worker is active; everything else returns `None` and passes
    /// through to the host untouched. Intercepted navigations go
    /// network-first; a successful response is returned verbatim with
    /// no caching side effect. On failure the cached fallback is
    /// served only when the client is known offline — otherwise the
    /// original error propagates so the host can render its native
    /// error presentation (a certificate error page must not be
    /// masked by a friendly fallback).
    pub async fn handle_fetch(
        &self,
        event: &FetchEvent,
    ) -> Result<Option<FetchResponse>, AgentError> {
        if !event.is_navigation {
            return Ok(None);
        }
        if !self.phase().await.is_active() {
            debug!(url = %event.url, "navigation before activation; passing through");
            return Ok(None);
        }

        let attempt = self.network.fetch(event);
        let result = match self.config.fetch_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(AgentError::Timeout(limit)),
            },
            None => attempt.await,
        };

        match result {
            Ok(response) => Ok(Some(response)),
            Err(_) if self.connectivity.is_offline() => {
                let fallback = self.config.resolve(&self.config.fallback_url);
                let bucket = self.config.bucket();
                let caches = self.caches.read().await;
                let entry = caches
                    .match_in(&bucket, &fallback)
                    .ok_or_else(|| AgentError::Cache(CacheError::EntryNotFound(fallback.clone())))?;
                info!(url = %event.url, "offline; serving cached fallback");
                self.emit(AgentEvent::FallbackServed {
                    url: event.url.clone(),
                });
                Ok(Some(FetchResponse::from_entry(entry)))
            }
            Err(err) => {
                debug!(url = %event.url, error = %err, "navigation failed while online; propagating");
                Err(err)
            }
        }
    }
}

// ==================== Helpers ====================

/// Generate a simple UUID-like string.
fn uuid_simple() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!(
        "{:016x}-{:04x}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
