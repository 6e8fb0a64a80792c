//! Editor bootstrap: load the vendor SDK, wait for its entry point, build
//! and open an editor, retrying transient failures under a [`RetryPolicy`].
//!
//! ```text
//! Idle -> LoadingSdk -> WaitingForGlobal -> Initializing -> Open
//!              ^                                 |
//!              |                               Error --(auth/config)--> stop
//!              +---------- Retrying <------------+--(exhausted)--> MockFallback
//! ```

use crate::editor::{
    EditorConfig, EditorEvent, EditorInstance, EditorSettings, ExportOptions, ExportedDesign,
    OpenOptions, ScriptError, ScriptLoader, VendorError,
};
use crate::events::{EventBus, Handler, Subscription, lock};
use crate::retry::{RetryPolicy, millis_u64};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const CONTAINER_ID_PREFIX: &str = "picsart-editor";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapState {
    Idle,
    LoadingSdk { attempt: u32 },
    WaitingForGlobal,
    Initializing,
    Open,
    Error(BootstrapError),
    Retrying { attempt: u32, delay: Duration },
    MockFallback,
}

impl BootstrapState {
    pub fn is_terminal(&self) -> bool {
        match self {
            BootstrapState::Open | BootstrapState::MockFallback => true,
            BootstrapState::Error(err) => err.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootstrapError {
    #[error("editor API key is not configured")]
    MissingApiKey,
    #[error("failed to load SDK script: {0}")]
    ScriptLoad(#[from] ScriptError),
    #[error("SDK loading timed out after {0:?}")]
    Timeout(Duration),
    #[error("SDK script loaded but registered no editor entry point")]
    MissingGlobal,
    #[error("editor authentication failed: {0}")]
    Auth(VendorError),
    #[error("editor error: {0}")]
    Vendor(VendorError),
    #[error("editor is not open")]
    NotOpen,
}

impl BootstrapError {
    /// Configuration and authentication failures are never retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BootstrapError::MissingApiKey | BootstrapError::Auth(_))
    }

    fn from_vendor(err: VendorError) -> Self {
        if err.is_auth() {
            BootstrapError::Auth(err)
        } else {
            BootstrapError::Vendor(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContainerContent {
    #[default]
    Empty,
    Editor,
    MockFallback,
}

#[derive(Debug, Default)]
struct ContainerInner {
    id: Option<String>,
    content: ContainerContent,
    loading: bool,
}

/// The element an editor renders into. Its id never changes once assigned.
#[derive(Debug, Clone, Default)]
pub struct Container {
    inner: Arc<Mutex<ContainerInner>>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        let container = Self::default();
        lock(&container.inner).id = Some(id.into());
        container
    }

    pub fn id(&self) -> Option<String> {
        lock(&self.inner).id.clone()
    }

    /// Returns the fixed id, assigning `make_id()` first if none is set.
    pub fn ensure_id(&self, make_id: impl FnOnce() -> String) -> String {
        lock(&self.inner).id.get_or_insert_with(make_id).clone()
    }

    pub fn content(&self) -> ContainerContent {
        lock(&self.inner).content
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.inner).loading
    }

    fn set_loading(&self, loading: bool) {
        lock(&self.inner).loading = loading;
    }

    fn render(&self, content: ContainerContent) {
        let mut inner = lock(&self.inner);
        inner.content = content;
        inner.loading = false;
    }

    fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.content = ContainerContent::Empty;
        inner.loading = false;
    }
}

#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub sdk_url: String,
    pub api_key: Option<String>,
    pub settings: EditorSettings,
    pub retry: RetryPolicy,
    pub load_timeout: Duration,
    pub global_wait: Duration,
    pub open: OpenOptions,
}

impl BootstrapOptions {
    pub fn new(sdk_url: impl Into<String>) -> Self {
        Self {
            sdk_url: sdk_url.into(),
            api_key: None,
            settings: EditorSettings::default(),
            retry: RetryPolicy::default(),
            load_timeout: Duration::from_secs(10),
            global_wait: Duration::from_millis(500),
            open: OpenOptions::default(),
        }
    }
}

type InstanceSlot = Arc<Mutex<Option<Arc<dyn EditorInstance>>>>;

pub struct Bootstrap {
    loader: Arc<dyn ScriptLoader>,
    options: BootstrapOptions,
    transitions: Arc<EventBus<BootstrapState>>,
}

impl Bootstrap {
    pub fn new(loader: Arc<dyn ScriptLoader>, options: BootstrapOptions) -> Self {
        Self {
            loader,
            options,
            transitions: Arc::new(EventBus::new()),
        }
    }

    /// Observe every state the machine publishes, in order.
    pub fn on_transition(&self, handler: Handler<BootstrapState>) -> Subscription {
        self.transitions.subscribe(handler)
    }

    /// Start bootstrapping into `container` on a background task.
    pub fn mount(self, container: Container) -> BootstrapHandle {
        let (state_tx, state_rx) = watch::channel(BootstrapState::Idle);
        let (unmount_tx, unmount_rx) = oneshot::channel();
        let instance: InstanceSlot = Arc::new(Mutex::new(None));
        let driver = Driver {
            loader: self.loader,
            options: self.options,
            transitions: self.transitions,
            state: state_tx,
            container: container.clone(),
            instance: instance.clone(),
        };
        let task = tokio::spawn(driver.run(unmount_rx));
        BootstrapHandle {
            state: state_rx,
            unmount: Some(unmount_tx),
            task: Some(task),
            instance,
            container,
        }
    }
}

/// A mounted bootstrap. Dropping it unmounts in the background.
pub struct BootstrapHandle {
    state: watch::Receiver<BootstrapState>,
    unmount: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    instance: InstanceSlot,
    container: Container,
}

impl BootstrapHandle {
    pub fn state(&self) -> BootstrapState {
        self.state.borrow().clone()
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Wait until the published state satisfies `pred`.
    pub async fn wait_until(
        &mut self,
        pred: impl FnMut(&BootstrapState) -> bool,
    ) -> BootstrapState {
        let reached = self.state.wait_for(pred).await.map(|s| s.clone());
        reached.unwrap_or_else(|_| self.state.borrow().clone())
    }

    /// Wait for `Open`, `MockFallback` or a terminal error.
    pub async fn settled(&mut self) -> BootstrapState {
        self.wait_until(BootstrapState::is_terminal).await
    }

    pub async fn export(&self, options: &ExportOptions) -> Result<ExportedDesign, BootstrapError> {
        if self.state() != BootstrapState::Open {
            return Err(BootstrapError::NotOpen);
        }
        let instance = lock(&self.instance).clone().ok_or(BootstrapError::NotOpen)?;
        let design = instance
            .export(options)
            .await
            .map_err(BootstrapError::from_vendor)?;
        // Product creation downstream of export is not wired up yet.
        info!(format = %design.format, bytes = design.data.len(), "design exported");
        Ok(design)
    }

    /// Cancel pending work, close the editor and clear the container.
    pub async fn unmount(mut self) {
        if let Some(tx) = self.unmount.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!(?err, "bootstrap task ended abnormally");
        }
    }
}

impl Drop for BootstrapHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.unmount.take() {
            let _ = tx.send(());
        }
    }
}

struct Opened {
    events: mpsc::UnboundedReceiver<EditorEvent>,
    subscription: Subscription,
}

struct Driver {
    loader: Arc<dyn ScriptLoader>,
    options: BootstrapOptions,
    transitions: Arc<EventBus<BootstrapState>>,
    state: watch::Sender<BootstrapState>,
    container: Container,
    instance: InstanceSlot,
}

impl Driver {
    async fn run(self, mut unmount: oneshot::Receiver<()>) {
        let opened = tokio::select! {
            biased;
            _ = &mut unmount => {
                self.teardown();
                return;
            }
            opened = self.run_attempts() => opened,
        };

        let Some(Opened {
            mut events,
            subscription,
        }) = opened
        else {
            // MockFallback and terminal errors stay rendered until unmount.
            let _ = unmount.await;
            self.teardown();
            return;
        };

        loop {
            tokio::select! {
                biased;
                _ = &mut unmount => break,
                event = events.recv() => match event {
                    Some(EditorEvent::Error(err)) => {
                        warn!(%err, "editor reported an error while open");
                    }
                    Some(EditorEvent::Exported(design)) => {
                        info!(format = %design.format, bytes = design.data.len(), "editor emitted an export");
                    }
                    Some(EditorEvent::Opened) => debug!("editor re-opened"),
                    None => {
                        let _ = (&mut unmount).await;
                        break;
                    }
                },
            }
        }
        drop(subscription);
        self.teardown();
    }

    async fn run_attempts(&self) -> Option<Opened> {
        self.container.set_loading(true);
        let policy = self.options.retry;
        let mut retries = 0u32;
        loop {
            match self.attempt(retries).await {
                Ok(opened) => {
                    self.container.render(ContainerContent::Editor);
                    self.publish(BootstrapState::Open);
                    info!(retries, "editor opened");
                    return Some(opened);
                }
                Err(err) => {
                    self.discard_instance();
                    self.publish(BootstrapState::Error(err.clone()));
                    if err.is_terminal() {
                        error!(%err, "editor bootstrap failed; not retrying");
                        self.container.set_loading(false);
                        return None;
                    }
                    if !policy.should_retry(retries) {
                        error!(%err, retries, "retries exhausted; rendering mock editor");
                        self.container.render(ContainerContent::MockFallback);
                        self.publish(BootstrapState::MockFallback);
                        return None;
                    }
                    retries += 1;
                    let delay = policy.delay_for(retries);
                    warn!(
                        %err,
                        attempt = retries,
                        max_attempts = policy.max_attempts,
                        delay_ms = millis_u64(delay),
                        "retrying editor initialization"
                    );
                    self.publish(BootstrapState::Retrying {
                        attempt: retries,
                        delay,
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(&self, retries: u32) -> Result<Opened, BootstrapError> {
        let api_key = match self.options.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => return Err(BootstrapError::MissingApiKey),
        };

        self.publish(BootstrapState::LoadingSdk {
            attempt: retries + 1,
        });
        let timeout = self.options.load_timeout;
        let script = tokio::time::timeout(timeout, self.loader.load(&self.options.sdk_url))
            .await
            .map_err(|_| BootstrapError::Timeout(timeout))??;
        debug!(src = %self.options.sdk_url, "SDK script loaded");

        self.publish(BootstrapState::WaitingForGlobal);
        tokio::time::sleep(self.options.global_wait).await;
        let sdk = script.entry_point().ok_or(BootstrapError::MissingGlobal)?;

        self.publish(BootstrapState::Initializing);
        let container_id = self.container.ensure_id(|| {
            self.options
                .settings
                .container_id
                .clone()
                .unwrap_or_else(|| format!("{CONTAINER_ID_PREFIX}-{}", Uuid::new_v4()))
        });
        let config = EditorConfig::build(&self.options.settings, &api_key, &container_id);
        let instance = sdk.create(config).map_err(BootstrapError::from_vendor)?;
        *lock(&self.instance) = Some(instance.clone());

        let (tx, mut events) = mpsc::unbounded_channel();
        let subscription = instance.subscribe(Arc::new(move |event: &EditorEvent| {
            let _ = tx.send(event.clone());
        }));
        instance.open(&self.options.open);

        loop {
            match events.recv().await {
                Some(EditorEvent::Opened) => {
                    return Ok(Opened {
                        events,
                        subscription,
                    });
                }
                Some(EditorEvent::Error(err)) => return Err(BootstrapError::from_vendor(err)),
                Some(EditorEvent::Exported(_)) => debug!("ignoring export before open"),
                None => {
                    return Err(BootstrapError::Vendor(VendorError::new(
                        "editor dropped its event stream before opening",
                    )));
                }
            }
        }
    }

    fn publish(&self, state: BootstrapState) {
        debug!(?state, "bootstrap transition");
        self.transitions.emit(&state);
        self.state.send_replace(state);
    }

    fn discard_instance(&self) {
        let previous = lock(&self.instance).take();
        if let Some(instance) = previous {
            instance.close();
        }
        self.container.clear();
    }

    fn teardown(&self) {
        self.discard_instance();
        debug!("editor unmounted");
    }
}
