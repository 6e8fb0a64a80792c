//! Headless run of the editor bootstrap, used to check that the SDK is
//! reachable (directly or through the proxy) without a browser.

use crate::bootstrap::{Bootstrap, BootstrapError, BootstrapOptions, BootstrapState, Container};
use crate::editor::{
    EditorConfig, EditorEvent, EditorInstance, EditorSdk, ExportOptions, ExportedDesign,
    LoadedScript, OpenOptions, ScriptError, ScriptLoader, VendorError,
};
use crate::events::{EventBus, Handler, Subscription};
use async_trait::async_trait;
use axum::body::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Global the vendor script registers on `window`.
pub const SDK_GLOBAL: &str = "Picsart";

/// A blank 1x1 canvas: what a headless editor renders.
const BLANK_PNG: [u8; 68] = [
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d,
    0x49, 0x48, 0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01,
    0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4, 0x89, 0x00, 0x00, 0x00,
    0x0b, 0x49, 0x44, 0x41, 0x54, 0x78, 0xda, 0x63, 0x60, 0x00, 0x02, 0x00,
    0x00, 0x05, 0x00, 0x01, 0xe9, 0xfa, 0xdc, 0xd8, 0x00, 0x00, 0x00, 0x00,
    0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// Fetches the script over HTTP; the entry point counts as registered when
/// the body assigns the SDK global.
pub struct HttpScriptLoader {
    client: reqwest::Client,
    global: String,
}

impl HttpScriptLoader {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            global: SDK_GLOBAL.to_string(),
        }
    }
}

#[async_trait]
impl ScriptLoader for HttpScriptLoader {
    async fn load(&self, src: &str) -> Result<Box<dyn LoadedScript>, ScriptError> {
        let resp = self
            .client
            .get(src)
            .header(reqwest::header::ACCEPT, "*/*")
            .send()
            .await
            .map_err(|err| ScriptError::Network(err.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ScriptError::Status(status.as_u16()));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|err| ScriptError::Network(err.to_string()))?;
        debug!(%src, bytes = body.len(), "fetched SDK script");
        Ok(Box::new(FetchedScript {
            body,
            global: self.global.clone(),
        }))
    }
}

struct FetchedScript {
    body: Bytes,
    global: String,
}

impl FetchedScript {
    fn registers_global(&self) -> bool {
        let needle = self.global.as_bytes();
        self.body.windows(needle.len()).any(|w| w == needle)
    }
}

impl LoadedScript for FetchedScript {
    fn entry_point(&self) -> Option<Arc<dyn EditorSdk>> {
        if self.registers_global() {
            Some(Arc::new(HeadlessSdk))
        } else {
            None
        }
    }
}

/// Stands in for the vendor runtime: accepts any config and opens at once.
pub struct HeadlessSdk;

impl EditorSdk for HeadlessSdk {
    fn create(&self, config: EditorConfig) -> Result<Arc<dyn EditorInstance>, VendorError> {
        debug!(container = %config.container_id, property = %config.property_id, "creating headless editor");
        Ok(Arc::new(HeadlessEditor {
            events: EventBus::new(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct HeadlessEditor {
    events: EventBus<EditorEvent>,
    closed: AtomicBool,
}

#[async_trait]
impl EditorInstance for HeadlessEditor {
    fn subscribe(&self, handler: Handler<EditorEvent>) -> Subscription {
        self.events.subscribe(handler)
    }

    fn open(&self, options: &OpenOptions) {
        debug!(title = %options.title, "opening headless editor");
        self.events.emit(&EditorEvent::Opened);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn export(&self, options: &ExportOptions) -> Result<ExportedDesign, VendorError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VendorError::new("editor is closed").with_code("CLOSED"));
        }
        match options.format.trim_start_matches("image/") {
            "png" => {
                let design = ExportedDesign {
                    format: options.format.clone(),
                    data: BLANK_PNG.to_vec(),
                };
                self.events.emit(&EditorEvent::Exported(design.clone()));
                Ok(design)
            }
            other => Err(VendorError::new(format!(
                "headless editor cannot export `{other}`"
            ))
            .with_code("UNSUPPORTED")),
        }
    }
}

/// Where a headless run settled, plus the export result when one was asked for.
#[derive(Debug)]
pub struct ProbeReport {
    pub state: BootstrapState,
    pub export: Option<Result<ExportedDesign, BootstrapError>>,
}

/// Run the bootstrap once and report where it settled. With `export` set,
/// the open editor is asked for a design before unmounting.
pub async fn run(
    client: reqwest::Client,
    options: BootstrapOptions,
    export: Option<ExportOptions>,
) -> ProbeReport {
    let sdk_url = options.sdk_url.clone();
    let container = match &options.settings.container_id {
        Some(id) => Container::with_id(id.clone()),
        None => Container::new(),
    };
    let bootstrap = Bootstrap::new(Arc::new(HttpScriptLoader::new(client)), options);
    let transitions = bootstrap.on_transition(Arc::new(|state: &BootstrapState| {
        info!(?state, "probe transition");
    }));
    let mut handle = bootstrap.mount(container);
    let state = handle.settled().await;
    transitions.unsubscribe();
    let container = handle.container();
    info!(
        %sdk_url,
        ?state,
        container = container.id().as_deref().unwrap_or("-"),
        content = ?container.content(),
        loading = container.is_loading(),
        "probe settled"
    );

    let export = match export {
        Some(opts) => Some(handle.export(&opts).await),
        None => None,
    };
    handle.unmount().await;
    ProbeReport { state, export }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use std::time::Duration;

    async fn serve(status: StatusCode, body: &'static str) -> String {
        let app = Router::new().route("/sdk.js", get(move || async move { (status, body) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/sdk.js")
    }

    fn fast_options(url: String) -> BootstrapOptions {
        let mut opts = BootstrapOptions::new(url);
        opts.api_key = Some("probe-key".into());
        opts.global_wait = Duration::from_millis(5);
        opts.load_timeout = Duration::from_secs(5);
        opts.retry = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        };
        opts
    }

    #[tokio::test]
    async fn opens_when_script_registers_global() {
        let url = serve(StatusCode::OK, "window.Picsart = function Picsart() {};").await;
        let report = run(reqwest::Client::new(), fast_options(url), None).await;
        assert_eq!(report.state, BootstrapState::Open);
        assert!(report.export.is_none());
    }

    #[tokio::test]
    async fn exports_blank_canvas_once_open() {
        let url = serve(StatusCode::OK, "window.Picsart = function Picsart() {};").await;
        let report = run(
            reqwest::Client::new(),
            fast_options(url),
            Some(ExportOptions::default()),
        )
        .await;
        assert_eq!(report.state, BootstrapState::Open);
        let design = report.export.unwrap().unwrap();
        assert_eq!(design.format, "png");
        assert_eq!(&design.data[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[tokio::test]
    async fn export_without_open_editor_is_refused() {
        let url = serve(StatusCode::OK, "console.log('not the sdk');").await;
        let report = run(
            reqwest::Client::new(),
            fast_options(url),
            Some(ExportOptions::default()),
        )
        .await;
        assert_eq!(report.state, BootstrapState::MockFallback);
        assert_eq!(report.export, Some(Err(BootstrapError::NotOpen)));
    }

    #[tokio::test]
    async fn falls_back_when_global_is_missing() {
        let url = serve(StatusCode::OK, "console.log('not the sdk');").await;
        let report = run(reqwest::Client::new(), fast_options(url), None).await;
        assert_eq!(report.state, BootstrapState::MockFallback);
    }

    #[tokio::test]
    async fn http_errors_surface_as_script_failures() {
        let url = serve(StatusCode::BAD_GATEWAY, "upstream down").await;
        let loader = HttpScriptLoader::new(reqwest::Client::new());
        let err = loader.load(&url).await.err().unwrap();
        assert_eq!(err, ScriptError::Status(502));
        assert_eq!(
            BootstrapError::from(err).to_string(),
            "failed to load SDK script: script request returned status 502"
        );
    }

    #[tokio::test]
    async fn headless_export_emits_event_and_rejects_other_formats() {
        let editor = HeadlessSdk
            .create(EditorConfig::build(
                &Default::default(),
                "key",
                "picsart-editor-test",
            ))
            .unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = editor.subscribe(Arc::new(move |event: &EditorEvent| {
            sink.lock().unwrap().push(event.clone());
        }));

        let design = editor.export(&ExportOptions::default()).await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![EditorEvent::Exported(design.clone())]
        );

        let jpeg = ExportOptions {
            format: "image/jpeg".into(),
            ..ExportOptions::default()
        };
        let err = editor.export(&jpeg).await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("UNSUPPORTED"));

        editor.close();
        let err = editor.export(&ExportOptions::default()).await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("CLOSED"));
    }
}
