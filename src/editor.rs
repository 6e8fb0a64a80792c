use crate::events::{Handler, Subscription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_PROPERTY_ID: &str = "tkdesigner";
pub const DEFAULT_TITLE: &str = "TK Designer";

/// Static editor template; combined with an API key and container id it
/// yields an [`EditorConfig`] for one initialization attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorSettings {
    pub property_id: String,
    /// Fixed container id; when unset a unique one is generated per mount.
    pub container_id: Option<String>,
    pub accessibility_title: String,
    pub debug: bool,
    pub use_picsart_inventory: bool,
    pub export_formats: Vec<String>,
    pub export_type: String,
    pub mode: String,
    pub theme: String,
    pub analytics: bool,
    pub features: Features,
    pub categories: Categories,
    pub branding: Branding,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            property_id: DEFAULT_PROPERTY_ID.to_string(),
            container_id: None,
            accessibility_title: DEFAULT_TITLE.to_string(),
            debug: true,
            use_picsart_inventory: true,
            export_formats: vec!["image/png".into(), "image/jpeg".into()],
            export_type: "blob".into(),
            mode: "image".into(),
            theme: "light".into(),
            analytics: false,
            features: Features::default(),
            categories: Categories::default(),
            branding: Branding::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    pub undo_redo_controls: bool,
    pub zoom_controls: bool,
    pub tools: Vec<String>,
}

impl Default for Features {
    fn default() -> Self {
        let tools = [
            "effects",
            "eraser",
            "duplicate",
            "adjust",
            "edit",
            "color",
            "gradient",
            "font",
            "border",
            "outline",
            "shadow",
            "crop",
            "flip_rotate",
            "position",
            "tool_removeBG",
        ];
        Self {
            undo_redo_controls: true,
            zoom_controls: true,
            tools: tools.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Categories {
    pub templates: serde_json::Map<String, serde_json::Value>,
    pub photos: PhotosCategory,
    pub text: TitledCategory,
    pub uploads: TitledCategory,
    pub elements: ElementsCategory,
    pub background: BackgroundCategory,
}

impl Default for Categories {
    fn default() -> Self {
        Self {
            templates: serde_json::Map::new(),
            photos: PhotosCategory {
                thumbnail_header: false,
            },
            text: TitledCategory { title: false },
            uploads: TitledCategory { title: false },
            elements: ElementsCategory { small_title: true },
            background: BackgroundCategory {
                header: false,
                tabs: vec!["Color".into()],
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotosCategory {
    pub thumbnail_header: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitledCategory {
    pub title: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementsCategory {
    pub small_title: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundCategory {
    pub header: bool,
    pub tabs: Vec<String>,
}

/// Brand palette, as hex colors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branding {
    pub accents: String,
    pub hover: String,
    pub main: String,
    pub texts: String,
    pub background: String,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            accents: "#eec443".into(),
            hover: "#eed792".into(),
            main: "#1f3b5e".into(),
            texts: "#ffffff".into(),
            background: "#0a1e37".into(),
        }
    }
}

/// The object handed to the vendor SDK constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorConfig {
    pub property_id: String,
    pub container_id: String,
    pub api_key: String,
    pub accessibility_title: String,
    pub debug: bool,
    pub use_picsart_inventory: bool,
    pub export_formats: Vec<String>,
    pub export_type: String,
    pub mode: String,
    pub theme: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub analytics: bool,
    pub features: Features,
    pub categories: Categories,
    pub branding: Branding,
}

impl EditorConfig {
    pub fn build(settings: &EditorSettings, api_key: &str, container_id: &str) -> Self {
        Self {
            property_id: settings.property_id.clone(),
            container_id: container_id.to_string(),
            api_key: api_key.to_string(),
            accessibility_title: settings.accessibility_title.clone(),
            debug: settings.debug,
            use_picsart_inventory: settings.use_picsart_inventory,
            export_formats: settings.export_formats.clone(),
            export_type: settings.export_type.clone(),
            mode: settings.mode.clone(),
            theme: settings.theme.clone(),
            origin: None,
            domain: None,
            user_agent: None,
            analytics: settings.analytics,
            features: settings.features.clone(),
            categories: settings.categories.clone(),
            branding: settings.branding.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOptions {
    pub title: String,
    pub theme: String,
    pub quality: u8,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            theme: "light".into(),
            quality: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportOptions {
    pub format: String,
    pub quality: u8,
    pub transparent: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: "png".into(),
            quality: 100,
            transparent: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportedDesign {
    pub format: String,
    pub data: Vec<u8>,
}

/// Error reported by the vendor editor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}{}", .code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
pub struct VendorError {
    pub code: Option<String>,
    pub message: String,
    pub status: Option<u16>,
}

impl VendorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[allow(dead_code)]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Authentication failures are not worth retrying.
    pub fn is_auth(&self) -> bool {
        matches!(self.code.as_deref(), Some("AUTH_ERROR") | Some("401")) || self.status == Some(401)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    Opened,
    Error(VendorError),
    Exported(ExportedDesign),
}

/// A constructed vendor editor bound to one container.
#[async_trait]
pub trait EditorInstance: Send + Sync {
    fn subscribe(&self, handler: Handler<EditorEvent>) -> Subscription;
    fn open(&self, options: &OpenOptions);
    fn close(&self);
    async fn export(&self, options: &ExportOptions) -> Result<ExportedDesign, VendorError>;
}

/// The SDK entry point exposed once the script has evaluated.
pub trait EditorSdk: Send + Sync {
    fn create(&self, config: EditorConfig) -> Result<Arc<dyn EditorInstance>, VendorError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("script request failed: {0}")]
    Network(String),
    #[error("script request returned status {0}")]
    Status(u16),
}

/// Injects the SDK script and hands back what it produced.
#[async_trait]
pub trait ScriptLoader: Send + Sync {
    async fn load(&self, src: &str) -> Result<Box<dyn LoadedScript>, ScriptError>;
}

pub trait LoadedScript: Send + Sync {
    /// The SDK entry point, if the script has registered one.
    fn entry_point(&self) -> Option<Arc<dyn EditorSdk>>;
}
