//! Host environment collaborators: the external browser and local image selection

use std::path::Path;
use std::sync::Mutex;

use crate::error::AssetError;
use crate::types::{ImageAttachment, ImageMimeType};

/// Local image selection ceiling, independent of any provider's transport limit
pub const MAX_LOCAL_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

/// Hands URLs to the surrounding desktop environment
pub trait HostShell: Send + Sync {
    fn open_external_url(&self, url: &str) -> std::io::Result<()>;
}

/// Opens URLs in the user's default browser
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl HostShell for SystemBrowser {
    fn open_external_url(&self, url: &str) -> std::io::Result<()> {
        tracing::debug!(url, "Opening external URL");
        open::that(url)
    }
}

/// Prints the URL instead of opening it, for headless sessions
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintingShell;

impl HostShell for PrintingShell {
    fn open_external_url(&self, url: &str) -> std::io::Result<()> {
        eprintln!("Open this URL in your browser: {}", url);
        Ok(())
    }
}

/// Remembers every URL it was asked to open
#[derive(Debug, Default)]
pub struct RecordingShell {
    opened: Mutex<Vec<String>>,
}

impl RecordingShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl HostShell for RecordingShell {
    fn open_external_url(&self, url: &str) -> std::io::Result<()> {
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
        Ok(())
    }
}

/// Read a local image file into an attachment
///
/// The MIME type comes from the file extension. Files over
/// [`MAX_LOCAL_IMAGE_BYTES`] are rejected before they are read.
pub fn load_local_image(path: &Path) -> Result<ImageAttachment, AssetError> {
    let shown = path.display().to_string();
    let read_error = |e: std::io::Error| AssetError::Read {
        path: shown.clone(),
        message: e.to_string(),
    };

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    let mime_type = ImageMimeType::from_extension(extension)
        .ok_or_else(|| AssetError::UnsupportedType(shown.clone()))?;

    let metadata = std::fs::metadata(path).map_err(read_error)?;
    if metadata.len() > MAX_LOCAL_IMAGE_BYTES {
        return Err(AssetError::SelectionTooLarge {
            actual: metadata.len(),
            limit: MAX_LOCAL_IMAGE_BYTES,
        });
    }

    let bytes = std::fs::read(path).map_err(read_error)?;
    let mut attachment = ImageAttachment::new(bytes, mime_type);
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        attachment.name = name.to_string();
    }

    tracing::debug!(
        path = %shown,
        size = attachment.size_bytes(),
        mime = %attachment.mime_type,
        "Loaded local image"
    );
    Ok(attachment)
}
