use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use base64::Engine as _;

use crate::errors::{AgentError, AgentResult};

/// One captured frame of the primary monitor, PNG-encoded, plus the artifact
/// file it was saved to so the UI can display it.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub png_bytes: Vec<u8>,
    pub base64: String,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait ScreenProvider: Send + Sync {
    async fn capture(&self) -> AgentResult<Screenshot>;
    async fn size(&self) -> AgentResult<(u32, u32)>;
}

/// xcap-backed capture of the primary monitor. Screenshot artifacts rotate
/// through ten slots in the given directory.
pub struct XcapScreen {
    shot_dir: PathBuf,
    counter: AtomicU32,
}

impl XcapScreen {
    pub fn new(shot_dir: PathBuf) -> Self {
        Self {
            shot_dir,
            counter: AtomicU32::new(0),
        }
    }

    fn capture_primary_png() -> AgentResult<(Vec<u8>, u32, u32)> {
        let monitors =
            xcap::Monitor::all().map_err(|e| AgentError::Screen(e.to_string()))?;
        let monitor = monitors
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Screen("no monitor found".into()))?;
        let image = monitor
            .capture_image()
            .map_err(|e| AgentError::Screen(e.to_string()))?;
        let (width, height) = (image.width(), image.height());

        let mut png = Vec::new();
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| AgentError::Screen(e.to_string()))?;
        Ok((png, width, height))
    }
}

#[async_trait]
impl ScreenProvider for XcapScreen {
    async fn capture(&self) -> AgentResult<Screenshot> {
        let (png_bytes, width, height) =
            tokio::task::spawn_blocking(Self::capture_primary_png)
                .await
                .map_err(|e| AgentError::Screen(format!("capture task failed: {e}")))??;

        let slot = self.counter.fetch_add(1, Ordering::Relaxed) % 10;
        let path = self.shot_dir.join(format!("screenshot_{slot}.png"));
        std::fs::create_dir_all(&self.shot_dir)?;
        std::fs::write(&path, &png_bytes)?;
        tracing::info!(path = %path.display(), width, height, "screenshot captured");

        let base64 = base64::engine::general_purpose::STANDARD.encode(&png_bytes);
        Ok(Screenshot {
            png_bytes,
            base64,
            path,
            width,
            height,
        })
    }

    async fn size(&self) -> AgentResult<(u32, u32)> {
        let (_, width, height) =
            tokio::task::spawn_blocking(Self::capture_primary_png)
                .await
                .map_err(|e| AgentError::Screen(format!("capture task failed: {e}")))??;
        Ok((width, height))
    }
}
