//! Selected files and their preview resources
//!
//! A preview is a locally derived URI that must be released when the
//! selection that owns it goes away. [`PreviewHandle`] ties the two
//! together: it is minted once per selection, cannot be cloned, and
//! releases its URI exactly once when dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use bytes::Bytes;
use directories::ProjectDirs;
use image::ImageFormat;
use url::Url;

use crate::config::{PipelineConfig, PreviewKind};
use crate::error::{LeafscanError, Result};

/// Longest side, in pixels, of generated thumbnails
const THUMBNAIL_MAX_SIDE: u32 = 256;

// ---------------------------------------------------------------------------
// MediaFile
// ---------------------------------------------------------------------------

/// An image chosen by the user, held in memory.
///
/// Cloning is cheap; the bytes are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    name: String,
    content_type: String,
    bytes: Bytes,
}

impl MediaFile {
    /// Wraps already-loaded bytes without inspecting them.
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Reads `path`, accepting it only if the contents look like an image.
    ///
    /// # Errors
    ///
    /// Returns [`LeafscanError::Io`] if the file cannot be read, or
    /// [`LeafscanError::Validation`] if its format is not a recognized image.
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(LeafscanError::Io)?;
        let format = image::guess_format(&data).map_err(|_| {
            LeafscanError::Validation(format!("{} is not an image", path.display()))
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());

        Ok(Self::new(name, format.to_mime_type(), data))
    }

    /// File name used for the upload
    pub fn name(&self) -> &str {
        &self.name
    }

    /// MIME type, e.g. `image/jpeg`
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Raw contents
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

// ---------------------------------------------------------------------------
// Preview minting
// ---------------------------------------------------------------------------

/// Creates and releases preview URIs.
pub trait PreviewMinter: Send + Sync + std::fmt::Debug {
    /// Derives a preview URI for `file`.
    fn mint(&self, file: &MediaFile) -> Result<String>;

    /// Releases a URI previously returned by [`mint`](Self::mint).
    fn release(&self, uri: &str);
}

/// Owning handle for one minted preview.
#[derive(Debug)]
pub struct PreviewHandle {
    uri: String,
    minter: Arc<dyn PreviewMinter>,
}

impl PreviewHandle {
    /// Mints a preview for `file`, to be released when the handle drops.
    pub fn mint(minter: &Arc<dyn PreviewMinter>, file: &MediaFile) -> Result<Self> {
        let uri = minter.mint(file)?;
        Ok(Self {
            uri,
            minter: Arc::clone(minter),
        })
    }

    /// The preview URI
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.minter.release(&self.uri);
    }
}

/// The current selection: a file plus its preview, if one could be minted.
#[derive(Debug)]
pub struct SelectedMedia {
    /// The selected file
    pub file: MediaFile,
    /// Its preview; released together with the selection
    pub preview: Option<PreviewHandle>,
}

/// Builds the preview minter selected by configuration.
pub fn minter_from_config(config: &PipelineConfig) -> Result<Arc<dyn PreviewMinter>> {
    Ok(match config.preview {
        PreviewKind::Inline => Arc::new(InlineMinter),
        PreviewKind::Thumbnail => {
            let dir = match &config.preview_dir {
                Some(dir) if dir.is_relative() => std::env::current_dir()?.join(dir),
                Some(dir) => dir.clone(),
                None => ThumbnailMinter::default_dir()?,
            };
            Arc::new(ThumbnailMinter::new(dir))
        }
    })
}

// ---------------------------------------------------------------------------
// InlineMinter
// ---------------------------------------------------------------------------

/// Encodes the whole file as a `data:` URI. Release has nothing to free.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineMinter;

impl PreviewMinter for InlineMinter {
    fn mint(&self, file: &MediaFile) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(file.bytes());
        Ok(format!("data:{};base64,{}", file.content_type(), encoded))
    }

    fn release(&self, _uri: &str) {}
}

// ---------------------------------------------------------------------------
// ThumbnailMinter
// ---------------------------------------------------------------------------

/// Writes a PNG thumbnail per selection into a cache directory.
///
/// URIs are `file://` URLs; releasing one deletes the file.
#[derive(Debug, Clone)]
pub struct ThumbnailMinter {
    dir: PathBuf,
}

impl ThumbnailMinter {
    /// Creates a minter writing into `dir` (created on first mint).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<cache dir>/leafscan/previews`
    pub fn default_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "leafscan", "leafscan").ok_or_else(|| {
            LeafscanError::Storage("Could not determine cache directory".to_string())
        })?;
        Ok(proj_dirs.cache_dir().join("previews"))
    }
}

impl PreviewMinter for ThumbnailMinter {
    fn mint(&self, file: &MediaFile) -> Result<String> {
        let decoded = image::load_from_memory(file.bytes()).map_err(|e| {
            LeafscanError::Validation(format!("cannot decode {}: {}", file.name(), e))
        })?;
        let thumbnail = decoded.thumbnail(THUMBNAIL_MAX_SIDE, THUMBNAIL_MAX_SIDE);

        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.png", uuid::Uuid::new_v4()));
        thumbnail
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|e| LeafscanError::Storage(format!("failed to write preview: {}", e)))?;

        let uri = Url::from_file_path(&path).map_err(|_| {
            LeafscanError::Storage(format!("preview path is not absolute: {}", path.display()))
        })?;
        tracing::debug!("Minted preview {}", uri);
        Ok(uri.to_string())
    }

    fn release(&self, uri: &str) {
        let path = match Url::parse(uri).ok().and_then(|u| u.to_file_path().ok()) {
            Some(path) => path,
            None => {
                tracing::warn!("Cannot release unrecognized preview URI {}", uri);
                return;
            }
        };
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!("Failed to remove preview {}: {}", path.display(), e);
        }
    }
}
