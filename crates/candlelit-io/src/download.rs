//! File download via Blob URLs.
//!
//! The browser has no direct "save file" call. This module triggers
//! downloads by creating a `Blob`, generating an object URL, and
//! programmatically clicking a temporary `<a>` element.
//!
//! All functions in this module require a browser environment
//! (`wasm32-unknown-unknown` target).

use candlelit_core::{Mask, RgbaImage, cutout};
use wasm_bindgen::JsCast;
use wasm_bindgen::JsValue;

use crate::raster::{RasterError, bytes_to_blob_url, encode_png};

/// File name used for segmentation cut-outs.
pub const CUTOUT_FILENAME: &str = "cutout.png";

/// Errors that can occur when triggering a file download.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The payload could not be prepared.
    #[error(transparent)]
    Raster(#[from] RasterError),

    /// A browser API call returned an error.
    #[error("browser API error: {0}")]
    JsError(String),
}

impl From<JsValue> for DownloadError {
    fn from(value: JsValue) -> Self {
        Self::JsError(format!("{value:?}"))
    }
}

/// Trigger a file download in the browser.
///
/// Creates a `Blob` from `data`, generates an object URL, and
/// programmatically clicks a temporary `<a download="filename">` element.
/// The object URL is revoked after the click.
///
/// # Errors
///
/// Returns [`DownloadError::JsError`] if any browser API call fails
/// (e.g., `Blob` creation, `URL.createObjectURL`, element creation).
pub fn trigger_download(data: &[u8], filename: &str, mime_type: &str) -> Result<(), DownloadError> {
    let window =
        web_sys::window().ok_or_else(|| DownloadError::JsError("no global window".into()))?;
    let document = window
        .document()
        .ok_or_else(|| DownloadError::JsError("no document".into()))?;

    let url = bytes_to_blob_url(data, mime_type)?;

    let anchor: web_sys::HtmlAnchorElement = document
        .create_element("a")?
        .dyn_into::<web_sys::HtmlAnchorElement>()
        .map_err(|e| DownloadError::JsError(format!("failed to cast element: {e:?}")))?;

    anchor.set_href(&url);
    anchor.set_download(filename);

    let body = document
        .body()
        .ok_or_else(|| DownloadError::JsError("no document body".into()))?;
    body.append_child(&anchor)?;
    anchor.click();

    // The download is already initiated; cleanup failures are not
    // download failures.
    let _ = body.remove_child(&anchor);
    let _ = web_sys::Url::revoke_object_url(&url);

    tracing::debug!(filename, bytes = data.len(), "download triggered");
    Ok(())
}

/// Cut the masked region out of `image` and download it as
/// [`CUTOUT_FILENAME`].
///
/// # Errors
///
/// Returns [`DownloadError::Raster`] if PNG encoding fails, or
/// [`DownloadError::JsError`] if a browser API call fails.
pub fn download_cutout(image: &RgbaImage, mask: &Mask) -> Result<(), DownloadError> {
    let png = encode_png(&cutout(image, mask))?;
    trigger_download(&png, CUTOUT_FILENAME, "image/png")
}
