//! Raster plumbing between the browser and decoded pixels.
//!
//! Fetches the images and masks the workers hand back as Blob URLs,
//! and turns composited `RgbaImage`s back into PNG Blob URLs for
//! display.

use candlelit_core::{CompositeError, Mask, MaskRef, RgbaImage};
use image::ImageEncoder;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::BlobPropertyBag;

/// Errors that can occur while moving images in and out of the browser.
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    /// PNG encoding failed.
    #[error("PNG encoding failed: {0}")]
    PngEncode(String),

    /// The fetched bytes are not a readable image.
    #[error("image decoding failed: {0}")]
    Decode(String),

    /// The fetched bytes are not a usable mask.
    #[error(transparent)]
    Mask(#[from] CompositeError),

    /// A browser API call returned an error.
    #[error("browser API error: {0}")]
    JsError(String),
}

impl From<JsValue> for RasterError {
    fn from(value: JsValue) -> Self {
        Self::JsError(format!("{value:?}"))
    }
}

impl From<image::ImageError> for RasterError {
    fn from(err: image::ImageError) -> Self {
        Self::PngEncode(err.to_string())
    }
}

/// Encode an `RgbaImage` as PNG bytes.
///
/// # Errors
///
/// Returns [`RasterError::PngEncode`] if encoding fails.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, RasterError> {
    let mut png_bytes = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut png_bytes);
    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgba8,
    )?;
    Ok(png_bytes)
}

/// Wrap raw bytes in a Blob and return its object URL.
///
/// Uploaded files go through here to get a locator a worker can fetch.
/// The returned URL must be revoked via [`revoke_blob_url`] when no
/// longer needed.
///
/// # Errors
///
/// Returns [`RasterError::JsError`] if Blob or URL creation fails.
pub fn bytes_to_blob_url(bytes: &[u8], mime_type: &str) -> Result<String, RasterError> {
    let uint8_array = js_sys::Uint8Array::from(bytes);
    let parts = js_sys::Array::new();
    parts.push(&uint8_array);

    let opts = BlobPropertyBag::new();
    opts.set_type(mime_type);
    let blob = web_sys::Blob::new_with_u8_array_sequence_and_options(&parts, &opts)?;

    Ok(web_sys::Url::create_object_url_with_blob(&blob)?)
}

/// Encode an `RgbaImage` as a PNG Blob URL for use as an `<img src>`.
///
/// The returned URL must be revoked via [`revoke_blob_url`] when no
/// longer needed.
///
/// # Errors
///
/// Returns [`RasterError::PngEncode`] if PNG encoding fails.
/// Returns [`RasterError::JsError`] if Blob or URL creation fails.
pub fn rgba_image_to_blob_url(image: &RgbaImage) -> Result<String, RasterError> {
    bytes_to_blob_url(&encode_png(image)?, "image/png")
}

/// Fetch the bytes behind a URL (`blob:` or same-origin).
///
/// # Errors
///
/// Returns [`RasterError::JsError`] if there is no window, the fetch
/// fails, or the response is not OK.
#[allow(clippy::future_not_send)] // WASM is single-threaded; Send is not needed
pub async fn fetch_bytes(url: &str) -> Result<Vec<u8>, RasterError> {
    let window =
        web_sys::window().ok_or_else(|| RasterError::JsError("no global window".into()))?;
    let response: web_sys::Response = JsFuture::from(window.fetch_with_str(url))
        .await?
        .dyn_into()
        .map_err(|e| RasterError::JsError(format!("fetch did not return a Response: {e:?}")))?;
    if !response.ok() {
        return Err(RasterError::JsError(format!(
            "fetching {url} failed with status {}",
            response.status()
        )));
    }
    let buffer = JsFuture::from(response.array_buffer()?).await?;
    Ok(js_sys::Uint8Array::new(&buffer).to_vec())
}

/// Fetch and decode the image at `url`.
///
/// # Errors
///
/// Returns [`RasterError::Decode`] for unreadable image data, or any
/// error from [`fetch_bytes`].
#[allow(clippy::future_not_send)] // WASM is single-threaded; Send is not needed
pub async fn load_image(url: &str) -> Result<RgbaImage, RasterError> {
    let bytes = fetch_bytes(url).await?;
    let decoded =
        image::load_from_memory(&bytes).map_err(|e| RasterError::Decode(e.to_string()))?;
    Ok(decoded.to_rgba8())
}

/// Fetch and decode the mask a point-query produced.
///
/// # Errors
///
/// Returns [`RasterError::Mask`] for unusable mask data, or any error
/// from [`fetch_bytes`].
#[allow(clippy::future_not_send)] // WASM is single-threaded; Send is not needed
pub async fn load_mask(mask: &MaskRef) -> Result<Mask, RasterError> {
    let bytes = fetch_bytes(mask.locator()).await?;
    Ok(Mask::decode(&bytes)?)
}

/// Revoke a Blob URL previously created by [`bytes_to_blob_url`] or
/// [`rgba_image_to_blob_url`].
///
/// Best-effort: failures are silently ignored since the URL may have
/// already been revoked or garbage collected.
pub fn revoke_blob_url(url: &str) {
    let _ = web_sys::Url::revoke_object_url(url);
}
