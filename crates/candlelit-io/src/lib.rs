//! candlelit-io: Browser I/O for candlelit.
//!
//! Handles the web worker task channels, fetching worker-produced
//! images and masks, Blob URL creation, and file downloads.

pub mod download;
pub mod raster;
pub mod worker;

pub use download::{CUTOUT_FILENAME, DownloadError, download_cutout, trigger_download};
pub use raster::{
    RasterError, bytes_to_blob_url, encode_png, fetch_bytes, load_image, load_mask,
    revoke_blob_url, rgba_image_to_blob_url,
};
pub use worker::{WebWorkerChannel, WorkerError, deadline, worker_script};
