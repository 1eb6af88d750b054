use std::sync::Arc;

use crate::error::UploadError;
use crate::index::{ImageRecord, IndexManager};
use crate::store::ObjectStore;

pub const UNKNOWN_DEVICE: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub device_id: String,
    pub filename: String,
    pub image_path: String,
}

/// Writes one image per request and, best effort, notes it in the manifest.
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    index: Option<IndexManager>,
    images_root: String,
}

pub fn image_filename(device_id: &str, timestamp: u64) -> String {
    format!("{}_{}.jpg", device_id, timestamp)
}

pub fn image_path(images_root: &str, device_id: &str, filename: &str) -> String {
    format!("{}/{}/{}", images_root, device_id, filename)
}

/// Maps the raw `X-ESP-ID` value to a device id. Absent or blank means
/// `unknown`. Other values are kept as sent unless they would change the
/// shape of the image path.
pub fn device_id(header: Option<&str>) -> Result<String, UploadError> {
    let raw = match header {
        None => return Ok(UNKNOWN_DEVICE.to_string()),
        Some(raw) if raw.trim().is_empty() => return Ok(UNKNOWN_DEVICE.to_string()),
        Some(raw) => raw,
    };
    let structural = raw == "."
        || raw == ".."
        || raw.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if structural {
        Err(UploadError::Validation(format!(
            "invalid device id {:?}",
            raw
        )))
    } else {
        Ok(raw.to_string())
    }
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, index: Option<IndexManager>, images_root: &str) -> Uploader {
        Uploader {
            store,
            index,
            images_root: images_root.to_string(),
        }
    }

    /// Only the image write can fail the upload, the manifest update is
    /// logged and otherwise ignored.
    pub async fn upload(
        &self,
        device_id: &str,
        image: &[u8],
        timestamp: u64,
    ) -> Result<UploadReceipt, UploadError> {
        if image.is_empty() {
            return Err(UploadError::Validation("no image received".to_string()));
        }
        info!("image received from {}, size={} bytes", device_id, image.len());

        let filename = image_filename(device_id, timestamp);
        let path = image_path(&self.images_root, device_id, &filename);

        // no revision: a second upload in the same second conflicts here
        if let Err(e) = self
            .store
            .write(&path, image, None, &format!("Upload image from {}", device_id))
            .await
        {
            error!("storing {} failed: {}", path, e);
            return Err(e.into());
        }
        info!("image stored at {}", path);

        if let Some(index) = &self.index {
            let record = ImageRecord {
                filename: filename.clone(),
                path: path.clone(),
                timestamp,
            };
            match index.record(device_id, record).await {
                Ok(revision) => info!("{} updated for {} (sha {})", index.path(), device_id, revision),
                Err(e) => warn!("{} not updated for {}: {}", index.path(), path, e),
            }
        }

        Ok(UploadReceipt {
            device_id: device_id.to_string(),
            filename,
            image_path: path,
        })
    }
}
