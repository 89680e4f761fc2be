use anyhow::Result;
use image::RgbImage;

use crate::detect::result::Detection;

/// Object detector trait.
///
/// The inference service treats a detector as an opaque capability: an image
/// goes in, labeled boxes come out. Implementations must be reentrant because
/// the HTTP server runs one request per thread against a shared detector.
pub trait Detector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a decoded RGB image.
    ///
    /// Only detections scoring at least `threshold` are returned. Box
    /// coordinates are in pixels of `image`.
    fn infer(&self, image: &RgbImage, threshold: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, called once before the server starts accepting.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
