mod backend;
pub mod backends;
mod result;

pub use backend::Detector;
pub use backends::{build_detector, ColorDetector, StubDetector};
pub use result::{non_max_suppression, BoundingBox, Detection};

#[cfg(feature = "backend-tract")]
pub use backends::YoloDetector;
