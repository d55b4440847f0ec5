//! Detector adapter.
//!
//! The detection model is opaque: a backend takes a frame and returns
//! labeled, confidence-scored boxes. Label normalization and thresholding
//! happen downstream, in the session.

mod backend;
mod backends;
mod result;

use anyhow::{anyhow, Result};

pub use backend::DetectorBackend;
pub use backends::ScriptedBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{BoundingBox, Detection, RawLabel};

use crate::config::ClipperConfig;

/// Build the detector backend named by `name` for one source.
///
/// Each source gets its own instance; backends are never shared.
pub fn backend_from_config(
    name: &str,
    cfg: &ClipperConfig,
    script: Option<&std::path::Path>,
) -> Result<Box<dyn DetectorBackend>> {
    match name {
        "scripted" | "stub" => match script {
            Some(path) => Ok(Box::new(ScriptedBackend::from_file(path)?)),
            None => Ok(Box::new(ScriptedBackend::new())),
        },
        "tract" => {
            #[cfg(feature = "backend-tract")]
            {
                let backend = TractBackend::from_config(cfg)?;
                Ok(Box::new(backend))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                let _ = cfg;
                Err(anyhow!("the tract backend requires the backend-tract feature"))
            }
        }
        other => Err(anyhow!("unknown detector backend '{}'", other)),
    }
}
