// Renderer error kinds
//
// Every failure in the backend is fatal to the caller: nothing here retries,
// and nothing degrades. The kinds exist so the caller can report *why*.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RendererError {
    /// Missing loader, instance extension, or validation layer
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// No adapter exposes the queues, extensions, and surface support we need
    #[error("no capable GPU found ({0} adapters enumerated)")]
    NoCapableDevice(usize),

    /// An API object could not be constructed
    #[error("failed to create {what}: {result}")]
    ResourceCreation {
        what: &'static str,
        result: vk::Result,
    },

    /// A fence wait ran past its bound; treated as device loss
    #[error("timed out waiting for {0}")]
    SyncTimeout(&'static str),

    /// Acquire, submit, present, or idle-wait failed
    #[error("{op} failed: {result}")]
    Device {
        op: &'static str,
        result: vk::Result,
    },

    /// The swap ring no longer matches the surface
    #[error("swap ring is out of date with its surface")]
    SurfaceOutOfDate,

    #[error("invalid shader binary {path:?}: {source}")]
    Shader {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RendererError {
    pub fn creation(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::ResourceCreation { what, result }
    }

    pub fn device(op: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SurfaceOutOfDate,
            result => Self::Device { op, result },
        }
    }
}

pub type Result<T> = std::result::Result<T, RendererError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_is_its_own_kind() {
        let err = RendererError::device("present")(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(matches!(err, RendererError::SurfaceOutOfDate));

        let err = RendererError::device("present")(vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(
            err,
            RendererError::Device { op: "present", result: vk::Result::ERROR_DEVICE_LOST }
        ));
    }

    #[test]
    fn creation_names_the_object() {
        let err = RendererError::creation("render pass")(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(err.to_string().starts_with("failed to create render pass"));
    }
}
