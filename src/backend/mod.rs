// Backend module - Vulkan abstraction layer
//
// Design: thin RAII wrappers around ash. Each wrapper releases its handle on
// drop and holds an Arc to whatever must outlive it, so destruction order
// follows ownership instead of being sequenced by hand.

pub mod commands;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::DeviceContext;
pub use error::Result;
pub use instance::InstanceContext;
pub use surface::{PresentTarget, Surface};
pub use swapchain::SwapRing;
