//! facecheck-hw — Camera capability boundary and V4L2 capture.
//!
//! The capture loop depends only on the `CameraOpener` / `CameraDevice`
//! traits; `V4lOpener` provides real devices.

pub mod camera;
pub mod frame;

pub use camera::{CameraDevice, CameraError, CameraOpener, V4lCamera, V4lOpener};
pub use frame::{Frame, PixelLayout};
