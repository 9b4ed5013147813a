//! moodlink-hw — Hardware abstraction for camera capture and the serial link.
//!
//! Provides a V4L2 camera implementing [`moodlink_core::FrameSource`] and an
//! owned, self-reopening serial port used as the label transport.

pub mod camera;
pub mod frame;
pub mod link;

pub use camera::{Camera, CameraError};
pub use frame::PixelFormat;
pub use link::{LinkError, LinkSettings, SerialLink};
