//! Live MJPEG preview from a V4L2 camera on a Linux framebuffer, with
//! snapshots saved on demand.

pub mod camera;
pub mod config;
pub mod display;
pub mod event_loop;
pub mod readiness;
pub mod render;
pub mod shutdown;
pub mod snapshot;
