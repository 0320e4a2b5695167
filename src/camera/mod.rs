//! Camera acquisition.
//!
//! - Backends behind [`BackendProvider`] / [`FrameSource`], tried in a configurable order
//! - Lifecycle via [`CaptureManager`]
//! - Device enumeration via [`list_devices`]
//! - Configuration via [`CameraSettings`] and [`Resolution`]

mod backend;
mod device;
mod helper;
mod manager;
pub mod mock;
mod native;
mod rpicam;
mod types;

pub use backend::{providers_for, BackendProvider, FrameSource};
pub use device::list_devices;
pub use helper::HelperProvider;
pub use manager::CaptureManager;
pub use native::NativeProvider;
pub use rpicam::RpicamProvider;
pub use types::{
    BackendFailure, BackendKind, CameraError, CameraHandle, CameraInfo, CameraSelector,
    CameraSettings, CaptureState, Fidelity, Frame, HelperCommand, Resolution,
    EXTERNAL_PREVIEW_INTERVAL, IN_PROCESS_PREVIEW_INTERVAL,
};
