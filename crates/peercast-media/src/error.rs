use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Camera or microphone permission denied")]
    PermissionDenied,

    #[error("No capture devices available")]
    NoDevices,

    #[error("Failed to create local track: {0}")]
    Track(String),
}
