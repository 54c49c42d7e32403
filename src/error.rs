use thiserror::Error;

/// Failures that are fatal to a single viewer instance.
///
/// Anything recoverable (font mounting, content transforms, style
/// application) is logged where it happens and never reaches this type.
#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("viewer already initialized or destroyed")]
    AlreadyInitialized,

    #[error("viewer is not ready")]
    NotReady,

    #[error("failed to create rendering surface: {0:#}")]
    SurfaceCreation(#[source] anyhow::Error),

    #[error("failed to open document: {0:#}")]
    Open(#[source] anyhow::Error),

    #[error("failed to navigate to the initial position: {0:#}")]
    InitialNavigation(#[source] anyhow::Error),
}

impl ViewerError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ViewerError::NotReady)
    }
}
