use crate::device::{IdentityError, RegistryError};
use crate::link::LinkError;
use crate::relay::GpioError;
use crate::storage::StoreError;

/// Errors that end the process. Everything else is logged and dropped where
/// it happens.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("Device identity unavailable: {0}")]
    Identity(#[from] IdentityError),

    #[error("GPIO failure: {0}")]
    Gpio(#[from] GpioError),

    #[error("Persistent flag write failed: {0}")]
    Store(#[from] StoreError),

    #[error("Channel registry setup failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("Link setup failed: {0}")]
    Link(#[from] LinkError),

    #[error("{0} closed")]
    LinkClosed(&'static str),
}
