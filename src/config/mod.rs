mod registry;
mod sync;

pub use registry::{RegistryConfig, host_from_url};
pub use sync::SyncConfig;
