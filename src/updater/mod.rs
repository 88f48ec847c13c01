// src/updater/mod.rs

// Declare sub-modules for the update lifecycle
pub mod backend;
pub mod http;
pub mod manager;
pub mod messages;
pub mod metrics;
pub mod policy;
pub mod scheduler;
pub mod status;
pub mod utils;

pub use backend::UpdateBackend;
pub use manager::UpdateManager;
pub use messages::{ChannelObserver, UpdateEvent, UpdateObserver};
pub use metrics::DownloadMetrics;
pub use policy::{FilePolicyStore, MemoryPolicyStore, PolicyStore, VersionPolicy};
pub use scheduler::PollScheduler;
pub use status::{CheckOutcome, DownloadProgress, UpdateInfo, UpdateStatus};
