//! Task orchestration core.
//!
//! Wires the pieces together: the account registry and its instances, the
//! load balancer, the event correlator, the orchestrator's submit surface,
//! the dictionary caches and the lock/dedup primitives. The HTTP edge, the
//! chat transport and the storage adapters live outside this workspace and
//! talk to the engine through the `atelier_store` / `atelier_gateway` seams.

pub mod cache;
pub mod config;
pub mod correlator;
pub mod instance;
pub mod locks;
pub mod orchestrator;
pub mod poll;
pub mod registry;
pub mod selector;

pub use cache::DictionaryCache;
pub use config::EngineConfig;
pub use correlator::Correlator;
pub use instance::{Producer, UpstreamInstance};
pub use locks::{LockRegistry, SeenEvents};
pub use orchestrator::{
    ActionRequest, BlendRequest, DescribeRequest, EditRequest, ImagineRequest, ModalRequest,
    Orchestrator, ShortenRequest, ShowRequest, VideoRequest,
};
pub use poll::PollLoop;
pub use registry::AccountRegistry;
pub use selector::{SelectRequirements, Selector};
