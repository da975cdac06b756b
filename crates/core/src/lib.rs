#![deny(unsafe_code)]

//! Multi-space chat core: a registry of independent conversations and the
//! engine that fans one user message out to all of them.

pub mod dispatch;
pub mod history;
pub mod ids;
pub mod message;
pub mod registry;
pub mod space;

pub use dispatch::{
    DispatchBatch, DispatchEngine, DispatchOutcome, DispatchReport, DispatchRequest,
    resolve_system_prompt,
};
pub use history::{export_file_name, format_all, format_space};
pub use ids::{MessageId, SpaceId};
pub use message::{Message, Role, Timestamp};
pub use registry::{SharedRegistry, SpaceEvent, SpaceRegistry};
pub use space::Space;
