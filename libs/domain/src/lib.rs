//! Ticketflow Domain - core types for the workflow orchestration engine.
//!
//! Contains the data model only: no behavior beyond small invariant-local
//! helpers (`is_terminal`, `is_same_person`, and the like). Every type here
//! is `Serialize`/`Deserialize` and most carry `#[typeshare]` for the
//! generated TypeScript bindings a caller's HTTP layer would consume.

pub mod approval;
pub mod audit;
pub mod change_request;
pub mod enums;
pub mod ids;
pub mod info_request;
pub mod notification;
pub mod ticket;
pub mod user;
pub mod workflow;

pub use approval::*;
pub use audit::*;
pub use change_request::*;
pub use enums::*;
pub use ids::*;
pub use info_request::*;
pub use notification::*;
pub use ticket::*;
pub use user::*;
pub use workflow::*;
