//! Actor realisation of the session coordinator.
//!
//! ```text
//! CallHandle (cloneable, one per UI surface)
//!     │ mpsc + oneshot
//!     ▼
//! CallActor (one per call)
//! ├── owns session links, local media, registry, moderation, speaking
//! ├── spawns join / screen-share start tasks
//! └── consumes primary session events
//! ```
//!
//! # Modules
//!
//! - [`call`] - `CallActor` and its `CallHandle`
//! - [`messages`] - Mailbox messages, snapshot and update types

pub mod call;
pub mod messages;

pub use call::{CallActor, CallHandle};
pub use messages::*;
