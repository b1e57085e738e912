//! Dialog turns and their session log.
//!
//! * [`DialogManager`]: runs one turn: legacy commands, model reply, tool
//!   and sub-agent dispatch, summary, record.
//! * [`SessionLog`] / [`JsonlSessionStore`]: append-only turn records.

pub mod manager;
pub mod session;

pub use manager::{DialogManager, DialogTurn};
pub use session::{JsonlSessionStore, SessionError, SessionLog};
