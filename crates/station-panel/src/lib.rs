//! Client-side sync engine for a remote station player.
//!
//! A [`dashboard::Dashboard`] owns at most one [`session::PanelSession`].
//! Each session keeps a [`view_state::ViewState`] in step with the backend
//! through snapshot pulls and a push stream, and turns user
//! [`dispatcher::Intent`]s into backend commands.

pub mod backend;
pub mod bot_status;
pub mod cli;
pub mod clock;
pub mod connection;
pub mod dashboard;
pub mod debounce;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod notice;
pub mod reconciler;
pub mod session;
pub mod view_state;

#[cfg(test)]
mod testing;

pub use dashboard::Dashboard;
pub use dispatcher::Intent;
pub use error::{Result, SyncError};
pub use session::{PanelEvent, ViewFrame};
