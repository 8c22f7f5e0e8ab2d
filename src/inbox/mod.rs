//! Client-side inbox state with optimistic updates.

pub mod session;
pub mod view;

pub use session::{ApiClient, InboxSession};
pub use view::{InboxView, StatusRevert};
