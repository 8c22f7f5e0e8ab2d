pub mod profile;
pub mod agent;
pub mod conversation;
pub mod message;
pub mod connection;
pub mod crm;
pub mod tag;
pub mod media;

pub use profile::*;
pub use agent::*;
pub use conversation::*;
pub use message::*;
pub use connection::*;
pub use crm::*;
pub use tag::*;
pub use media::*;
