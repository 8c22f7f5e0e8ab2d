pub mod agents;
pub mod auth;
pub mod connections;
pub mod conversations;
pub mod crm;
pub mod dashboard;
pub mod gateway;
pub mod media;
pub mod poller;
pub mod profiles;
pub mod signature;
pub mod tags;
