pub mod agents;
pub mod auth;
pub mod connections;
pub mod conversations;
pub mod crm;
pub mod dashboard;
pub mod media;
pub mod profiles;
pub mod tags;
pub mod webhooks;
