pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod hub;
pub mod outbound;
pub mod registry;
pub mod server;
