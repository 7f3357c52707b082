pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod schema;
pub mod security;
pub mod server;
pub mod transport;

pub use config::ServerConfig;
pub use domain::{Audience, Domain, DomainRegistry, SessionPhase};
pub use error::{RelayError, Result};
pub use schema::MessageValidator;
pub use security::FloodGuard;
pub use server::RelayServer;
pub use transport::{EventSink, RecordingSink};
