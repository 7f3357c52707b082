//! 租户域：会话注册表、房间广播扇出与加入协议

pub mod client;
pub mod domain;
pub mod registry;

pub use client::{ClientSession, SessionPhase};
pub use domain::{Audience, Domain, SessionInfo};
pub use registry::DomainRegistry;
