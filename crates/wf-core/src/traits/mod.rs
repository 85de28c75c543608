//! Seams between the connection manager and its transports

mod session;
mod transfer;

pub use session::{RemoteSession, SessionFactory};
pub use transfer::FileTransporter;
