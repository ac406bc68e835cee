mod error;
pub mod protocol;
mod session;

pub use error::SessionError;
pub use session::{Session, SessionDeps, SessionPhase, SessionSettings};
