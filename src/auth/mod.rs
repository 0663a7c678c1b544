pub mod error;
pub mod session_store;

pub use error::AuthError;
pub use session_store::{LocalSession, MemorySessionStore, SignIn};
