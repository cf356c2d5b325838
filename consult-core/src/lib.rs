//! Consult Core - Shared Types
//!
//! Request descriptions, cache keys, session identity, and the error types
//! shared by the cache, realtime, and sync crates. No networking lives here.

pub mod error;
pub mod request;
pub mod session;

pub use error::{FetchError, FetchResult, SessionError};
pub use request::{request_path, CacheKey, HttpRequest, Method, RequestOptions};
pub use session::{
    FileSessionStore, MemorySessionStore, Role, SessionIdentity, SessionStore, STUDENT_ID,
    TEACHER_ID, USER_EMAIL, USER_ID, USER_ROLE,
};
