pub mod adapters;
pub mod auth;
pub mod clock;
pub mod config;
pub mod cookies;
pub mod env;
pub mod errors;
pub mod hooks;
pub mod middleware;
pub mod models;
pub mod proxies;
pub mod session;
pub mod sgi;

pub use adapters::{Adapter, AsyncAdapter, SendSettings, TlsVerify};
pub use errors::{HttpError, Result};
pub use hooks::{AsyncHook, Hook, HookEvent, HookHandler, HookStore};
pub use middleware::{AsyncMiddleware, Middleware};
pub use models::{PreparedRequest, Request, Response};
pub use session::{AsyncSession, CallOptions, Session, SessionCore};
