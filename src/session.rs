//! Sessions.
//!
//! A session keeps the defaults every request starts from (headers, auth,
//! cookies, proxies, hooks, middlewares) in a [`SessionCore`], selects an
//! adapter per request and follows redirects through a [`RedirectMachine`].
//!
//! [`Session`] drives blocking adapters, [`AsyncSession`] asynchronous ones.
//! Both share the same core, redirect rules and dispatch order:
//!
//! 1. `pre_request`: middlewares, then hooks of the prepared request.
//! 2. The adapter sends. It reports `pre_send`, `on_upload` and
//!    `early_response` back through the session.
//! 3. On adapter failure every middleware is offered the error.
//! 4. `response`: middlewares, then hooks.
//! 5. Cookies are persisted and redirects are followed.

mod async_session;
mod blocking;
mod redirects;
mod settings;

pub use async_session::AsyncSession;
pub use blocking::Session;
pub use redirects::{should_strip_auth, RedirectMachine, RedirectStep};
pub use settings::{CallOptions, SessionCore};
