//! Cookies: [`Cookie`], [`CookieJar`] and the shared [`CookieJarHandle`].

mod cookie;
mod cookie_jar;

pub use cookie::Cookie;
pub use cookie_jar::CookieJar;
pub use cookie_jar::CookieJarHandle;
