//! Requests, prepared requests, bodies and responses.

mod body;
mod json;
mod multipart;
mod prepared;
mod request;
mod response;
pub(crate) mod uri;

pub use body::{AsyncBodyStream, Body, BodyStream};
pub use multipart::FilePart;
pub use prepared::{BodyPosition, ConnectionInfo, PreparedRequest};
pub use request::{Request, RequestData};
pub use response::{AsyncRawBody, ContentChunks, RawBody, Response};
pub use uri::requote_uri;
