//! HTTP/1.x machinery: error taxonomy, incremental request framing,
//! response serialization and the routing engine.

pub mod error;
pub mod framer;
pub mod request;
pub mod response;
pub mod router;

pub use error::{status_text, HttpError, RequestError};
pub use framer::Framer;
pub use request::Request;
pub use response::Response;
pub use router::{resolve, HandlerKind, RouteResult};
