//! # vss-protocol
//!
//! VSS WebSocket protocol message types and frame encoding.
//!
//! ## Message Types
//!
//! - [`ClientRequest`] - parsed client frames (`get`, `set`, `subscribe`, ...)
//! - [`response`] - success/error envelope builders and the subscription
//!   event frame
//!
//! ## Codec
//!
//! [`codec::encode_frame`] renders frames as pretty-printed JSON, the format
//! the reference protocol emits.

pub mod codec;
pub mod messages;
pub mod response;

pub use codec::{encode_frame, CodecError};
pub use messages::{parse_request, ClientRequest, ParseOutcome, RequestError};
pub use response::ErrorKind;
