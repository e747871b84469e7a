//! Purpose: Define the public Rust API for subscribing to PQStream change streams.
//! Exports: Client, subscription, transport seam, and the core value types they use.
//! Role: The only public path callers and the `pqs` binary need.
//! Invariants: Internal modules stay private; everything callers use is re-exported here.

mod client;
mod remote;
mod subscription;
pub mod transport;

pub use crate::core::error::{Error, ErrorKind, to_exit_code};
pub use crate::core::event::{ChangeEvent, DEFAULT_TABLE_EXPRESSION, FilterSpec, ListenRequest};
pub use crate::core::frame::Frame;
pub use crate::core::state::{Outcome, SubscriptionState};
pub use crate::core::status::{Code, Status};
pub use client::{
    ApiResult, ClientConfig, DEFAULT_ADDRESS, DEFAULT_CONNECT_TIMEOUT, Subscribe,
    SubscriptionClient,
};
pub use remote::{HttpTransport, LISTEN_CONTENT_TYPE, LISTEN_PATH};
pub use subscription::{CancelHandle, Notification, Subscription};
pub use transport::{FrameStream, Transport};
