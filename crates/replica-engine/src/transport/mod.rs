//! Pluggable transfer tools and their supervision.

mod command;
mod registry;
mod session;
mod traits;

pub use command::{CommandTransport, CommandTransportConfig, Credentials, source_path};
pub use registry::TransportRegistry;
pub use session::{SessionExit, TransportSession};
pub use traits::{TransferRequest, Transport};
