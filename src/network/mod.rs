//! Device command server: line framing, the wire protocol and command dispatch.

pub mod framing;
pub mod handler;
pub mod protocol;
pub mod server;

pub use framing::LineFramer;
pub use handler::{CommandHandler, Handled};
pub use protocol::{encode_line, Command, CommandError, ProtocolError, Response, ResponseStatus};
pub use server::CommandServer;
