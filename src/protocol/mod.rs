// Module for PostgreSQL wire protocol implementation
pub mod messages;
pub mod codec;

pub use messages::*;
pub use codec::PostgresCodec;
