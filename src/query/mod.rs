// Statement pipeline: parse, bind, portals and by-pass execution
pub mod bypass;
pub mod cancel;
pub mod engine;
pub mod portal;
pub mod statement;

pub use cancel::CancelHandle;
pub use engine::{QueryEngine, StatementDescription};
pub use portal::{Batch, Portal, PortalState};
pub use statement::{ExecutableStatement, ParsedStatement, QueryType};
