//! The administrative dialect: typed commands, the grammar that produces
//! them and the dispatcher that runs them against the catalog.

pub mod command;
pub mod dispatcher;
pub mod parser;

pub use command::{AdminCommand, ColumnName, CommentTarget, ObjectPrivilege, SystemPrivilege};
pub use dispatcher::{dispatch, run_all, CatalogRunner, ShowResult};
