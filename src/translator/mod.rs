// Module for table name translation and parameter type inference
pub mod table_name;
pub mod param_types;

pub use param_types::infer_param_types;
pub use table_name::{parse_single, TableNameTranslator};
