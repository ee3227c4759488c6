// Module for type mappings and conversions
pub mod type_mapper;
pub mod value_converter;

pub use type_mapper::PgType;
pub use value_converter::{FormatCode, ValueConverter};
