//! Transformation module.
//!
//! - Matcher: binds file columns to destination fields
//! - Mapper: turns raw rows into import records

pub mod mapper;
pub mod matcher;

pub use mapper::{decode_multi_value, encode_multi_value, map_row, map_rows};
pub use matcher::ColumnMatcher;
