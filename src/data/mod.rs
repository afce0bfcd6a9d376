/// Winnow helpers for reading big-endian KCL data
pub mod parser_utils;
/// Output cursor with reserve/satisfy offset patching
pub mod writer;
