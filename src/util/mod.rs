
/// Helper functions for saving JSON stats files
pub mod json_io;
/// Little-endian length-prefixed primitives for the graph and index artifacts
pub mod serialize;
/// DNA byte helpers: complementing, validation, and the SV escape encoding
pub mod sequence;
