pub mod assembler;
pub mod catalog;
pub mod filter;
pub mod join_path;
pub mod sql;
