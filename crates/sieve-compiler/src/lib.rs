//! sieve Filter Compiler
//!
//! This crate compiles ABP filter lists into declarative network rules.

pub mod list;
pub mod optimizer;
pub mod options;
pub mod parser;
pub mod whitelist;

pub use list::{compile_filter_list, CompileStats, CompiledList};
pub use options::{parse_options, ParsedOptions};
pub use parser::{parse_filter, Rejection};
pub use whitelist::{normalize_domain, normalize_whitelist, whitelist_rules};
