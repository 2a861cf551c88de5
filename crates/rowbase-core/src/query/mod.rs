//! Query engine.
//!
//! Filters, sorts and paginates the rows of one entity, honoring tenant
//! scoping and per-row read permissions.

mod engine;
pub mod filter;
mod request;

pub use engine::QueryEngine;
pub use filter::{compile_filters, like_match, CompiledFilter, FilterOp, FilterOperand, RowFilter};
pub use request::{QueryRequest, RowPage, ALL_ROWS, DEFAULT_PAGE_SIZE};
