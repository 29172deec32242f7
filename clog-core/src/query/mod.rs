//! Query engine: hybrid free-text and structured search over the index.

pub mod filter;
pub mod search;

pub use filter::{
    fts_query, parse_age, parse_query, tokenize, Filter, FilterField, FilterOp, FilterSet,
    SqlFilter,
};
pub use search::{QueryEngine, MAX_HIGHLIGHT_CHARS, MAX_SESSION_RESULTS};
