//! Declarative fact extraction from network device command output.
//!
//! Each platform has a [`MappingTable`] entry describing, per sync job and
//! field, the commands to read and how to pick a value out of their output:
//!
//! ```text
//! raw outputs ─> parse ─> Query (path expression) ─> Template (post-processor)
//!                                                     └─> ResultShape ─> validator
//! ```
//!
//! Candidates are tried in declared order until one is accepted; composite
//! fields (interfaces, VLANs, VRFs) are evaluated once per member with the
//! member name bound as `current_key`. The [`Extractor`] never fails because
//! of bad data: empty fields are reported on the [`CanonicalRecord`].

mod canonical;
mod error;
mod mapping;
mod pipeline;
pub mod query;
mod shape;
pub mod template;

pub use canonical::{CanonicalRecord, HostOutputs, RawOutput};
pub use error::{ExtractError, ExtractResult};
pub use mapping::{
    Candidate, FieldRule, FieldTable, MappingTable, OutputParser, PlatformMapping, QueryRule,
    Validator,
};
pub use pipeline::{parse_output, Extractor};
pub use query::Query;
pub use shape::{is_empty_value, ResultShape};
pub use template::Template;
