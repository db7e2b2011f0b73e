//! Aggregation query compiler and bucket-result decompiler
//!
//! ```text
//! AggregationConfig → AggregationSpec
//!     ↓ FieldCatalog::discover (one network call, validation)
//! compile(spec, &catalog) → CompiledQuery (cached)
//!     ↓ render(now - period, now) each cycle
//! store search → raw response
//!     ↓
//! decompile(spec, compiled, response, reference_time) → Vec<Metric>
//! ```

pub mod catalog;
pub mod compiler;
pub mod decompiler;
pub mod spec;

pub use catalog::{FieldCatalog, FieldKind, FieldType};
pub use compiler::{compile, CompiledQuery, QueryMode};
pub use decompiler::{decompile, BucketContent, BucketNode};
pub use spec::{AggregationSpec, MetricFunction, MissingTagPolicy};
