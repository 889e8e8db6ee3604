//! # Mongres Query Language
//!
//! The loosely-typed filter and update documents of the document-database API are parsed here,
//! once and eagerly, into closed ASTs. Anything the backend compilers cannot express is rejected
//! at this stage, before a statement is ever built.
//!
//! ```rust
//! use mongres_ql::{Filter, Update};
//! use serde_json::json;
//!
//! let filter = Filter::try_from(json!({ "age": { "$gte": 45 }, "address.city": "Wonderland" })).unwrap();
//! let update = Update::try_from(json!({ "$set": { "age": 31 }, "$push": { "tags": "tag2" } })).unwrap();
//! assert_eq!(update.ops().len(), 2);
//! # let _ = filter;
//! ```

pub mod error;
pub mod filter;
pub mod id;
pub mod path;
pub mod update;
pub mod value;

pub use error::{ConflictReason, FilterError, PathError, UpdateError, ValueError};
pub use filter::{Comparison, ElemMatch, Filter, Operator};
pub use id::DocumentId;
pub use path::FieldPath;
pub use update::{Update, UpdateOp};
pub use value::{Document, Map, Number, Value, ID_FIELD, MAX_DEPTH};
