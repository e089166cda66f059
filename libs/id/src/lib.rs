//! # lavanderia-id
//!
//! Typed ID types for the lavanderia backend.
//!
//! All record IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `cli_01HV4Z1FQ8W3ZB5N2XK7RJD0TA`
//! - `ord_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `mch_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//!
//! The prefix keeps an order id from being passed where a machine id is
//! expected, and the ULID keeps ids sortable by creation time.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
