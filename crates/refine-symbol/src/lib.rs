//! Refine Symbol System
//!
//! Identifiers for entities on the observable surface and the index that
//! proposes them.
//!
//! # Overview
//!
//! - **Identifier**: selector-like reference to a surface entity
//! - **IdentifierIndex**: async seam for identifier lookup
//! - **InMemoryIdentifierIndex**: radix-trie backed implementation
//! - **IdentifierIndexView**: immutable snapshot captured with each accepted artifact
//!
//! # Example
//!
//! ```rust
//! use refine_symbol::{Identifier, InMemoryIdentifierIndex};
//!
//! let index = InMemoryIdentifierIndex::new();
//! index.insert("#submit", Some("button"), "Submit order").unwrap();
//! assert_eq!(index.len(), 1);
//! assert!(index.remove(&Identifier::new("#submit")));
//! ```

#![warn(missing_docs)]

pub mod identifier;
pub mod index;
pub mod view;

// Re-exports
pub use identifier::{Identifier, IdentifierCandidate};
pub use index::{IdentifierIndex, InMemoryIdentifierIndex, IndexError, MAX_CANDIDATES};
pub use view::IdentifierIndexView;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for identifier operations
    pub use crate::{
        Identifier, IdentifierCandidate, IdentifierIndex, IdentifierIndexView,
        InMemoryIdentifierIndex, IndexError,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
