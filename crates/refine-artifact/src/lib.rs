//! Refine Artifact System
//!
//! Content-addressed appearance/behavior artifacts and the grammars used to
//! check them.
//!
//! # Core Concepts
//!
//! - [`Candidate`]: a proposed pair of fragments
//! - [`Artifact`]: an accepted, immutable candidate with a version
//! - [`ContentHash`]: 32-byte Blake3 hash over both fragments
//! - [`ChangeRequest`] / [`TargetDescriptor`]: what the caller asked for
//! - [`FragmentParser`]: grammar for one fragment, producing an [`Outline`]
//!
//! # Example
//!
//! ```rust,ignore
//! use refine_artifact::{Artifact, Candidate};
//! use refine_artifact::syntax::{BehaviorParser, FragmentParser};
//!
//! let candidate = Candidate::new(".btn { color: red; }", "document.querySelector('.btn');");
//! BehaviorParser.check(&candidate.behavior_instructions)?;
//! let artifact = Artifact::accept(candidate, 1);
//! println!("v{} {}", artifact.version(), artifact.hash().short());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod artifact;
mod hash;
mod request;

pub mod syntax;

pub use artifact::{Artifact, ArtifactError, Candidate};
pub use hash::{ContentHash, HashError};
pub use request::{ChangeRequest, RequestId, TargetDescriptor};
pub use syntax::{FragmentKind, FragmentParser, Outline, SyntaxError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
