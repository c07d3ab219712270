//! # contact-identity - Contact identity resolution
//!
//! Links email addresses and phone numbers observed together into identity
//! clusters, so one customer known under several identifiers is reported once.
//!
//! ## Core Concepts
//!
//! - **Contact**: A single observed (email, phone number) row
//! - **Cluster**: One primary contact (the oldest) plus secondaries linked directly to it
//! - **Identify**: Resolve an observation, creating or merging clusters as needed
//! - **ConsolidatedContact**: The cluster summary returned to callers
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use contact_identity::{IdentifyRequest, IdentityResolver, InMemoryContactStore};
//!
//! let resolver = IdentityResolver::new(Arc::new(InMemoryContactStore::new()));
//!
//! resolver.identify(
//!     IdentifyRequest::builder()
//!         .email("george@hillvalley.edu")
//!         .phone_number("919191")
//!         .build()?,
//! )?;
//! resolver.identify(
//!     IdentifyRequest::builder()
//!         .email("biffsucks@hillvalley.edu")
//!         .phone_number("717171")
//!         .build()?,
//! )?;
//!
//! // Bridges the two clusters: the newer primary is demoted.
//! let contact = resolver.identify(
//!     IdentifyRequest::builder()
//!         .email("george@hillvalley.edu")
//!         .phone_number("717171")
//!         .build()?,
//! )?;
//! assert_eq!(contact.primary_contact_id.get(), 1);
//! assert_eq!(contact.phone_numbers, vec!["919191", "717171"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod consolidated;
pub mod contact;
pub mod error;
pub mod request;
pub mod time;

// Resolution and storage
pub mod resolver;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use config::{PrimarySelection, ResolverConfig};
pub use consolidated::{ConsolidatedContact, IdentifyResponse};
pub use contact::{Contact, ContactId, ContactUpdate, Link, LinkPrecedence, NewContact};
pub use error::{ExecutionError, IdentityError, IdentityResult, ValidationError};
pub use request::{IdentifyBuilder, IdentifyRequest};
pub use resolver::{Cluster, IdentityResolver, InvariantViolation, MatchKind};
pub use storage::{ContactSnapshot, ContactStore, InMemoryContactStore, StorageError};
pub use time::{Clock, ManualClock, SystemClock};

#[cfg(feature = "persistent")]
pub use storage::{open_store, PersistentConfig, PersistentContactStore};
