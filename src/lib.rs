//! `threadstore`: crash-safe on-disk thread storage for a peer-to-peer
//! messaging client.
//!
//! Each conversation is one file of message records followed by a JSON
//! index and CC list. Every mutation is built in a temp file, staged under a
//! name that says how to apply it, and applied by linking or patching the
//! thread file. A crash at any point leaves either the old state or a staged
//! transaction that [`ThreadStore::open`] completes.

pub mod codec;
pub mod config;
pub mod door;
pub mod durable;
pub mod error;
pub mod hooks;
pub mod layout;
pub mod model;
pub mod thread;
pub mod txn;

pub use error::{Result, StoreError};
pub use hooks::{Collaborators, NoopCollaborators};
pub use model::cc::{CcEntry, Identity};
pub use model::header::{DraftUpdate, MessageHeader, SubHeader};
pub use model::ids::LocalId;
pub use thread::{CcListing, CcView, IndexSummary, MessageSelection, StoreOptions, ThreadStore};
