//! Core data model types for threads, messages, drafts and CC lists.

pub mod attachment;
pub mod cc;
pub mod entry;
pub mod header;
pub mod ids;
