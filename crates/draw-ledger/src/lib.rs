//! Durable journal for the draw engine.
//!
//! Every committed [`DrawEvent`](draw_core::DrawEvent) is written as one JSON
//! line carrying its height, the digest of the previous entry and its own
//! digest. Loading walks the chain and refuses a journal whose links or
//! digests do not match.

mod chain;
mod journal;

pub use chain::{entry_digest, genesis, ChainHead, JournalEntry};
pub use journal::FileJournal;
