//! The sqz archive engine: entry header format, entry iteration and
//! extraction, single-pass multi-remove, and the concurrent append
//! pipeline (thread pool, encoder pool, append scheduler).
//!
//! The compression codecs themselves live in `sqz_codecs`; this crate
//! wires them into archive semantics.

pub mod append;
pub mod encoder_pool;
pub mod entry;
pub mod extract;
pub mod header;
pub mod input;
pub mod iterator;
pub mod ioutil;
pub mod output;
pub mod pool;
pub mod remove;
pub mod scheduler;
pub mod squeeze;
pub mod status;

pub use append::Appender;
pub use entry::{EntryAttributes, EntryPermissions, EntryType, SemVer};
pub use extract::Extracter;
pub use header::{EntryHeader, ENCODED_STATIC_SIZE};
pub use input::{CustomContent, CustomContentEntryInput, EntryContent, EntryInput, FileEntryInput};
pub use ioutil::Truncate;
pub use iterator::Entries;
pub use output::{EntryOutput, FileEntryOutput, StreamEntryOutput};
pub use remove::Remover;
pub use squeeze::Squeeze;
pub use status::StatusCell;
