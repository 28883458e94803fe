#![forbid(unsafe_code)]

pub mod error;
pub mod stats;

pub mod util {
    pub mod digest;
    pub mod hash_forward;
    pub mod paths;
}

pub mod codec;

pub mod container {
    pub mod escape;
    pub mod manifest;
    pub mod record;
}

pub mod scan {
    pub mod classify;
    pub mod ignore;
    pub mod kernel;
    pub mod protect;
    pub mod prune;
}

pub mod pack {
    pub mod writer;
}

pub mod read {
    pub mod extract;
}

pub mod sign {
    pub mod payload;
    pub mod token;
}

pub mod list;

// Re-exports: stable API surface
pub use container::manifest::{Manifest, ManifestFiles};
pub use container::record::{DirectoryEntry, Entry, EntryKind, RegularEntry, SymlinkEntry};
pub use error::{OtaError, Result};
pub use list::list;
pub use pack::writer::{CompressOptions, PackOptions, pack};
pub use read::extract::{ExtractOptions, extract};
pub use scan::classify::{Classification, Deletions, classify};
pub use scan::ignore::IgnoreRules;
pub use scan::kernel::{latest_kernel, list_non_latest_kernels};
pub use scan::protect::ProtectionPolicy;
pub use scan::prune::delete_path;
pub use sign::payload::{PayloadEntry, SignOptions, verify_manifest_hashes};
pub use sign::token::{Es256Signer, Signer, sign_metadata, verify_token};
pub use stats::{ExtractStats, Stats};
