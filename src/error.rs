use std::io;

use crate::Vma;

/// Errors produced by this crate's public API.
///
/// Recoverable anomalies (an unresolved indirect target, an unexpected part
/// in a rendered instruction) are never represented here: they are logged
/// through the [`log`] facade and leave the affected edge absent instead of
/// aborting an analysis in progress. Only failures that a caller must react
/// to are modeled as variants.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The target could not be parsed by the object-file backend at all.
    #[error("backend could not recognise target file: {0}")]
    BackendUnavailable(#[source] object::read::Error),

    /// The target was recognised but is not an x86-32/x86-64 ELF.
    #[error("unsupported target architecture: {0:?}")]
    UnsupportedTarget(object::Architecture),

    /// `target_path` could not be opened or read.
    #[error("failed to read target file: {0}")]
    TargetUnreadable(#[source] io::Error),

    /// No section of the target covers the given address.
    #[error("no section covers address {0:#x}")]
    SectionNotFound(Vma),

    /// A section covering the address exists but its bytes could not be
    /// materialised (the file is shorter than the section header claims).
    #[error("failed to read contents of section covering {0:#x}: {1}")]
    SectionReadFailed(Vma, String),

    /// Allocation failure. Never constructed: ordinary allocation failure
    /// aborts the process in this implementation, but the variant is kept
    /// for interface completeness.
    #[error("out of memory")]
    OutOfMemory,
}

/// Convenience alias used throughout the crate's fallible APIs.
pub type Result<T> = std::result::Result<T, Error>;
