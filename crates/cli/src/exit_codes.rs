//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! | Code | Meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | 0    | Success                                                   |
//! | 1    | General error (unspecified)                               |
//! | 2    | Usage error (bad args; clap also exits 2)                 |
//! | 3    | Project configuration invalid (layout, formats, mapping)  |
//! | 4    | Input data cannot be reconciled (missing key, misaligned) |
//! | 5    | File missing or unreadable                                |
//! | 6    | Spreadsheet locked or read-only                           |
//! | 7    | `flags --strict` found data-quality flags                 |

use nodepix_io::SheetError;
use nodepix_recon::{ErrorKind, ReconError};

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Project file unreadable as configuration, or a layout that fails validation.
pub const EXIT_CONFIG: u8 = 3;

/// Inputs that cannot be reconciled (missing join key, misaligned sheet rows).
pub const EXIT_DATA: u8 = 4;

/// Input or output file missing, unreadable or unwritable.
pub const EXIT_IO: u8 = 5;

/// Target spreadsheet is open elsewhere or read-only. Nothing was written.
pub const EXIT_SHEET_LOCKED: u8 = 6;

/// `flags --strict` and at least one flag was raised.
pub const EXIT_FLAGS_FOUND: u8 = 7;

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err.kind() {
        ErrorKind::Configuration => EXIT_CONFIG,
        ErrorKind::Data => EXIT_DATA,
        ErrorKind::Resource => EXIT_IO,
    }
}

/// Map a spreadsheet error to its exit code.
pub fn sheet_exit_code(err: &SheetError) -> u8 {
    match err {
        SheetError::NotFound(_) | SheetError::Io(_) | SheetError::Invalid(_) => EXIT_IO,
        SheetError::Locked(_) => EXIT_SHEET_LOCKED,
        SheetError::Sync(e) => recon_exit_code(e),
    }
}
