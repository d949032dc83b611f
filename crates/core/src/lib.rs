//! `nodepix-core` - shared table model.
//!
//! Every pipeline stage consumes one or more [`Table`]s and returns a new one.
//! Cells are nullable; columns carry a [`ColumnRole`] assigned once when the
//! column is produced, so later stages never select columns by name fragments.

pub mod stamp;
pub mod table;

pub use stamp::{format_stamp, parse_stamp, parse_stamp_lenient, StampParse};
pub use table::{cell_is_blank, Cell, Column, ColumnRole, Table, Value};
