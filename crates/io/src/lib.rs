// File I/O operations

pub mod csv;
pub mod report;
pub mod xlsx;

pub use xlsx::{read_headers, sync_workbook, SheetError, XlsxSheet};
