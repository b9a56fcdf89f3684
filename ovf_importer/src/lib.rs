//! Imports an OVF (Open Virtualization Format) envelope into a `Config`
//! plus the list of disk images it references, ready for the storage
//! layer to allocate volumes for and the caller to fold into a fresh VM
//! config.

pub mod error;
pub mod model;
pub mod parse;
pub mod security;

pub use error::{OvfError, Result};
pub use model::{interface_for_controller, resource_type, ImportResult, ImportedDisk};

use std::path::Path;

/// Parse the `.ovf` file at `path` and resolve every disk it references.
/// This is the crate's only entry point; everything else is exposed for
/// testing and for callers that need the individual resolution steps.
pub fn import_ovf(path: &Path) -> Result<ImportResult> {
    parse::parse_ovf(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_reports_read_error() {
        let err = import_ovf(Path::new("/nonexistent/path/to/vm.ovf")).unwrap_err();
        assert!(matches!(err, OvfError::Read { .. }));
    }
}
