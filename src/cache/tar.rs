use std::io::{self, Cursor};
use std::path::Path;

use tar::{Archive, Builder};

/// Serialize a directory tree into an in-memory tar archive.
pub fn pack(dir: &Path) -> io::Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    builder.append_dir_all(".", dir)?;
    builder.into_inner()
}

/// Unpack a tar archive into `dir`.
pub fn unpack(bytes: &[u8], dir: &Path) -> io::Result<()> {
    let mut archive = Archive::new(Cursor::new(bytes));
    archive.unpack(dir)
}
