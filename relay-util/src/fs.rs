use std::fs;
use std::io::{self, Write};
use std::path::Path;

use super::crypto::{ALPHA_NUM, pseudorandom_string};

/// Atomically creates a file with the given contents, overwriting
/// it if one exists.
///
/// The buffer is first written into a sibling temp file which is synced
/// to disk and then renamed over the destination, so readers either see
/// the old contents or the new ones, never a torn write.
pub fn safe_write_all<P: AsRef<Path>, B: AsRef<[u8]>>(path: P, buf: B) -> io::Result<()> {
    let tmp_ext = "sync-".to_owned() + &pseudorandom_string(ALPHA_NUM, 6);
    let tmp_path = path.as_ref().with_extension(tmp_ext);
    let mut tmp_file = fs::File::create(&tmp_path)?;

    tmp_file.write_all(buf.as_ref())?;
    tmp_file.flush()?;
    tmp_file.sync_all()?;
    drop(tmp_file);

    fs::rename(&tmp_path, path.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_replaces_existing_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        safe_write_all(&path, b"old").unwrap();
        safe_write_all(&path, b"new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        // no temp files are left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
