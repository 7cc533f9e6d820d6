use std::io::{self, Write};

use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use tracing::{info, instrument, warn};

use crate::util::timestamp_now_ms;

const TEMP_PREFIX: &str = "temp-";

pub fn add_temp_prefix(path: &Path) -> io::Result<PathBuf> {
    let result: Option<_> = (|| {
        let name = path.file_name()?;
        let new_name = format!(
            "{TEMP_PREFIX}{}-{}-{}",
            timestamp_now_ms(),
            std::process::id(),
            name
        );
        Some(path.parent()?.join(new_name))
    })();
    result.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Invalid file path: {path}"),
        )
    })
}

/// Replaces the file at `path` with `contents` so that readers see either the
/// old or the new file, never a partial write.
pub async fn write_atomic(path: &Path, contents: Vec<u8>) -> io::Result<()> {
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &contents))
        .await
        .map_err(io::Error::other)?
}

pub fn write_atomic_blocking(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = add_temp_prefix(path)?;
    let result = (|| {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

/// Removes leftovers of writes interrupted by a crash.
#[instrument(skip_all)]
pub fn remove_temps(dir: &Path) -> anyhow::Result<usize> {
    let pattern = dir.join(format!("{TEMP_PREFIX}*"));
    let mut removed = 0;
    for entry in glob::glob(pattern.as_str())? {
        match entry {
            Ok(path) => {
                info!("Removing temp file '{}'", path.display());
                std::fs::remove_file(&path)?;
                removed += 1;
            }
            Err(e) => warn!("Couldn't read dir: {}", e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_temp_prefix_stays_in_dir() {
        let tmp = add_temp_prefix(Path::new("data/sunspots.csv")).unwrap();
        assert_eq!(tmp.parent(), Some(Path::new("data")));
        let name = tmp.file_name().unwrap();
        assert!(name.starts_with("temp-"));
        assert!(name.ends_with("-sunspots.csv"));
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_contents() {
        let (_dir, root) = temp_root();
        let path = root.join("sunspots.csv");
        write_atomic(&path, b"1770,101\n".to_vec()).await.unwrap();
        write_atomic(&path, b"1771,82\n".to_vec()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1771,82\n");
        assert_eq!(std::fs::read_dir(root.as_std_path()).unwrap().count(), 1);
    }

    #[test]
    fn test_remove_temps() {
        let (_dir, root) = temp_root();
        std::fs::write(root.join("temp-1-2-sunspots.csv"), "1770,1").unwrap();
        std::fs::write(root.join("sunspots.csv"), "1770,1").unwrap();
        assert_eq!(remove_temps(&root).unwrap(), 1);
        assert!(root.join("sunspots.csv").exists());
        assert!(!root.join("temp-1-2-sunspots.csv").exists());
    }
}
