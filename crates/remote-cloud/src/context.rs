//! Project directory archives shipped with a Dockerfile so `COPY`/`ADD`
//! steps can see project files.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

/// Directory names never archived.
const SKIPPED_DIRS: &[&str] = &[".git", ".venv", "__pycache__", "node_modules", "target"];

/// A gzipped tarball of a build context and its SHA-256.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    pub archive: Vec<u8>,
    /// Lowercase hex SHA-256 of `archive`.
    pub hash: String,
}

impl BuildContext {
    /// Archive `root`. Entries are sorted and timestamps zeroed, so an
    /// unchanged tree always hashes the same.
    pub async fn pack(root: &Path) -> ProviderResult<Self> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || pack_dir(&root))
            .await
            .map_err(|e| ProviderError::Context(format!("archive task failed: {e}")))?
    }

    pub fn from_archive(archive: Vec<u8>) -> Self {
        let hash = format!("{:x}", Sha256::digest(&archive));
        Self { archive, hash }
    }
}

fn pack_dir(root: &Path) -> ProviderResult<BuildContext> {
    let mut files = Vec::new();
    collect(root, Path::new(""), &mut files)?;

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for relative in &files {
        let full = root.join(relative);
        let mut file = std::fs::File::open(&full).map_err(|e| io_error(&full, e))?;
        let metadata = file.metadata().map_err(|e| io_error(&full, e))?;

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(metadata.len());
        header.set_mtime(0);
        header.set_mode(if metadata.permissions().mode() & 0o111 != 0 {
            0o755
        } else {
            0o644
        });
        builder
            .append_data(&mut header, relative, &mut file)
            .map_err(|e| io_error(&full, e))?;
    }

    let archive = builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(|e| ProviderError::Context(format!("finish archive: {e}")))?;
    let context = BuildContext::from_archive(archive);
    debug!(
        root = %root.display(),
        files = files.len(),
        bytes = context.archive.len(),
        hash = %context.hash,
        "build context packed"
    );
    Ok(context)
}

/// Regular files under `root/relative`, sorted by path. Symlinks are not
/// followed.
fn collect(root: &Path, relative: &Path, files: &mut Vec<PathBuf>) -> ProviderResult<()> {
    let dir = root.join(relative);
    let mut entries = std::fs::read_dir(&dir)
        .and_then(|entries| entries.collect::<std::io::Result<Vec<_>>>())
        .map_err(|e| io_error(&dir, e))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name();
        let path = relative.join(&name);
        let file_type = entry.file_type().map_err(|e| io_error(&entry.path(), e))?;
        if file_type.is_dir() {
            if SKIPPED_DIRS.iter().any(|skipped| name == *skipped) {
                continue;
            }
            collect(root, &path, files)?;
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

fn io_error(path: &Path, e: std::io::Error) -> ProviderError {
    ProviderError::Context(format!("{}: {e}", path.display()))
}
