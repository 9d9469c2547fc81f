use crate::backup::Backup;
use crate::error::{Stage, UpdateError};
use crate::merge::MergedDocument;
use std::{
    fs,
    io::{self, Write},
    path::Path,
};
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Replace the live configuration with a validated merge.
///
/// Returns warnings for metadata that could not be carried over from the
/// backup; those never fail the install.
pub fn install(
    merged: &MergedDocument,
    config_path: &Path,
    backup: Option<&Backup>,
) -> Result<Vec<String>, UpdateError> {
    write_atomic(config_path, merged.rendered.as_bytes())
        .map_err(|e| UpdateError::io(Stage::Install, config_path, e))?;

    let warnings = match backup {
        Some(b) => match fs::metadata(&b.path) {
            Ok(meta) => copy_metadata(&meta, config_path),
            Err(e) => {
                let w = format!("read metadata of {}: {e}", b.path.display());
                warn!("{w}");
                vec![w]
            }
        },
        None => Vec::new(),
    };
    info!("installed {} ({} bytes)", config_path.display(), merged.rendered.len());
    Ok(warnings)
}

/// Put the backup bytes back over the live file.
///
/// Returns whether anything was restored (`false` when there was no prior
/// file) and the metadata warnings, as [`install`] does.
pub fn rollback(config_path: &Path, backup: Option<&Backup>) -> io::Result<(bool, Vec<String>)> {
    let Some(b) = backup else {
        info!("no backup to roll back to, {} left as is", config_path.display());
        return Ok((false, Vec::new()));
    };
    let bytes = fs::read(&b.path)?;
    write_atomic(config_path, &bytes)?;
    let warnings = match fs::metadata(&b.path) {
        Ok(meta) => copy_metadata(&meta, config_path),
        Err(e) => {
            let w = format!("read metadata of {}: {e}", b.path.display());
            warn!("{w}");
            vec![w]
        }
    };
    warn!("rolled back {} from {}", config_path.display(), b.path.display());
    Ok((true, warnings))
}

/// Write `bytes` to a sibling temp file and rename it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Best-effort copy of permission bits and ownership onto `to`.
pub fn copy_metadata(from: &fs::Metadata, to: &Path) -> Vec<String> {
    let mut warnings = Vec::new();
    if let Err(e) = fs::set_permissions(to, from.permissions()) {
        warnings.push(format!("copy permissions to {}: {e}", to.display()));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let Err(e) = std::os::unix::fs::chown(to, Some(from.uid()), Some(from.gid())) {
            warnings.push(format!("copy ownership {}:{} to {}: {e}", from.uid(), from.gid(), to.display()));
        }
    }
    for w in &warnings {
        warn!("{w}");
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("config.yaml");
        fs::write(&p, "old: 1\n").unwrap();
        write_atomic(&p, b"new: 2\n").unwrap();
        assert_eq!(fs::read_to_string(&p).unwrap(), "new: 2\n");
        // no temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn permissions_follow_the_source() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, "a").unwrap();
        fs::write(&dst, "b").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).unwrap();
        let warnings = copy_metadata(&fs::metadata(&src).unwrap(), &dst);
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(fs::metadata(&dst).unwrap().permissions().mode() & 0o777, 0o640);
    }

    #[test]
    fn rollback_without_backup_is_noop() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("config.yaml");
        assert_eq!(rollback(&p, None).unwrap(), (false, Vec::new()));
        assert!(!p.exists());
    }

    #[cfg(unix)]
    #[test]
    fn rollback_reports_ownership_it_cannot_restore() {
        use std::os::unix::fs::MetadataExt;
        use time::macros::datetime;

        let dir = tempdir().unwrap();
        let p = dir.path().join("config.yaml");
        fs::write(&p, "broken").unwrap();
        let me = fs::metadata(&p).unwrap().uid();

        // a root-owned snapshot, as left behind by a privileged earlier run
        let root_owned = Path::new("/etc/passwd");
        let Ok(meta) = fs::metadata(root_owned) else { return };
        if me == 0 || meta.uid() != 0 {
            return;
        }
        let backup = Backup {
            path: root_owned.to_path_buf(),
            created: datetime!(2026-10-16 09:30:05),
            seq: 0,
            size: meta.len(),
            digest: String::new(),
        };

        let (rolled_back, warnings) = rollback(&p, Some(&backup)).unwrap();
        assert!(rolled_back);
        assert_eq!(fs::read(&p).unwrap(), fs::read(root_owned).unwrap());
        assert!(warnings.iter().any(|w| w.contains("ownership")), "{warnings:?}");
    }
}
