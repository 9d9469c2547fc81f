//! Timestamped snapshots of the live configuration.
//!
//! Snapshots are named `<basename>.bak.<YYYYMMDD-HHMMSS>` and are never
//! overwritten or pruned. A second snapshot within the same second gets a
//! `-N` counter appended.

use crate::error::{Stage, UpdateError};
use crate::install::{copy_metadata, write_atomic};
use anyhow::{Context, Result};
use globset::{Glob, GlobSetBuilder};
use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::OnceLock,
};
use tempfile::NamedTempFile;
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::{debug, info};
use walkdir::WalkDir;

const STAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year][month][day]-[hour][minute][second]");
const STAMP_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub path: PathBuf,
    pub created: PrimitiveDateTime,
    /// Same-second collision counter, 0 for the first snapshot.
    pub seq: u32,
    pub size: u64,
    pub digest: String,
}

impl Backup {
    pub fn name(&self) -> String {
        file_name(&self.path)
    }
}

/// Snapshot `config_path` into `backup_dir`.
///
/// Returns `Ok(None)` when the live file does not exist yet. Metadata that
/// cannot be carried over is pushed to `warnings`.
pub fn create_backup(
    config_path: &Path,
    backup_dir: &Path,
    hash_alg: &str,
    warnings: &mut Vec<String>,
) -> Result<Option<Backup>, UpdateError> {
    let io_err = |p: &Path, e: io::Error| UpdateError::io(Stage::Backup, p, e);

    let meta = match fs::metadata(config_path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("no live config at {}, nothing to back up", config_path.display());
            return Ok(None);
        }
        Err(e) => return Err(io_err(config_path, e)),
    };
    if !meta.is_file() {
        return Err(io_err(config_path, io::Error::new(io::ErrorKind::InvalidInput, "not a regular file")));
    }

    let mut src = fs::File::open(config_path).map_err(|e| io_err(config_path, e))?;
    fs::create_dir_all(backup_dir).map_err(|e| io_err(backup_dir, e))?;

    // Copied under a temp name; only a verified copy gets a backup name.
    let mut tmp = NamedTempFile::new_in(backup_dir).map_err(|e| io_err(backup_dir, e))?;
    let size = io::copy(&mut src, tmp.as_file_mut()).map_err(|e| io_err(tmp.path(), e))?;
    tmp.as_file_mut().flush()
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| io_err(tmp.path(), e))?;

    warnings.extend(copy_metadata(&meta, tmp.path()));

    let digest = digest_file(tmp.path(), hash_alg).map_err(|e| io_err(tmp.path(), e))?;
    let source_digest = digest_file(config_path, hash_alg).map_err(|e| io_err(config_path, e))?;
    if digest != source_digest {
        return Err(io_err(config_path, io::Error::new(
            io::ErrorKind::InvalidData,
            format!("backup digest {digest} does not match source {source_digest}"),
        )));
    }

    let now = now_local();
    let created = PrimitiveDateTime::new(now.date(), now.time().replace_nanosecond(0).unwrap_or(now.time()));
    let stamp = created.format(STAMP_FORMAT)
        .map_err(|e| io_err(backup_dir, io::Error::new(io::ErrorKind::Other, e)))?;
    let base = file_name(config_path);
    let (path, seq) = persist_unique(tmp, backup_dir, &base, &stamp).map_err(|e| io_err(backup_dir, e))?;

    info!("backup {} ({} bytes, {})", path.display(), size, short(&digest));
    Ok(Some(Backup { path, created, seq, size, digest }))
}

/// Give `tmp` the first free backup name, bumping the counter on collisions.
fn persist_unique(mut tmp: NamedTempFile, dir: &Path, base: &str, stamp: &str) -> io::Result<(PathBuf, u32)> {
    let mut seq = 0u32;
    loop {
        let name = if seq == 0 {
            format!("{base}.bak.{stamp}")
        } else {
            format!("{base}.bak.{stamp}-{seq}")
        };
        let path = dir.join(name);
        match tmp.persist_noclobber(&path) {
            Ok(_) => return Ok((path, seq)),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                debug!("backup {} exists, trying next counter", path.display());
                tmp = e.file;
                seq += 1;
            }
            Err(e) => return Err(e.error),
        }
    }
}

/// All snapshots of `config_path`, oldest first.
pub fn list_backups(config_path: &Path, backup_dir: &Path, hash_alg: &str) -> Result<Vec<Backup>> {
    if !backup_dir.exists() {
        return Ok(Vec::new());
    }
    let base = file_name(config_path);
    let mut b = GlobSetBuilder::new();
    b.add(Glob::new(&format!("{}.bak.*", globset::escape(&base)))?);
    let set = b.build()?;

    let mut out = Vec::new();
    for entry in WalkDir::new(backup_dir).min_depth(1).max_depth(1).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() { continue; }
        let name = entry.file_name().to_string_lossy().to_string();
        if !set.is_match(&name) { continue; }
        let Some((created, seq)) = parse_name(&base, &name) else {
            debug!("skipping {}: not a backup name", name);
            continue;
        };
        let path = entry.path().to_path_buf();
        let size = entry.metadata()?.len();
        let digest = digest_file(&path, hash_alg)
            .with_context(|| format!("hash {}", path.display()))?;
        out.push(Backup { path, created, seq, size, digest });
    }
    out.sort_by(|a, b| (a.created, a.seq).cmp(&(b.created, b.seq)));
    Ok(out)
}

pub fn latest_backup(config_path: &Path, backup_dir: &Path, hash_alg: &str) -> Result<Option<Backup>> {
    Ok(list_backups(config_path, backup_dir, hash_alg)?.pop())
}

/// Restore `backup` over the live file.
///
/// The current live file is snapshotted first so the restore can itself be
/// undone. Returns that snapshot.
pub fn restore_backup(
    backup: &Backup,
    config_path: &Path,
    backup_dir: &Path,
    hash_alg: &str,
    warnings: &mut Vec<String>,
) -> Result<Option<Backup>, UpdateError> {
    let bytes = fs::read(&backup.path).map_err(|e| UpdateError::io(Stage::Rollback, &backup.path, e))?;
    let digest = digest_bytes(&bytes, hash_alg);
    if digest != backup.digest {
        return Err(UpdateError::io(Stage::Rollback, &backup.path, io::Error::new(
            io::ErrorKind::InvalidData,
            "backup changed since it was listed",
        )));
    }

    let safety = create_backup(config_path, backup_dir, hash_alg, warnings)?;
    write_atomic(config_path, &bytes).map_err(|e| UpdateError::io(Stage::Rollback, config_path, e))?;
    match fs::metadata(&backup.path) {
        Ok(meta) => warnings.extend(copy_metadata(&meta, config_path)),
        Err(e) => warnings.push(format!("read metadata of {}: {e}", backup.path.display())),
    }
    info!("restored {} from {}", config_path.display(), backup.path.display());
    Ok(safety)
}

fn parse_name(base: &str, name: &str) -> Option<(PrimitiveDateTime, u32)> {
    let rest = name.strip_prefix(base)?.strip_prefix(".bak.")?;
    let stamp = rest.get(..STAMP_LEN)?;
    let created = PrimitiveDateTime::parse(stamp, STAMP_FORMAT).ok()?;
    let seq = match &rest[STAMP_LEN..] {
        "" => 0,
        tail => tail.strip_prefix('-')?.parse().ok()?,
    };
    Some((created, seq))
}

pub fn digest_file(p: &Path, alg: &str) -> io::Result<String> {
    let mut f = fs::File::open(p)?;
    let mut buf = [0u8; 64 * 1024];

    if alg.eq_ignore_ascii_case("sha256") {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        loop {
            let n = f.read(&mut buf)?;
            if n == 0 { break; }
            hasher.update(&buf[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    } else {
        // default blake3
        let mut hasher = blake3::Hasher::new();
        loop {
            let n = f.read(&mut buf)?;
            if n == 0 { break; }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }
}

fn digest_bytes(bytes: &[u8], alg: &str) -> String {
    if alg.eq_ignore_ascii_case("sha256") {
        use sha2::{Digest, Sha256};
        format!("{:x}", Sha256::digest(bytes))
    } else {
        blake3::hash(bytes).to_hex().to_string()
    }
}

static LOCAL_OFFSET: OnceLock<UtcOffset> = OnceLock::new();

/// Record the local UTC offset for backup stamps.
///
/// The offset can only be read while the process is single-threaded, so
/// call this before starting the async runtime. Without it stamps are UTC.
pub fn capture_local_offset() -> Option<UtcOffset> {
    let offset = UtcOffset::current_local_offset().ok()?;
    Some(*LOCAL_OFFSET.get_or_init(|| offset))
}

fn now_local() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    match LOCAL_OFFSET.get() {
        Some(offset) => now.to_offset(*offset),
        None => OffsetDateTime::now_local().unwrap_or(now),
    }
}

fn file_name(p: &Path) -> String {
    p.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "config".to_string())
}

pub fn short(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}
