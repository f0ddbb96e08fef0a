//! The copy-on-write rewrite engine: reads the previous main file, applies one mutation (or,
//! for a checkpoint, an already-deduplicated batch of them), and atomically swaps in the
//! result.
//!
//! Grounded on the checksum-patch-then-atomic-rename pattern this crate's manifest-log
//! lineage uses for its own snapshot writes: build the new file's body, checksum it, then
//! `write tmp -> fsync -> rename -> fsync parent dir`, keeping the previous file authoritative
//! until the rename succeeds.

use std::any::Any;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::io::{Reader, Writer};
use crate::record::TypeEntry;

/// Magic bytes identifying the main database file: ASCII `"TQDB"` read little-endian.
pub const MAIN_MAGIC: u32 = 0x4244_5154;
/// Current on-disk main-file format version.
pub const MAIN_VERSION: u16 = 1;
/// Size in bytes of the fixed main-file header.
pub const MAIN_HEADER_SIZE: usize = 16;

/// A single `(type_index, id)`-targeted mutation, as staged by the WAL or issued directly.
pub(crate) struct IdOp {
    pub type_index: u8,
    pub id: u32,
    pub kind: IdOpKind,
}

pub(crate) enum IdOpKind {
    Add(Vec<u8>),
    Update(Vec<u8>),
    Delete,
}

/// What the rewrite engine should do to the previous file's contents.
pub(crate) enum Mutation<'a> {
    /// One or more `(type, id)` operations, already deduplicated if this came from a
    /// checkpoint. Used for `add`/`update`/`delete` and for folding the WAL.
    Batch(Vec<IdOp>),
    /// Keep only records of `type_index` for which `keep` returns `true`.
    FilterDelete {
        type_index: u8,
        keep: &'a dyn Fn(&(dyn Any + Send + Sync)) -> bool,
    },
    /// Apply `modify` in place to every record of `type_index` for which `predicate` returns
    /// `true`; no records are added or removed.
    FilterModify {
        type_index: u8,
        predicate: &'a dyn Fn(&(dyn Any + Send + Sync)) -> bool,
        modify: &'a mut dyn FnMut(&mut (dyn Any + Send + Sync)),
    },
    /// Rewrite the file unchanged (used to fold an empty WAL's checkpoint into a no-op, or
    /// to compact/repair a file with no pending mutation).
    Vacuum,
}

/// Ensures `db_path` is the authoritative file, recovering from an interrupted rewrite:
/// prefer `db`, then `db.tmp` (a rewrite that finished writing but not the final rename),
/// then `db.bak` (a rewrite that was interrupted mid-rename).
pub(crate) fn recover_main_path(db_path: &Path, tmp_path: &Path, bak_path: &Path) -> Result<()> {
    if db_path.exists() {
        if tmp_path.exists() {
            fs::remove_file(tmp_path)?;
        }
        return Ok(());
    }
    if tmp_path.exists() {
        warn!(path = %db_path.display(), "recovering main file from interrupted rewrite (.tmp)");
        fs::rename(tmp_path, db_path)?;
        return Ok(());
    }
    if bak_path.exists() {
        warn!(path = %db_path.display(), "recovering main file from backup (.bak)");
        fs::rename(bak_path, db_path)?;
    }
    Ok(())
}

/// Reads the main file's header and per-type counts. Returns `None` if `db_path` doesn't
/// exist (a brand-new database).
pub(crate) fn read_header_and_counts(
    db_path: &Path,
    type_count: usize,
) -> Result<Option<Vec<u32>>> {
    if !db_path.exists() {
        return Ok(None);
    }
    let mut file = File::open(db_path)?;
    let mut r = Reader::new(&mut file as &mut dyn Read);
    let magic = r.read_u32()?;
    if magic != MAIN_MAGIC {
        return Err(StoreError::Corrupt("main file has bad magic".into()));
    }
    let version = r.read_u16()?;
    if version > MAIN_VERSION {
        return Err(StoreError::Corrupt(format!(
            "main file version {version} unsupported"
        )));
    }
    let _flags = r.read_u16()?;
    let stored_crc = r.read_u32()?;
    let _reserved = r.read_u32()?;

    let mut body = Vec::new();
    file.read_to_end(&mut body)?;
    if crate::io::crc32(&body) != stored_crc {
        return Err(StoreError::Corrupt(
            "main file integrity checksum mismatch".into(),
        ));
    }

    let mut br = Reader::new(&mut &body[..] as &mut dyn Read);
    let mut counts = Vec::with_capacity(type_count);
    for _ in 0..type_count {
        counts.push(br.read_u32()?);
    }
    Ok(Some(counts))
}

/// Reads just the integrity CRC recorded in the main file's header, for the WAL to record
/// as the main-file state it has witnessed. Returns `None` if `db_path` doesn't exist yet.
pub(crate) fn read_main_crc(db_path: &Path) -> Result<Option<u32>> {
    if !db_path.exists() {
        return Ok(None);
    }
    let mut file = File::open(db_path)?;
    let mut r = Reader::new(&mut file as &mut dyn Read);
    let magic = r.read_u32()?;
    if magic != MAIN_MAGIC {
        return Err(StoreError::Corrupt("main file has bad magic".into()));
    }
    let _version = r.read_u16()?;
    let _flags = r.read_u16()?;
    let crc = r.read_u32()?;
    Ok(Some(crc))
}

fn old_reader(db_path: &Path) -> Result<Option<File>> {
    if db_path.exists() {
        Ok(Some(File::open(db_path)?))
    } else {
        Ok(None)
    }
}

/// Applies `mutation` against the previous contents of `db_path` (or an empty database if
/// it doesn't exist yet), producing a new file and installing it atomically. Returns the
/// new per-type record counts.
pub(crate) fn apply(
    db_path: &Path,
    tmp_path: &Path,
    bak_path: &Path,
    types: &[TypeEntry],
    mutation: Mutation<'_>,
) -> Result<Vec<u32>> {
    let n = types.len();
    let old_counts = read_header_and_counts(db_path, n)?.unwrap_or_else(|| vec![0; n]);
    let mut reader_file = old_reader(db_path)?;
    // Skip past the header; callers of `read_header_and_counts` already validated it.
    if let Some(f) = reader_file.as_mut() {
        use std::io::Seek;
        f.seek(std::io::SeekFrom::Start(MAIN_HEADER_SIZE as u64))?;
        // Skip the counts vector too; we already parsed it above.
        f.seek(std::io::SeekFrom::Current((n * 4) as i64))?;
    }

    let (mut batch_ops, mut filter_delete, mut filter_modify): (
        Vec<IdOp>,
        Option<(u8, &dyn Fn(&(dyn Any + Send + Sync)) -> bool)>,
        Option<(
            u8,
            &dyn Fn(&(dyn Any + Send + Sync)) -> bool,
            &mut dyn FnMut(&mut (dyn Any + Send + Sync)),
        )>,
    ) = (Vec::new(), None, None);

    match mutation {
        Mutation::Batch(ops) => batch_ops = ops,
        Mutation::FilterDelete { type_index, keep } => filter_delete = Some((type_index, keep)),
        Mutation::FilterModify {
            type_index,
            predicate,
            modify,
        } => filter_modify = Some((type_index, predicate, modify)),
        Mutation::Vacuum => {}
    }

    let mut new_counts = vec![0u32; n];
    let mut type_bufs: Vec<Vec<u8>> = (0..n).map(|_| Vec::new()).collect();

    for (idx, entry) in types.iter().enumerate() {
        let idx_u8 = idx as u8;
        let old_count = old_counts.get(idx).copied().unwrap_or(0);
        let mut written = 0u32;

        if let Some(file) = reader_file.as_mut() {
            let mut reader = Reader::new(file as &mut dyn Read);
            for _ in 0..old_count {
                let boxed = entry.read_any(&mut reader)?;
                let id = entry.id_of(boxed.as_ref());

                let mut disposition = Disposition::KeepUnchanged;

                if let Some(pos) = batch_ops
                    .iter()
                    .position(|op| op.type_index == idx_u8 && op.id == id)
                {
                    let op = batch_ops.remove(pos);
                    disposition = match op.kind {
                        IdOpKind::Delete => Disposition::Drop,
                        IdOpKind::Update(payload) => Disposition::ReplaceBytes(payload),
                        IdOpKind::Add(_) => Disposition::KeepUnchanged,
                    };
                } else if let Some((fd_type, keep)) = filter_delete {
                    if fd_type == idx_u8 && !keep(boxed.as_ref()) {
                        disposition = Disposition::Drop;
                    }
                } else if let Some((fm_type, predicate, _)) = filter_modify.as_ref() {
                    if *fm_type == idx_u8 && predicate(boxed.as_ref()) {
                        disposition = Disposition::Modify;
                    }
                }

                match disposition {
                    Disposition::Drop => {}
                    Disposition::ReplaceBytes(bytes) => {
                        type_bufs[idx].extend_from_slice(&bytes);
                        written += 1;
                    }
                    Disposition::Modify => {
                        let mut boxed = boxed;
                        if let Some((_, _, modify)) = filter_modify.as_mut() {
                            modify(boxed.as_mut());
                        }
                        let mut w = Writer::new(&mut type_bufs[idx] as &mut dyn Write);
                        entry.write_any(boxed.as_ref(), &mut w)?;
                        w.flush()?;
                        written += 1;
                    }
                    Disposition::KeepUnchanged => {
                        let mut w = Writer::new(&mut type_bufs[idx] as &mut dyn Write);
                        entry.write_any(boxed.as_ref(), &mut w)?;
                        w.flush()?;
                        written += 1;
                    }
                }
            }
        }

        // Append any remaining ADDs targeting this type.
        let mut i = 0;
        while i < batch_ops.len() {
            if batch_ops[i].type_index == idx_u8 {
                let op = batch_ops.remove(i);
                if let IdOpKind::Add(payload) = op.kind {
                    type_bufs[idx].extend_from_slice(&payload);
                    written += 1;
                }
            } else {
                i += 1;
            }
        }

        new_counts[idx] = written;
    }

    // Any leftover `batch_ops` reference a `type_index` outside `types`' range -- a caller
    // bug, not a recoverable condition.
    debug_assert!(batch_ops.is_empty());

    write_new_file(db_path, tmp_path, bak_path, &new_counts, &type_bufs)?;
    Ok(new_counts)
}

enum Disposition {
    KeepUnchanged,
    Drop,
    ReplaceBytes(Vec<u8>),
    Modify,
}

fn write_new_file(
    db_path: &Path,
    tmp_path: &Path,
    bak_path: &Path,
    counts: &[u32],
    type_bufs: &[Vec<u8>],
) -> Result<()> {
    let mut body = Vec::new();
    {
        let mut w = Writer::new(&mut body as &mut dyn Write);
        for c in counts {
            w.write_u32(*c)?;
        }
        for buf in type_bufs {
            w.write_bytes(buf)?;
        }
    }
    let crc = crate::io::crc32(&body);

    {
        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp_path)?;
        tmp.write_all(&MAIN_MAGIC.to_le_bytes())?;
        tmp.write_all(&MAIN_VERSION.to_le_bytes())?;
        tmp.write_all(&0u16.to_le_bytes())?; // flags
        tmp.write_all(&crc.to_le_bytes())?;
        tmp.write_all(&0u32.to_le_bytes())?; // reserved
        tmp.write_all(&body)?;
        tmp.flush()?;
        tmp.sync_all()?;
    }

    atomic_swap(db_path, tmp_path, bak_path)?;
    debug!(path = %db_path.display(), "rewrite committed");
    Ok(())
}

fn atomic_swap(db_path: &Path, tmp_path: &Path, bak_path: &Path) -> Result<()> {
    if bak_path.exists() {
        fs::remove_file(bak_path)?;
    }
    let had_prior = db_path.exists();
    if had_prior {
        fs::rename(db_path, bak_path)?;
    }
    match fs::rename(tmp_path, db_path) {
        Ok(()) => {
            if had_prior && bak_path.exists() {
                fs::remove_file(bak_path)?;
            }
            fsync_parent(db_path)?;
            Ok(())
        }
        Err(e) => {
            if had_prior {
                // Roll back: restore the previous file so `db_path` is never left absent.
                let _ = fs::rename(bak_path, db_path);
            }
            Err(StoreError::Io(e))
        }
    }
}

fn fsync_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if parent.as_os_str().is_empty() {
            return Ok(());
        }
        let dir = File::open(parent)?;
        dir.sync_all()?;
    }
    Ok(())
}
