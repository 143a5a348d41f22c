//! Local-disk [`vfs::Vfs`] adapter backed by the filehandle core.
//!
//! Unlike an id-table adapter (the shape this module started from), `LocalFs`
//! keeps no path bookkeeping of its own: a handle already carries everything
//! needed to find the object again (`fh::FhCore`), so `rename` is a single
//! `rename(2)` and nothing else -- the next decode just lstats the new
//! location and the path cache backfills itself.

use std::cmp;
use std::ffi::{OsStr, OsString};
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task;
use tracing::debug;

use crate::fh::FhCore;
use crate::vfs;

/// Rough per-entry size used to cap directory listing result sizes.
const ENTRY_ESTIMATE_BYTES: u32 = 64;

/// Filesystem export backed by a real directory tree.
pub struct LocalFs {
    root: PathBuf,
    core: Mutex<FhCore>,
    verifier: vfs::StableVerifier,
}

impl LocalFs {
    /// Opens `root` as the exported tree, canonicalizing it so handles
    /// remain stable regardless of how the caller spelled the path.
    pub fn new(root: PathBuf, cache_entries: usize) -> io::Result<Self> {
        let canonical = root.canonicalize()?;
        let verifier_seed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64;
        Ok(Self {
            root: canonical.clone(),
            core: Mutex::new(FhCore::new(canonical, cache_entries)),
            verifier: vfs::StableVerifier(verifier_seed.to_le_bytes()),
        })
    }

    /// The exported tree's root, as the empty-trail filehandle (§3.1): the
    /// root's own `(dev, ino)` with no ancestor trail, not the all-zero
    /// invalid sentinel -- the core tells the two apart by identity, not
    /// by an empty trail alone (a direct child of the root also has one).
    pub async fn root_handle(&self) -> vfs::FileHandle {
        let mut core = self.core.lock().await;
        vfs::FileHandle(core.encode_cached(&self.root, true).to_bytes())
    }

    fn full_path(&self, rel: &Path) -> PathBuf {
        if rel.as_os_str().is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    /// Decodes `handle` into a relative path and the stat observed while
    /// resolving it, via the cache-aware core path.
    async fn resolve(&self, handle: &vfs::FileHandle) -> vfs::VfsResult<(PathBuf, std::fs::Metadata)> {
        let mut core = self.core.lock().await;
        let rel = core.decode_cached(&handle.0).map_err(map_fh_error)?;
        let meta = core.peek_attr().cloned().ok_or(vfs::NfsError::ServerFault)?;
        Ok((rel, meta))
    }

    /// Encodes `path` (absolute, under `root`) into a handle, warming the
    /// path cache.
    async fn encode(&self, path: &Path, require_dir: bool) -> crate::fh::Handle {
        let mut core = self.core.lock().await;
        core.encode_cached(path, require_dir)
    }

    fn cookie_verifier(&self) -> vfs::CookieVerifier {
        vfs::CookieVerifier(self.verifier.0)
    }

    fn verify_cookie(&self, provided: vfs::CookieVerifier) -> vfs::VfsResult<()> {
        if provided.0 == [0; 8] || provided == self.cookie_verifier() {
            Ok(())
        } else {
            Err(vfs::NfsError::BadCookie)
        }
    }
}

/// Maps a host `io::Error` to the closest NFS error code.
fn map_io_error(err: io::Error) -> vfs::NfsError {
    use io::ErrorKind::*;
    match err.kind() {
        NotFound => vfs::NfsError::NoEnt,
        PermissionDenied => vfs::NfsError::Access,
        AlreadyExists => vfs::NfsError::Exist,
        InvalidInput | InvalidData => vfs::NfsError::Inval,
        NotADirectory => vfs::NfsError::NotDir,
        IsADirectory => vfs::NfsError::IsDir,
        ReadOnlyFilesystem => vfs::NfsError::RoFs,
        StorageFull | OutOfMemory => vfs::NfsError::NoSpc,
        _ => vfs::NfsError::Io,
    }
}

/// Maps a core error to the NFS status the adapter boundary propagates
/// (§7's propagation policy).
fn map_fh_error(err: crate::fh::FhError) -> vfs::NfsError {
    use crate::fh::FhError;
    match err {
        FhError::InvalidHandle => vfs::NfsError::BadHandle,
        FhError::Unresolved => vfs::NfsError::Stale,
        FhError::NotDirectory => vfs::NfsError::NotDir,
        FhError::TooDeep => vfs::NfsError::NameTooLong,
        FhError::IoError(kind) => map_io_error(io::Error::from(kind)),
    }
}

/// Validates that a component name is a single, non-empty path segment.
fn validate_name_component(name: &OsStr) -> vfs::VfsResult<()> {
    if name.is_empty() {
        return Err(vfs::NfsError::Inval);
    }
    if name.len() > vfs::MAX_NAME_LEN {
        return Err(vfs::NfsError::NameTooLong);
    }
    let mut components = Path::new(name).components();
    match components.next() {
        Some(Component::Normal(_)) => {}
        _ => return Err(vfs::NfsError::Inval),
    }
    if components.next().is_some() {
        return Err(vfs::NfsError::Inval);
    }
    Ok(())
}

/// Joins a validated child name to a parent relative path.
fn join_child(base: &Path, name: &OsStr) -> vfs::VfsResult<PathBuf> {
    validate_name_component(name)?;
    let mut rel = base.to_path_buf();
    rel.push(name);
    Ok(rel)
}

fn file_name_string(name: &OsStr) -> vfs::FileName {
    vfs::FileName(name.to_string_lossy().into_owned())
}

/// Translates std metadata into the NFS-facing attribute representation.
fn metadata_to_attr(meta: &std::fs::Metadata) -> vfs::FileAttr {
    use std::os::unix::fs::FileTypeExt;
    let file_type = meta.file_type();
    let nfs_type = if file_type.is_dir() {
        vfs::FileType::Directory
    } else if file_type.is_file() {
        vfs::FileType::Regular
    } else if file_type.is_symlink() {
        vfs::FileType::Symlink
    } else if file_type.is_char_device() {
        vfs::FileType::CharacterDevice
    } else if file_type.is_block_device() {
        vfs::FileType::BlockDevice
    } else if file_type.is_fifo() {
        vfs::FileType::Fifo
    } else if file_type.is_socket() {
        vfs::FileType::Socket
    } else {
        vfs::FileType::Regular
    };

    vfs::FileAttr {
        file_type: nfs_type,
        mode: meta.mode(),
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        size: meta.size(),
        used: meta.blocks().saturating_mul(512),
        device: None,
        fsid: meta.dev() as u64,
        fileid: meta.ino(),
        atime: vfs::FileTime { seconds: meta.atime(), nanos: meta.atime_nsec() as u32 },
        mtime: vfs::FileTime { seconds: meta.mtime(), nanos: meta.mtime_nsec() as u32 },
        ctime: vfs::FileTime { seconds: meta.ctime(), nanos: meta.ctime_nsec() as u32 },
    }
}

fn digest_from_attr(attr: &vfs::FileAttr) -> vfs::AttrDigest {
    vfs::AttrDigest { size: attr.size, mtime: attr.mtime, ctime: attr.ctime }
}

/// Ensures attribute updates only contain operations this adapter supports.
fn ensure_supported_attr(attr: &vfs::SetAttr, allow_size: bool, allow_mode: bool) -> vfs::VfsResult<()> {
    if attr.uid.is_some() || attr.gid.is_some() {
        return Err(vfs::NfsError::NotSupp);
    }
    if !matches!(attr.atime, vfs::SetTime::DontChange) || !matches!(attr.mtime, vfs::SetTime::DontChange) {
        return Err(vfs::NfsError::NotSupp);
    }
    if attr.size.is_some() && !allow_size {
        return Err(vfs::NfsError::NotSupp);
    }
    if attr.mode.is_some() && !allow_mode {
        return Err(vfs::NfsError::NotSupp);
    }
    Ok(())
}

async fn apply_setattr(path: &Path, attr: &vfs::SetAttr) -> vfs::VfsResult<()> {
    ensure_supported_attr(attr, true, true)?;

    if let Some(size) = attr.size {
        let file = OpenOptions::new().write(true).open(path).await.map_err(map_io_error)?;
        file.set_len(size).await.map_err(map_io_error)?;
    }

    if let Some(mode) = attr.mode {
        let path = path.to_path_buf();
        task::spawn_blocking(move || std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)))
            .await
            .map_err(|_| vfs::NfsError::ServerFault)?
            .map_err(map_io_error)?;
    }

    Ok(())
}

#[async_trait::async_trait]
impl vfs::Vfs for LocalFs {
    async fn null(&self) -> vfs::VfsResult<()> {
        Ok(())
    }

    async fn get_attr(&self, handle: &vfs::FileHandle) -> vfs::VfsResult<vfs::FileAttr> {
        let (_, meta) = self.resolve(handle).await?;
        Ok(metadata_to_attr(&meta))
    }

    async fn set_attr(
        &self,
        handle: &vfs::FileHandle,
        attr: vfs::SetAttr,
        guard: vfs::SetAttrGuard,
    ) -> vfs::VfsResult<vfs::WccData> {
        let (rel, before_meta) = self.resolve(handle).await?;
        let abs = self.full_path(&rel);
        let before_attr = metadata_to_attr(&before_meta);

        if let vfs::SetAttrGuard::Check { ctime } = guard {
            if before_attr.ctime != ctime {
                return Err(vfs::NfsError::NotSync);
            }
        }

        apply_setattr(&abs, &attr).await?;

        let after_meta = fs::symlink_metadata(&abs).await.map_err(map_io_error)?;
        let after_attr = metadata_to_attr(&after_meta);
        Ok(vfs::WccData { before: Some(digest_from_attr(&before_attr)), after: Some(after_attr) })
    }

    async fn lookup(&self, parent: &vfs::FileHandle, name: &vfs::FileName) -> vfs::VfsResult<vfs::LookupResult> {
        let (parent_rel, parent_meta) = self.resolve(parent).await?;
        let child_rel = join_child(&parent_rel, OsStr::new(&name.0))?;
        let child_abs = self.full_path(&child_rel);
        let meta = fs::symlink_metadata(&child_abs).await.map_err(map_io_error)?;

        let handle = self.encode(&child_abs, false).await;
        if !handle.is_valid() {
            return Err(vfs::NfsError::NoEnt);
        }

        Ok(vfs::LookupResult {
            handle: vfs::FileHandle(handle.to_bytes()),
            object_attr: metadata_to_attr(&meta),
            directory_attr: Some(metadata_to_attr(&parent_meta)),
        })
    }

    async fn access(&self, handle: &vfs::FileHandle, mask: vfs::AccessMask) -> vfs::VfsResult<vfs::AccessResult> {
        let (_, meta) = self.resolve(handle).await?;
        let mode = meta.mode();
        let file_type = meta.file_type();

        let mut granted = vfs::AccessMask::empty();
        let has_read = (mode & 0o444) != 0;
        let has_write = (mode & 0o222) != 0;
        let has_exec = (mode & 0o111) != 0;

        if mask.contains(vfs::AccessMask::READ) && (has_read || file_type.is_dir()) {
            granted.insert(vfs::AccessMask::READ);
        }
        if mask.contains(vfs::AccessMask::LOOKUP) && file_type.is_dir() && has_exec {
            granted.insert(vfs::AccessMask::LOOKUP);
        }
        if mask.contains(vfs::AccessMask::MODIFY) && has_write {
            granted.insert(vfs::AccessMask::MODIFY);
        }
        if mask.contains(vfs::AccessMask::EXTEND) && has_write {
            granted.insert(vfs::AccessMask::EXTEND);
        }
        if mask.contains(vfs::AccessMask::EXECUTE) && has_exec {
            granted.insert(vfs::AccessMask::EXECUTE);
        }
        // ACCESS3_DELETE depends on the parent directory's permissions, not
        // this object's; the core doesn't track parents once handed a
        // handle, so this is granted conservatively based on write access.
        if mask.contains(vfs::AccessMask::DELETE) && has_write {
            granted.insert(vfs::AccessMask::DELETE);
        }

        Ok(vfs::AccessResult { granted, file_attr: Some(metadata_to_attr(&meta)) })
    }

    async fn read_link(&self, handle: &vfs::FileHandle) -> vfs::VfsResult<(vfs::SymlinkTarget, Option<vfs::FileAttr>)> {
        let (rel, meta) = self.resolve(handle).await?;
        let abs = self.full_path(&rel);
        let target = fs::read_link(&abs).await.map_err(map_io_error)?;
        Ok((vfs::SymlinkTarget(target.to_string_lossy().into_owned()), Some(metadata_to_attr(&meta))))
    }

    async fn read(&self, handle: &vfs::FileHandle, offset: u64, count: u32) -> vfs::VfsResult<vfs::ReadResult> {
        let (rel, meta) = self.resolve(handle).await?;
        let abs = self.full_path(&rel);
        let size = meta.len();
        let to_read = if offset >= size { 0 } else { cmp::min(count as u64, size - offset) as usize };

        let mut data = vec![0u8; to_read];
        let mut eof = true;
        if to_read > 0 {
            let mut file = File::open(&abs).await.map_err(map_io_error)?;
            file.seek(io::SeekFrom::Start(offset)).await.map_err(map_io_error)?;
            file.read_exact(&mut data).await.map_err(map_io_error)?;
            eof = offset + to_read as u64 >= size;
        }

        Ok(vfs::ReadResult { data, eof, file_attr: Some(metadata_to_attr(&meta)) })
    }

    async fn write(
        &self,
        handle: &vfs::FileHandle,
        offset: u64,
        data: &[u8],
        mode: vfs::WriteMode,
    ) -> vfs::VfsResult<vfs::WriteResult> {
        let (rel, _) = self.resolve(handle).await?;
        let abs = self.full_path(&rel);
        let mut file = OpenOptions::new().write(true).open(&abs).await.map_err(map_io_error)?;
        file.seek(io::SeekFrom::Start(offset)).await.map_err(map_io_error)?;
        file.write_all(data).await.map_err(map_io_error)?;
        file.flush().await.map_err(map_io_error)?;
        match mode {
            vfs::WriteMode::Unstable => {}
            vfs::WriteMode::DataSync => file.sync_data().await.map_err(map_io_error)?,
            vfs::WriteMode::FileSync => file.sync_all().await.map_err(map_io_error)?,
        }

        let meta = fs::metadata(&abs).await.map_err(map_io_error)?;
        Ok(vfs::WriteResult {
            count: data.len() as u32,
            committed: mode,
            verifier: self.verifier,
            file_attr: Some(metadata_to_attr(&meta)),
        })
    }

    async fn create(
        &self,
        parent: &vfs::FileHandle,
        name: &vfs::FileName,
        mode: vfs::CreateMode,
    ) -> vfs::VfsResult<vfs::CreatedNode> {
        let (parent_rel, _) = self.resolve(parent).await?;
        let child_rel = join_child(&parent_rel, OsStr::new(&name.0))?;
        let child_abs = self.full_path(&child_rel);

        let exists = fs::symlink_metadata(&child_abs).await.is_ok();
        match mode {
            vfs::CreateMode::Exclusive { .. } | vfs::CreateMode::Guarded { .. } if exists => {
                return Err(vfs::NfsError::Exist);
            }
            _ => {}
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true);
        if matches!(mode, vfs::CreateMode::Exclusive { .. }) {
            options.create_new(true);
        }
        options.open(&child_abs).await.map_err(map_io_error)?;

        if let vfs::CreateMode::Unchecked { attr } | vfs::CreateMode::Guarded { attr, .. } = mode {
            let _ = apply_setattr(&child_abs, &attr).await;
        }

        let meta = fs::symlink_metadata(&child_abs).await.map_err(map_io_error)?;
        let handle = self.encode(&child_abs, false).await;
        Ok(vfs::CreatedNode {
            handle: vfs::FileHandle(handle.to_bytes()),
            attr: metadata_to_attr(&meta),
            directory_wcc: vfs::WccData { before: None, after: None },
        })
    }

    async fn make_dir(
        &self,
        parent: &vfs::FileHandle,
        name: &vfs::FileName,
        attr: vfs::SetAttr,
    ) -> vfs::VfsResult<vfs::CreatedNode> {
        ensure_supported_attr(&attr, false, true)?;
        let (parent_rel, _) = self.resolve(parent).await?;
        let child_rel = join_child(&parent_rel, OsStr::new(&name.0))?;
        let child_abs = self.full_path(&child_rel);
        fs::create_dir(&child_abs).await.map_err(map_io_error)?;
        if let Some(mode) = attr.mode {
            let path = child_abs.clone();
            task::spawn_blocking(move || std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)))
                .await
                .map_err(|_| vfs::NfsError::ServerFault)?
                .map_err(map_io_error)?;
        }
        let meta = fs::symlink_metadata(&child_abs).await.map_err(map_io_error)?;
        let handle = self.encode(&child_abs, true).await;
        Ok(vfs::CreatedNode {
            handle: vfs::FileHandle(handle.to_bytes()),
            attr: metadata_to_attr(&meta),
            directory_wcc: vfs::WccData { before: None, after: None },
        })
    }

    async fn make_symlink(
        &self,
        parent: &vfs::FileHandle,
        name: &vfs::FileName,
        target: &vfs::SymlinkTarget,
        attr: vfs::SetAttr,
    ) -> vfs::VfsResult<vfs::CreatedNode> {
        ensure_supported_attr(&attr, false, false)?;
        let (parent_rel, _) = self.resolve(parent).await?;
        let child_rel = join_child(&parent_rel, OsStr::new(&name.0))?;
        let child_abs = self.full_path(&child_rel);
        let target_path = target.0.clone();
        let path_clone = child_abs.clone();
        task::spawn_blocking(move || std::os::unix::fs::symlink(&target_path, &path_clone))
            .await
            .map_err(|_| vfs::NfsError::ServerFault)?
            .map_err(map_io_error)?;

        let meta = fs::symlink_metadata(&child_abs).await.map_err(map_io_error)?;
        let handle = self.encode(&child_abs, false).await;
        Ok(vfs::CreatedNode {
            handle: vfs::FileHandle(handle.to_bytes()),
            attr: metadata_to_attr(&meta),
            directory_wcc: vfs::WccData { before: None, after: None },
        })
    }

    // TODO: support creating special nodes (block, char, fifo, socket) when needed.
    async fn make_node(
        &self,
        _parent: &vfs::FileHandle,
        _name: &vfs::FileName,
        _node: vfs::SpecialNode,
    ) -> vfs::VfsResult<vfs::CreatedNode> {
        Err(vfs::NfsError::NotSupp)
    }

    async fn remove(&self, parent: &vfs::FileHandle, name: &vfs::FileName) -> vfs::VfsResult<vfs::RemovalResult> {
        let (parent_rel, _) = self.resolve(parent).await?;
        let child_rel = join_child(&parent_rel, OsStr::new(&name.0))?;
        let child_abs = self.full_path(&child_rel);
        let meta = fs::symlink_metadata(&child_abs).await.map_err(map_io_error)?;
        if meta.is_dir() {
            return Err(vfs::NfsError::IsDir);
        }
        fs::remove_file(&child_abs).await.map_err(map_io_error)?;
        Ok(vfs::RemovalResult { directory_wcc: vfs::WccData { before: None, after: None } })
    }

    async fn remove_dir(&self, parent: &vfs::FileHandle, name: &vfs::FileName) -> vfs::VfsResult<vfs::RemovalResult> {
        let (parent_rel, _) = self.resolve(parent).await?;
        let child_rel = join_child(&parent_rel, OsStr::new(&name.0))?;
        let child_abs = self.full_path(&child_rel);
        fs::remove_dir(&child_abs).await.map_err(map_io_error)?;
        Ok(vfs::RemovalResult { directory_wcc: vfs::WccData { before: None, after: None } })
    }

    async fn rename(
        &self,
        from_parent: &vfs::FileHandle,
        from_name: &vfs::FileName,
        to_parent: &vfs::FileHandle,
        to_name: &vfs::FileName,
    ) -> vfs::VfsResult<vfs::RenameResult> {
        let (from_parent_rel, _) = self.resolve(from_parent).await?;
        let (to_parent_rel, _) = self.resolve(to_parent).await?;
        let from_rel = join_child(&from_parent_rel, OsStr::new(&from_name.0))?;
        let to_rel = join_child(&to_parent_rel, OsStr::new(&to_name.0))?;
        let from_abs = self.full_path(&from_rel);
        let to_abs = self.full_path(&to_rel);

        fs::rename(&from_abs, &to_abs).await.map_err(map_io_error)?;

        // No bookkeeping to update: the handle is derived from (dev, ino),
        // not a path table, so the next decode_cached lstats the new
        // location and self-heals the path cache on its own.
        Ok(vfs::RenameResult {
            from_directory_wcc: vfs::WccData { before: None, after: None },
            to_directory_wcc: vfs::WccData { before: None, after: None },
        })
    }

    async fn link(
        &self,
        source: &vfs::FileHandle,
        new_parent: &vfs::FileHandle,
        new_name: &vfs::FileName,
    ) -> vfs::VfsResult<vfs::LinkResult> {
        let (src_rel, _) = self.resolve(source).await?;
        let (dst_parent_rel, _) = self.resolve(new_parent).await?;
        let dst_rel = join_child(&dst_parent_rel, OsStr::new(&new_name.0))?;
        let src_abs = self.full_path(&src_rel);
        let dst_abs = self.full_path(&dst_rel);
        fs::hard_link(&src_abs, &dst_abs).await.map_err(map_io_error)?;
        let meta = fs::metadata(&dst_abs).await.map_err(map_io_error)?;
        Ok(vfs::LinkResult {
            new_file_attr: Some(metadata_to_attr(&meta)),
            directory_wcc: vfs::WccData { before: None, after: None },
        })
    }

    async fn read_dir(
        &self,
        handle: &vfs::FileHandle,
        cookie: vfs::DirectoryCookie,
        verifier: vfs::CookieVerifier,
        max_bytes: u32,
    ) -> vfs::VfsResult<vfs::ReadDirResult> {
        if cookie.0 != 0 {
            self.verify_cookie(verifier)?;
        }

        let (rel, dir_meta) = self.resolve(handle).await?;
        let abs = self.full_path(&rel);

        let mut entries = fs::read_dir(&abs).await.map_err(map_io_error)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(map_io_error)? {
            let name = entry.file_name();
            if name == OsStr::new(".") || name == OsStr::new("..") {
                continue;
            }
            names.push(name);
        }
        names.sort_by_key(|name: &OsString| name.to_string_lossy().into_owned());

        let budget = if max_bytes == 0 { usize::MAX } else { cmp::max(1, (max_bytes / ENTRY_ESTIMATE_BYTES) as usize) };
        let mut remaining = budget;
        let mut records = Vec::new();
        for name in names {
            if remaining == 0 {
                break;
            }
            let child_rel = join_child(&rel, &name)?;
            let child_abs = self.full_path(&child_rel);
            let meta = match fs::symlink_metadata(&child_abs).await {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            let fileid = meta.ino();
            if cookie.0 != 0 && fileid <= cookie.0 {
                continue;
            }
            records.push(vfs::DirectoryEntry { cookie: vfs::DirectoryCookie(fileid), name: file_name_string(&name), fileid });
            remaining -= 1;
        }

        debug!(count = records.len(), "read_dir");
        Ok(vfs::ReadDirResult {
            directory_attr: Some(metadata_to_attr(&dir_meta)),
            cookie_verifier: self.cookie_verifier(),
            entries: records,
            eof: true,
        })
    }

    async fn read_dir_plus(
        &self,
        handle: &vfs::FileHandle,
        cookie: vfs::DirectoryCookie,
        verifier: vfs::CookieVerifier,
        max_bytes: u32,
        max_handles: u32,
    ) -> vfs::VfsResult<vfs::ReadDirPlusResult> {
        if cookie.0 != 0 {
            self.verify_cookie(verifier)?;
        }

        let (rel, dir_meta) = self.resolve(handle).await?;
        let abs = self.full_path(&rel);

        let mut entries = fs::read_dir(&abs).await.map_err(map_io_error)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(map_io_error)? {
            let name = entry.file_name();
            if name == OsStr::new(".") || name == OsStr::new("..") {
                continue;
            }
            names.push(name);
        }
        names.sort_by_key(|name: &OsString| name.to_string_lossy().into_owned());

        let byte_limit = if max_bytes == 0 { usize::MAX } else { cmp::max(1, (max_bytes / ENTRY_ESTIMATE_BYTES) as usize) };
        let handle_limit = if max_handles == 0 { usize::MAX } else { max_handles as usize };
        let mut remaining = cmp::min(byte_limit, handle_limit);

        let mut records = Vec::new();
        for name in names {
            if remaining == 0 {
                break;
            }
            let child_rel = join_child(&rel, &name)?;
            let child_abs = self.full_path(&child_rel);
            let meta = match fs::symlink_metadata(&child_abs).await {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            let fileid = meta.ino();
            if cookie.0 != 0 && fileid <= cookie.0 {
                continue;
            }
            let child_handle = self.encode(&child_abs, meta.is_dir()).await;
            records.push(vfs::DirectoryPlusEntry {
                cookie: vfs::DirectoryCookie(fileid),
                name: file_name_string(&name),
                fileid,
                handle: child_handle.is_valid().then(|| vfs::FileHandle(child_handle.to_bytes())),
                attr: Some(metadata_to_attr(&meta)),
            });
            remaining -= 1;
        }

        Ok(vfs::ReadDirPlusResult {
            directory_attr: Some(metadata_to_attr(&dir_meta)),
            cookie_verifier: self.cookie_verifier(),
            entries: records,
            eof: true,
        })
    }

    async fn fs_stat(&self, handle: &vfs::FileHandle) -> vfs::VfsResult<vfs::FsStat> {
        let attr = self.get_attr(handle).await.ok();
        // TODO: back this with statvfs(2) instead of reporting zeroes.
        Ok(vfs::FsStat {
            total_bytes: 0,
            free_bytes: 0,
            available_bytes: 0,
            total_files: 0,
            free_files: 0,
            available_files: 0,
            invarsec: 0,
            file_attr: attr,
        })
    }

    async fn fs_info(&self, handle: &vfs::FileHandle) -> vfs::VfsResult<vfs::FsInfo> {
        let attr = self.get_attr(handle).await.ok();
        Ok(vfs::FsInfo {
            read_max: 1 << 20,
            read_pref: 64 << 10,
            read_multiple: 1,
            write_max: 1 << 20,
            write_pref: 64 << 10,
            write_multiple: 1,
            directory_pref: 4 << 10,
            max_file_size: u64::MAX,
            time_delta: vfs::FileTime { seconds: 1, nanos: 0 },
            properties: vfs::FsProperties::default(),
            file_attr: attr,
        })
    }

    async fn path_conf(&self, handle: &vfs::FileHandle) -> vfs::VfsResult<vfs::PathConfig> {
        let attr = self.get_attr(handle).await.ok();
        Ok(vfs::PathConfig {
            file_attr: attr,
            max_link: 1024,
            max_name: vfs::MAX_NAME_LEN as u32,
            no_trunc: true,
            chown_restricted: true,
            case_insensitive: false,
            case_preserving: true,
        })
    }

    async fn commit(&self, handle: &vfs::FileHandle, offset: u64, count: u32) -> vfs::VfsResult<vfs::CommitResult> {
        let (rel, mut meta) = self.resolve(handle).await?;
        let abs = self.full_path(&rel);

        let commit_whole_file = count == 0;
        if !commit_whole_file && offset > meta.len() {
            return Err(vfs::NfsError::Inval);
        }

        let file = File::open(&abs).await.map_err(map_io_error)?;
        file.sync_data().await.map_err(map_io_error)?;
        meta = fs::metadata(&abs).await.map_err(map_io_error)?;

        Ok(vfs::CommitResult { file_attr: Some(metadata_to_attr(&meta)), verifier: self.verifier })
    }
}
