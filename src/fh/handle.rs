//! Filehandle codec: the packed record clients carry, and the pure
//! functions that encode, validate, and extend it.
//!
//! Wire layout (little-endian, packed, no padding):
//!
//! ```text
//! offset  size  field
//!   0      4    dev   (uint32)
//!   4      4    ino   (uint32)
//!   8      4    gen   (uint32)
//!  12      1    len   (uint8)      -- value in [0, MAX_DEPTH]
//!  13      len  inos                -- len bytes of inode-hash trail
//! ```
//!
//! Total serialized length is `HEADER_SIZE + len`. This layout is
//! persistent across server restarts, so it must never change shape without
//! also changing how every existing handle in the wild is interpreted.

use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path};

use byteorder::{ByteOrder, LittleEndian};

/// Compile-time cap on the directory-trail length (reference value).
pub const MAX_DEPTH: usize = 64;

/// Fixed portion of the wire layout: dev(4) + ino(4) + gen(4) + len(1).
pub const HEADER_SIZE: usize = 13;

/// A decoded filehandle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    pub dev: u32,
    pub ino: u32,
    pub gen: u32,
    pub len: u8,
    pub inos: [u8; MAX_DEPTH],
}

/// The canonical invalid handle: all-zero dev/ino/gen, empty trail.
pub const INVALID: Handle = Handle { dev: 0, ino: 0, gen: 0, len: 0, inos: [0; MAX_DEPTH] };

impl Default for Handle {
    fn default() -> Self {
        INVALID
    }
}

impl Handle {
    /// §3.1 `fh_valid`: the all-zero handle is the canonical invalid value.
    pub fn is_valid(&self) -> bool {
        self.dev != 0 && self.ino != 0
    }

    /// Serialized length in bytes, `HEADER_SIZE + len`.
    pub fn serialized_len(&self) -> usize {
        HEADER_SIZE + self.len as usize
    }

    /// Encodes this handle into its wire representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.serialized_len()];
        LittleEndian::write_u32(&mut buf[0..4], self.dev);
        LittleEndian::write_u32(&mut buf[4..8], self.ino);
        LittleEndian::write_u32(&mut buf[8..12], self.gen);
        buf[12] = self.len;
        buf[HEADER_SIZE..].copy_from_slice(&self.inos[..self.len as usize]);
        buf
    }

    /// Decodes a handle from bytes already accepted by [`validate`].
    ///
    /// Panics if `bytes` wasn't produced by or checked against `validate` --
    /// callers must validate first; this function trusts its input.
    fn from_validated_bytes(bytes: &[u8]) -> Handle {
        let dev = LittleEndian::read_u32(&bytes[0..4]);
        let ino = LittleEndian::read_u32(&bytes[4..8]);
        let gen = LittleEndian::read_u32(&bytes[8..12]);
        let len = bytes[12];
        let mut inos = [0u8; MAX_DEPTH];
        inos[..len as usize].copy_from_slice(&bytes[HEADER_SIZE..HEADER_SIZE + len as usize]);
        Handle { dev, ino, gen, len, inos }
    }
}

/// §4.1 inode hash: `h(n) = (n + 3*(n>>8) + 5*(n>>16)) mod 256`.
///
/// This exact formula must be used forever -- handles are persistent, and a
/// later reader (including this same server after a restart) must agree on
/// what a byte in the trail means.
pub fn inode_hash(ino: u32) -> u8 {
    let n = ino as u64;
    ((n + 3 * (n >> 8) + 5 * (n >> 16)) % 256) as u8
}

/// §4.3 `validate`: accepts any byte string whose declared length matches
/// its actual length. Semantic invalidity (`dev == 0`, an unresolved
/// object) is discovered later, by the resolver.
pub fn validate(bytes: &[u8]) -> Result<Handle, super::FhError> {
    if bytes.len() < HEADER_SIZE {
        return Err(super::FhError::InvalidHandle);
    }
    let len = bytes[12] as usize;
    if bytes.len() != HEADER_SIZE + len {
        return Err(super::FhError::InvalidHandle);
    }
    if len > MAX_DEPTH {
        return Err(super::FhError::InvalidHandle);
    }
    Ok(Handle::from_validated_bytes(bytes))
}

/// §4.2 `encode`: turn a local path into a handle.
///
/// `root` is the exported filesystem's scan root (what spec.md's original
/// single-namespace design calls `/`); `path` must lie at or beneath it.
/// Returns [`INVALID`] (not an error) whenever the reference design does: a
/// failed `lstat`, a `require_dir` mismatch, a path outside `root`, or a
/// walk that would exceed `MAX_DEPTH`. Also returns the `lstat` result of
/// the named object itself so the caller can populate the attribute cache
/// without a second probe.
pub fn encode(root: &Path, path: &Path, require_dir: bool) -> (Handle, Option<std::fs::Metadata>) {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(_) => return (INVALID, None),
    };

    if require_dir && !meta.is_dir() {
        return (INVALID, None);
    }

    let dev = meta.dev() as u32;
    let ino = meta.ino() as u32;
    let generation = super::generation::probe(path, None);

    let rel = match path.strip_prefix(root) {
        Ok(rel) => rel,
        Err(_) => return (INVALID, None),
    };

    if rel.as_os_str().is_empty() {
        return (Handle { dev, ino, gen: generation, len: 0, inos: [0; MAX_DEPTH] }, Some(meta));
    }

    let mut segments = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(segment) => segments.push(segment),
            _ => return (INVALID, None),
        }
    }
    // The last segment names the object itself; only its ancestor
    // directories (everything before it) go into the trail.
    let ancestors = &segments[..segments.len() - 1];

    if ancestors.len() > MAX_DEPTH {
        return (INVALID, None);
    }

    let mut inos = [0u8; MAX_DEPTH];
    let mut prefix = root.to_path_buf();
    for (depth, segment) in ancestors.iter().enumerate() {
        prefix.push(segment);
        let ancestor_meta = match std::fs::symlink_metadata(&prefix) {
            Ok(meta) => meta,
            Err(_) => return (INVALID, None),
        };
        inos[depth] = inode_hash(ancestor_meta.ino() as u32);
    }

    (Handle { dev, ino, gen: generation, len: ancestors.len() as u8, inos }, Some(meta))
}

/// §4.4 `extend`: derive a child handle from a parent's trail plus the
/// child's own identity. Fails (`TooDeep`) if the parent is already at
/// `MAX_DEPTH`.
pub fn extend(
    parent: &Handle,
    child_dev: u32,
    child_ino: u32,
    child_gen: u32,
) -> Result<Handle, super::FhError> {
    if parent.len as usize == MAX_DEPTH {
        return Err(super::FhError::TooDeep);
    }
    let mut inos = parent.inos;
    inos[parent.len as usize] = inode_hash(parent.ino);
    Ok(Handle { dev: child_dev, ino: child_ino, gen: child_gen, len: parent.len + 1, inos })
}
