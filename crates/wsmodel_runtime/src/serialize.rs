//! Snapshot cache files.
//!
//! A cache file is laid out as
//!
//! ```text
//! "WSMC" | version: u32 | schema hash: u64 | payload length: u64 | payload | crc32: u32
//! ```
//!
//! with every integer little-endian. The payload is the snapshot's
//! [`StorageImage`] encoded as `MessagePack` with named fields, and the
//! checksum covers the payload only. A file written by another format
//! version, against another set of schemas, or damaged in any way is
//! rejected with an error whose [`Error::should_rebuild`] is true.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use wsmodel_foundation::{Error, ErrorKind, Result};
use wsmodel_storage::{EntityStorage, Snapshot, StorageImage, StoreConfig, TypeRegistry};

/// Leading bytes of every cache file.
pub const MAGIC: [u8; 4] = *b"WSMC";

/// The cache format version this build reads and writes.
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 4 + 8 + 8;
const CHECKSUM_LEN: usize = 4;

// =============================================================================
// In-memory encoding
// =============================================================================

/// Encodes a snapshot as cache file bytes.
///
/// # Errors
///
/// Returns `Internal` if the image cannot be encoded.
pub fn to_bytes(snapshot: &Snapshot) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec_named(&snapshot.to_image())
        .map_err(|e| Error::internal(format!("failed to encode snapshot: {e}")))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&snapshot.registry().schema_hash().to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(bytes)
}

/// Decodes cache file bytes with the default store configuration.
///
/// # Errors
///
/// See [`from_bytes_with_config`].
pub fn from_bytes(bytes: &[u8], registry: Arc<TypeRegistry>) -> Result<Snapshot> {
    from_bytes_with_config(bytes, registry, StoreConfig::default())
}

/// Decodes cache file bytes into a snapshot over `registry`.
///
/// # Errors
///
/// Returns `SerializationVersionMismatch` for another format version,
/// `SchemaHashMismatch` if the file was written against different schemas,
/// and `CorruptCacheFile` for a bad magic, a truncated or oversized body,
/// a checksum mismatch, an undecodable payload, or an inconsistent image.
pub fn from_bytes_with_config(
    bytes: &[u8],
    registry: Arc<TypeRegistry>,
    config: StoreConfig,
) -> Result<Snapshot> {
    let payload = check_frame(bytes, registry.schema_hash())?;
    let image: StorageImage = rmp_serde::from_slice(payload)
        .map_err(|e| Error::corrupt_cache(format!("undecodable payload: {e}")))?;
    image.restore_with_config(registry, config)
}

/// Validates the header and checksum, returning the payload.
fn check_frame(bytes: &[u8], schema_hash: u64) -> Result<&[u8]> {
    let mut reader = FrameReader::new(bytes);

    let magic = reader.take(4)?;
    if magic != MAGIC {
        return Err(Error::corrupt_cache("not a wsmodel cache file"));
    }

    let version = reader.u32()?;
    if version != FORMAT_VERSION {
        return Err(Error::new(ErrorKind::SerializationVersionMismatch {
            expected: FORMAT_VERSION,
            found: version,
        }));
    }

    let found_hash = reader.u64()?;
    if found_hash != schema_hash {
        return Err(Error::new(ErrorKind::SchemaHashMismatch {
            expected: schema_hash,
            found: found_hash,
        }));
    }

    let len = usize::try_from(reader.u64()?)
        .map_err(|_| Error::corrupt_cache("payload length overflows"))?;
    let payload = reader.take(len)?;
    let checksum = reader.u32()?;
    if !reader.is_done() {
        return Err(Error::corrupt_cache("trailing bytes after checksum"));
    }
    if crc32fast::hash(payload) != checksum {
        return Err(Error::corrupt_cache("checksum mismatch"));
    }
    Ok(payload)
}

struct FrameReader<'a> {
    bytes: &'a [u8],
}

impl<'a> FrameReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < len {
            return Err(Error::corrupt_cache("file is truncated"));
        }
        let (head, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32> {
        let mut buf = [0; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut buf = [0; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn is_done(&self) -> bool {
        self.bytes.is_empty()
    }
}

// =============================================================================
// Files
// =============================================================================

/// Writes a snapshot to a cache file.
///
/// The bytes go to a sibling temporary file that is then renamed over
/// `path`, so readers never observe a partially written cache.
///
/// # Errors
///
/// Returns `Io` if the file cannot be written or renamed.
pub fn serialize_cache<P: AsRef<Path>>(path: P, snapshot: &Snapshot) -> Result<()> {
    let path = path.as_ref();
    let bytes = to_bytes(snapshot).map_err(|e| at_path(e, path))?;
    let temp = temp_path(path);

    let written = write_file(&temp, &bytes).and_then(|()| {
        fs::rename(&temp, path).map_err(|e| io_error("rename", &temp, &e))
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(at_path(e, path));
    }

    info!(
        path = %path.display(),
        entities = snapshot.entity_count(),
        bytes = bytes.len(),
        "cache file written"
    );
    Ok(())
}

/// Reads a cache file with the default store configuration.
///
/// # Errors
///
/// See [`deserialize_cache_with_config`].
pub fn deserialize_cache<P: AsRef<Path>>(path: P, registry: Arc<TypeRegistry>) -> Result<Snapshot> {
    deserialize_cache_with_config(path, registry, StoreConfig::default())
}

/// Reads a cache file into a snapshot over `registry`.
///
/// The restored snapshot has generation 0 and an empty query cache.
///
/// # Errors
///
/// Returns `Io` if the file cannot be read, and otherwise the errors of
/// [`from_bytes_with_config`]. Every error asks the caller to rebuild.
pub fn deserialize_cache_with_config<P: AsRef<Path>>(
    path: P,
    registry: Arc<TypeRegistry>,
    config: StoreConfig,
) -> Result<Snapshot> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| at_path(io_error("read", path, &e), path))?;

    match from_bytes_with_config(&bytes, registry, config) {
        Ok(snapshot) => {
            info!(
                path = %path.display(),
                entities = snapshot.entity_count(),
                bytes = bytes.len(),
                "cache file loaded"
            );
            Ok(snapshot)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cache file rejected");
            Err(at_path(e, path))
        }
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let file = File::create(path).map_err(|e| io_error("create", path, &e))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes).map_err(|e| io_error("write", path, &e))?;
    writer.flush().map_err(|e| io_error("flush", path, &e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| io_error("sync", path, &e))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn io_error(action: &str, path: &Path, err: &std::io::Error) -> Error {
    Error::new(ErrorKind::Io(format!(
        "failed to {action} '{}': {err}",
        path.display()
    )))
}

fn at_path(err: Error, path: &Path) -> Error {
    let context = err.context.clone().unwrap_or_default();
    err.with_context(context.with_path(path.display().to_string()))
}
