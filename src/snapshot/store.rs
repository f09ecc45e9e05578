//! On-disk snapshot store
//!
//! File layout: one text header line (comma-separated metadata, spawn
//! sentinel and lock flag), then an lz4 frame stream containing the binary
//! body: section table, entity table, one incidental table per registered
//! kind, modified-diff table.
//!
//! Two write paths exist. The buffered path encodes the whole file in memory
//! and swaps it in with backup-and-rollback. The streaming path writes
//! sections incrementally through [`StreamingWriter`] for volumes too large
//! to buffer twice; both paths emit the same logical layout and deserialize
//! to equal snapshots.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lz4_flex::frame::{FrameDecoder, FrameEncoder};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::host::WorldResolver;
use crate::math::VoxelPos;
use crate::snapshot::entity::EntityRecord;
use crate::snapshot::incidental::{IncidentalRegistry, IncidentalState};
use crate::snapshot::region::{
    EntitySpawn, RegionMetadata, RegionSnapshot, SnapshotContents, SpawnPoint,
};
use crate::snapshot::wire;
use crate::voxel::{decode_token, encode_token, VoxelState};

/// Current snapshot format version
pub const FORMAT_VERSION: u32 = 3;

/// Oldest format version migration still understands
pub const MIN_FORMAT_VERSION: u32 = 1;

/// Snapshot file extension (filename = region name + extension)
pub const SNAPSHOT_EXTENSION: &str = "region";

/// Flush the streaming encoder roughly this often
const STREAM_FLUSH_BYTES: usize = 1 << 20;

/// Everything read back from one snapshot file
#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    pub meta: RegionMetadata,
    pub spawn: Option<SpawnPoint>,
    pub locked: bool,
    pub contents: SnapshotContents,
}

/// Binary codec for snapshot files
///
/// Owns the incidental-kind registry; cheap to clone via `Arc`.
pub struct SnapshotStore {
    registry: Arc<IncidentalRegistry>,
}

impl SnapshotStore {
    pub fn new(registry: IncidentalRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Store with the standard incidental kinds
    pub fn standard() -> Self {
        Self::new(IncidentalRegistry::standard())
    }

    pub fn registry(&self) -> &IncidentalRegistry {
        &self.registry
    }

    /// Path of the snapshot file for a region name
    pub fn snapshot_path(dir: &Path, region: &str) -> PathBuf {
        dir.join(format!("{}.{}", region, SNAPSHOT_EXTENSION))
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut os = path.as_os_str().to_os_string();
        os.push(".bak");
        PathBuf::from(os)
    }

    /// Serialize and persist a snapshot to its backing file
    ///
    /// Encoding runs off the caller's execution context. An existing file is
    /// renamed to a `.bak` sibling first; any failure rolls the backup back
    /// over the destination, so a reader never observes a half-written file.
    pub async fn write(&self, snapshot: &RegionSnapshot) -> Result<()> {
        let name = snapshot.name().to_string();
        let path = snapshot.path().to_path_buf();
        let meta = snapshot.metadata();
        let contents = snapshot.contents();
        let spawn = snapshot.spawn_point();
        let locked = snapshot.locked();
        let registry = self.registry.clone();

        let bytes = tokio::task::spawn_blocking(move || {
            encode_file(&meta, &contents, spawn, locked, &registry)
        })
        .await
        .map_err(|e| Error::WriteFailure(name.clone(), format!("encode task failed: {}", e)))?
        .map_err(|e| Error::WriteFailure(name.clone(), e.to_string()))?;

        let backup = Self::backup_path(&path);
        let had_existing = tokio::fs::try_exists(&path).await.unwrap_or(false);
        if had_existing {
            tokio::fs::rename(&path, &backup)
                .await
                .map_err(|e| Error::WriteFailure(name.clone(), format!("backup rename: {}", e)))?;
        }

        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => {
                log::debug!("wrote snapshot '{}' ({} bytes)", name, bytes.len());
                Ok(())
            }
            Err(e) => {
                if had_existing {
                    if let Err(re) = tokio::fs::rename(&backup, &path).await {
                        log::error!("rollback of '{}' failed: {}", path.display(), re);
                    }
                }
                Err(Error::WriteFailure(name, e.to_string()))
            }
        }
    }

    /// Read and decode a snapshot file in full
    pub async fn read(&self, path: &Path) -> Result<LoadedSnapshot> {
        let bytes = tokio::fs::read(path).await?;
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || decode_file(&bytes, &registry))
            .await
            .map_err(|e| Error::Corrupt(format!("decode task failed: {}", e)))?
    }

    /// Open a snapshot file into a [`RegionSnapshot`]
    ///
    /// If the source world named in the header is not currently resolvable
    /// the read still succeeds: the snapshot comes back metadata-only and
    /// unloaded, and a later `ensure_loaded` retries.
    pub async fn open(
        &self,
        region: &str,
        path: &Path,
        resolver: &dyn WorldResolver,
    ) -> Result<RegionSnapshot> {
        let bytes = tokio::fs::read(path).await?;
        let (header, _) = split_header(&bytes)?;
        let (meta, _, _) = parse_header(header)?;

        if !resolver.world_exists(&meta.world) {
            log::warn!(
                "world '{}' for region '{}' is unavailable; deferring load",
                meta.world,
                region
            );
            return Ok(RegionSnapshot::deferred(region, path.to_path_buf(), meta));
        }

        let registry = self.registry.clone();
        let loaded = tokio::task::spawn_blocking(move || decode_file(&bytes, &registry))
            .await
            .map_err(|e| Error::Corrupt(format!("decode task failed: {}", e)))??;

        let snapshot = RegionSnapshot::deferred(region, path.to_path_buf(), loaded.meta);
        snapshot.install(loaded.contents, loaded.spawn, loaded.locked);
        Ok(snapshot)
    }

    /// Begin an incremental snapshot write
    ///
    /// The header goes out immediately; `section_count` must match the
    /// number of later `write_section` calls (the section table is
    /// count-prefixed and the compressed stream cannot be patched). Blocking
    /// IO: call from a worker, not the host step.
    pub fn start_streaming_write(
        &self,
        path: &Path,
        meta: &RegionMetadata,
        spawn: Option<SpawnPoint>,
        locked: bool,
        section_count: u32,
    ) -> Result<StreamingWriter> {
        StreamingWriter::create(path, meta, spawn, locked, section_count, self.registry.clone())
    }
}

/// Incremental snapshot writer for volumes too large to buffer whole
///
/// Sections may arrive in any order convenient to the producer (e.g. per
/// spatial chunk); output lands in a `.tmp` sibling and is swapped in with
/// the same backup-and-rollback dance as the buffered path on `finalize`.
pub struct StreamingWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    encoder: FrameEncoder<BufWriter<File>>,
    registry: Arc<IncidentalRegistry>,
    declared_sections: u32,
    written_sections: u32,
    bytes_since_flush: usize,
}

impl StreamingWriter {
    fn create(
        path: &Path,
        meta: &RegionMetadata,
        spawn: Option<SpawnPoint>,
        locked: bool,
        section_count: u32,
        registry: Arc<IncidentalRegistry>,
    ) -> Result<Self> {
        let tmp_path = {
            let mut os = path.as_os_str().to_os_string();
            os.push(".tmp");
            PathBuf::from(os)
        };

        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        write_header(&mut writer, meta, spawn, locked)?;

        let mut encoder = FrameEncoder::new(writer);
        wire::write_u32(&mut encoder, section_count)?;

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            encoder,
            registry,
            declared_sections: section_count,
            written_sections: 0,
            bytes_since_flush: 0,
        })
    }

    /// Append one section's table entry
    pub fn write_section<'a, I>(&mut self, name: &str, voxels: I) -> Result<()>
    where
        I: ExactSizeIterator<Item = (&'a VoxelPos, &'a String)>,
    {
        if self.written_sections >= self.declared_sections {
            return Err(Error::Corrupt(format!(
                "section '{}' exceeds the declared count of {}",
                name, self.declared_sections
            )));
        }

        let mut written = 0usize;
        wire::write_str(&mut self.encoder, name)?;
        wire::write_u32(&mut self.encoder, voxels.len() as u32)?;
        for (pos, token) in voxels {
            wire::write_i32(&mut self.encoder, pos.x)?;
            wire::write_i32(&mut self.encoder, pos.y)?;
            wire::write_i32(&mut self.encoder, pos.z)?;
            wire::write_str(&mut self.encoder, token)?;
            written += 12 + 2 + token.len();
        }
        self.written_sections += 1;

        self.bytes_since_flush += written;
        if self.bytes_since_flush >= STREAM_FLUSH_BYTES {
            self.encoder.flush()?;
            self.bytes_since_flush = 0;
        }
        Ok(())
    }

    /// Append the remaining tables, close the stream and swap the file in
    pub fn finalize(
        mut self,
        entities: &[EntitySpawn],
        incidental: &std::collections::BTreeMap<VoxelPos, IncidentalState>,
        modified: &std::collections::BTreeMap<VoxelPos, String>,
    ) -> Result<()> {
        if self.written_sections != self.declared_sections {
            return Err(Error::Corrupt(format!(
                "wrote {} sections but {} were declared",
                self.written_sections, self.declared_sections
            )));
        }

        write_trailer(&mut self.encoder, entities, incidental, modified, &self.registry)?;
        let mut writer = self
            .encoder
            .finish()
            .map_err(|e| Error::Corrupt(format!("lz4 stream: {}", e)))?;
        writer.flush()?;
        drop(writer);

        let backup = SnapshotStore::backup_path(&self.path);
        let had_existing = self.path.exists();
        if had_existing {
            std::fs::rename(&self.path, &backup)?;
        }
        if let Err(e) = std::fs::rename(&self.tmp_path, &self.path) {
            if had_existing {
                if let Err(re) = std::fs::rename(&backup, &self.path) {
                    log::error!("rollback of '{}' failed: {}", self.path.display(), re);
                }
            }
            let _ = std::fs::remove_file(&self.tmp_path);
            return Err(e.into());
        }
        Ok(())
    }

    /// Abandon the stream and remove the partial temp file
    pub fn abort(self) {
        let tmp = self.tmp_path.clone();
        drop(self);
        let _ = std::fs::remove_file(tmp);
    }
}

// --- Header ---

fn sanitize_field(s: &str) -> String {
    // Commas separate header fields and a newline terminates the header.
    s.replace([',', '\n', '\r'], "_")
}

fn write_header<W: Write>(
    w: &mut W,
    meta: &RegionMetadata,
    spawn: Option<SpawnPoint>,
    locked: bool,
) -> io::Result<()> {
    let (sx, sy, sz, yaw, pitch) = match spawn {
        Some(s) => (s.pos.x, s.pos.y, s.pos.z, s.yaw, s.pitch),
        None => (0.0, 0.0, 0.0, 0.0, 0.0),
    };
    writeln!(
        w,
        "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
        FORMAT_VERSION,
        sanitize_field(&meta.creator),
        meta.created_at,
        sanitize_field(&meta.world),
        sanitize_field(&meta.source_version),
        meta.origin.x,
        meta.origin.y,
        meta.origin.z,
        meta.width,
        meta.height,
        meta.depth,
        sx,
        sy,
        sz,
        yaw,
        pitch,
        locked as u8,
    )
}

fn split_header(bytes: &[u8]) -> Result<(&str, &[u8])> {
    let newline = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| Error::Corrupt("missing header line".into()))?;
    let header = std::str::from_utf8(&bytes[..newline])
        .map_err(|_| Error::Corrupt("header is not utf8".into()))?;
    Ok((header, &bytes[newline + 1..]))
}

fn header_field<'a, T: std::str::FromStr>(
    fields: &'a [&'a str],
    idx: usize,
    what: &str,
) -> Result<T> {
    fields
        .get(idx)
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| Error::Corrupt(format!("bad header field '{}' at index {}", what, idx)))
}

/// Parse the header line, migrating older fixed-field layouts
///
/// Version 1 headers stop after the extents; version 2 adds the spawn
/// fields; version 3 adds the locked flag. Missing trailing fields default
/// to zero/false.
fn parse_header(line: &str) -> Result<(RegionMetadata, Option<SpawnPoint>, bool)> {
    let fields: Vec<&str> = line.split(',').collect();
    let version: u32 = header_field(&fields, 0, "format version")?;

    if !(MIN_FORMAT_VERSION..=FORMAT_VERSION).contains(&version) {
        return Err(Error::UnsupportedFormatVersion(version));
    }
    let expected_fields = match version {
        1 => 11,
        2 => 16,
        _ => 17,
    };
    if fields.len() != expected_fields {
        return Err(Error::Corrupt(format!(
            "format version {} header has {} fields, expected {}",
            version,
            fields.len(),
            expected_fields
        )));
    }

    let meta = RegionMetadata {
        creator: fields[1].to_string(),
        created_at: header_field(&fields, 2, "created_at")?,
        world: fields[3].to_string(),
        source_version: fields[4].to_string(),
        format_version: version,
        origin: VoxelPos::new(
            header_field(&fields, 5, "originX")?,
            header_field(&fields, 6, "originY")?,
            header_field(&fields, 7, "originZ")?,
        ),
        width: header_field(&fields, 8, "width")?,
        height: header_field(&fields, 9, "height")?,
        depth: header_field(&fields, 10, "depth")?,
    };
    if meta.width <= 0 || meta.height <= 0 || meta.depth <= 0 {
        return Err(Error::Corrupt(format!(
            "non-positive extents {}x{}x{}",
            meta.width, meta.height, meta.depth
        )));
    }

    let spawn = if version >= 2 {
        let sx: f64 = header_field(&fields, 11, "spawnX")?;
        let sy: f64 = header_field(&fields, 12, "spawnY")?;
        let sz: f64 = header_field(&fields, 13, "spawnZ")?;
        let yaw: f32 = header_field(&fields, 14, "spawnYaw")?;
        let pitch: f32 = header_field(&fields, 15, "spawnPitch")?;
        // The all-zero spawn is the "absent" sentinel.
        if sx == 0.0 && sy == 0.0 && sz == 0.0 && yaw == 0.0 && pitch == 0.0 {
            None
        } else {
            Some(SpawnPoint {
                pos: glam::DVec3::new(sx, sy, sz),
                yaw,
                pitch,
            })
        }
    } else {
        None
    };

    let locked = if version >= 3 {
        header_field::<u8>(&fields, 16, "locked")? != 0
    } else {
        false
    };

    Ok((meta, spawn, locked))
}

// --- Body ---

fn write_trailer<W: Write>(
    w: &mut W,
    entities: &[EntitySpawn],
    incidental: &std::collections::BTreeMap<VoxelPos, IncidentalState>,
    modified: &std::collections::BTreeMap<VoxelPos, String>,
    registry: &IncidentalRegistry,
) -> Result<()> {
    // Entity table
    wire::write_u32(w, entities.len() as u32)?;
    for spawn in entities {
        wire::write_f64(w, spawn.pos.x)?;
        wire::write_f64(w, spawn.pos.y)?;
        wire::write_f64(w, spawn.pos.z)?;
        wire::write_blob(w, &spawn.record.to_blob()?)?;
    }

    // One incidental table per registered kind, in registry order
    wire::write_u32(w, registry.len() as u32)?;
    for codec in registry.codecs() {
        let records: Vec<_> = incidental
            .iter()
            .filter(|(_, state)| state.kind() == codec.kind())
            .collect();
        wire::write_str(w, codec.kind())?;
        wire::write_u32(w, records.len() as u32)?;
        for (pos, state) in records {
            wire::write_f64(w, pos.x as f64)?;
            wire::write_f64(w, pos.y as f64)?;
            wire::write_f64(w, pos.z as f64)?;
            wire::write_blob(w, &codec.encode(&state.payload)?)?;
            state.write_extras(w)?;
        }
    }

    // Modified-voxel diff table
    wire::write_u32(w, modified.len() as u32)?;
    for (pos, token) in modified {
        wire::write_i32(w, pos.x)?;
        wire::write_i32(w, pos.y)?;
        wire::write_i32(w, pos.z)?;
        wire::write_str(w, token)?;
    }
    Ok(())
}

pub(crate) fn encode_file(
    meta: &RegionMetadata,
    contents: &SnapshotContents,
    spawn: Option<SpawnPoint>,
    locked: bool,
    registry: &IncidentalRegistry,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_header(&mut out, meta, spawn, locked)?;

    let mut encoder = FrameEncoder::new(out);
    wire::write_u32(&mut encoder, contents.sections.len() as u32)?;
    for (name, voxels) in &contents.sections {
        wire::write_str(&mut encoder, name)?;
        wire::write_u32(&mut encoder, voxels.len() as u32)?;
        for (pos, token) in voxels {
            wire::write_i32(&mut encoder, pos.x)?;
            wire::write_i32(&mut encoder, pos.y)?;
            wire::write_i32(&mut encoder, pos.z)?;
            wire::write_str(&mut encoder, token)?;
        }
    }
    write_trailer(
        &mut encoder,
        &contents.entities,
        &contents.incidental,
        &contents.modified,
        registry,
    )?;
    encoder
        .finish()
        .map_err(|e| Error::Corrupt(format!("lz4 stream: {}", e)))
}

/// Validate a stored token, substituting the canonical air token on failure
fn checked_token(token: String, pos: VoxelPos) -> String {
    match decode_token(&token) {
        Ok(_) => token,
        Err(e) => {
            log::warn!("corrupt voxel token at {}: {}; substituting air", pos, e);
            encode_token(&VoxelState::air())
        }
    }
}

pub(crate) fn decode_file(bytes: &[u8], registry: &IncidentalRegistry) -> Result<LoadedSnapshot> {
    let (header, body) = split_header(bytes)?;
    let (meta, spawn, locked) = parse_header(header)?;

    let mut r = FrameDecoder::new(body);
    let contents = read_body(&mut r, registry)?;

    Ok(LoadedSnapshot {
        meta,
        spawn,
        locked,
        contents,
    })
}

fn read_body<R: Read>(r: &mut R, registry: &IncidentalRegistry) -> Result<SnapshotContents> {
    let map_io = |what: &str, e: io::Error| Error::Corrupt(format!("{} table: {}", what, e));
    let mut contents = SnapshotContents::default();

    // Section table
    let section_count = wire::read_u32(r).map_err(|e| map_io("section", e))?;
    for _ in 0..section_count {
        let name = wire::read_str(r).map_err(|e| map_io("section", e))?;
        let voxel_count = wire::read_u32(r).map_err(|e| map_io("section", e))?;
        let section = contents.sections.entry(name).or_default();
        for _ in 0..voxel_count {
            let pos = VoxelPos::new(
                wire::read_i32(r).map_err(|e| map_io("section", e))?,
                wire::read_i32(r).map_err(|e| map_io("section", e))?,
                wire::read_i32(r).map_err(|e| map_io("section", e))?,
            );
            let token = wire::read_str(r).map_err(|e| map_io("section", e))?;
            section.insert(pos, checked_token(token, pos));
        }
    }

    // Entity table; a record that fails to parse is dropped, not fatal
    let entity_count = wire::read_u32(r).map_err(|e| map_io("entity", e))?;
    for _ in 0..entity_count {
        let x = wire::read_f64(r).map_err(|e| map_io("entity", e))?;
        let y = wire::read_f64(r).map_err(|e| map_io("entity", e))?;
        let z = wire::read_f64(r).map_err(|e| map_io("entity", e))?;
        let blob = wire::read_blob(r).map_err(|e| map_io("entity", e))?;
        match EntityRecord::from_blob(&blob) {
            Ok(record) => contents.entities.push(EntitySpawn {
                pos: glam::DVec3::new(x, y, z),
                record,
            }),
            Err(e) => log::warn!("dropping corrupt entity record at ({}, {}, {}): {}", x, y, z, e),
        }
    }

    // Incidental tables
    let kind_count = wire::read_u32(r).map_err(|e| map_io("incidental", e))?;
    for _ in 0..kind_count {
        let kind = wire::read_str(r).map_err(|e| map_io("incidental", e))?;
        let record_count = wire::read_u32(r).map_err(|e| map_io("incidental", e))?;
        let codec = registry.codec_for(&kind);
        if codec.is_none() && record_count > 0 {
            log::warn!("skipping {} records of unknown incidental kind '{}'", record_count, kind);
        }
        for _ in 0..record_count {
            let x = wire::read_f64(r).map_err(|e| map_io("incidental", e))?;
            let y = wire::read_f64(r).map_err(|e| map_io("incidental", e))?;
            let z = wire::read_f64(r).map_err(|e| map_io("incidental", e))?;
            let payload_bytes = wire::read_blob(r).map_err(|e| map_io("incidental", e))?;
            let extras = IncidentalState::read_extras(r).map_err(|e| map_io("incidental", e))?;

            let Some(codec) = codec else { continue };
            let pos = VoxelPos::new(x as i32, y as i32, z as i32);
            match codec.decode(&payload_bytes) {
                Ok(payload) => {
                    contents
                        .incidental
                        .insert(pos, IncidentalState { payload, extras });
                }
                Err(e) => log::warn!("dropping corrupt '{}' record at {}: {}", kind, pos, e),
            }
        }
    }

    // Modified-voxel diff table
    let diff_count = wire::read_u32(r).map_err(|e| map_io("diff", e))?;
    for _ in 0..diff_count {
        let pos = VoxelPos::new(
            wire::read_i32(r).map_err(|e| map_io("diff", e))?,
            wire::read_i32(r).map_err(|e| map_io("diff", e))?,
            wire::read_i32(r).map_err(|e| map_io("diff", e))?,
        );
        let token = wire::read_str(r).map_err(|e| map_io("diff", e))?;
        contents.modified.insert(pos, checked_token(token, pos));
    }

    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::incidental::{BannerState, IncidentalCodec, SignState};
    use crate::snapshot::region::section_name;
    use std::collections::BTreeMap;

    fn sample_meta() -> RegionMetadata {
        RegionMetadata {
            creator: "op".into(),
            created_at: 1_700_000_000,
            world: "arena_world".into(),
            source_version: "7.4".into(),
            format_version: FORMAT_VERSION,
            origin: VoxelPos::new(-8, 0, -8),
            width: 16,
            height: 8,
            depth: 16,
        }
    }

    fn sample_contents() -> SnapshotContents {
        let mut contents = SnapshotContents::default();
        let section = contents
            .sections
            .entry(section_name(VoxelPos::new(0, 0, 0)))
            .or_default();
        section.insert(VoxelPos::new(0, 1, 0), "v1;stone".into());
        section.insert(
            VoxelPos::new(1, 1, 0),
            "v1;oak_stairs;facing=north,half=top".into(),
        );
        let far = contents
            .sections
            .entry(section_name(VoxelPos::new(-1, 0, -1)))
            .or_default();
        far.insert(VoxelPos::new(-3, 2, -5), "v1;dirt".into());

        let mut record = EntityRecord::new("zombie");
        record.health = 12.0;
        contents.entities.push(EntitySpawn {
            pos: glam::DVec3::new(0.5, 1.0, 0.5),
            record,
        });

        contents.incidental.insert(
            VoxelPos::new(0, 2, 0),
            IncidentalState::sign(SignState {
                lines: vec!["Arena".into()],
                color: "black".into(),
                glowing: false,
            }),
        );
        contents.incidental.insert(
            VoxelPos::new(1, 2, 0),
            IncidentalState::banner(BannerState {
                base_color: "red".into(),
                patterns: vec![("stripe".into(), "white".into())],
            }),
        );

        contents
            .modified
            .insert(VoxelPos::new(0, 1, 0), "v1;stone".into());
        contents
    }

    fn roundtrip(contents: &SnapshotContents, spawn: Option<SpawnPoint>, locked: bool) -> LoadedSnapshot {
        let registry = IncidentalRegistry::standard();
        let bytes = encode_file(&sample_meta(), contents, spawn, locked, &registry).unwrap();
        decode_file(&bytes, &registry).unwrap()
    }

    #[test]
    fn test_roundtrip_field_for_field() {
        let contents = sample_contents();
        let spawn = Some(SpawnPoint {
            pos: glam::DVec3::new(0.5, 3.0, 0.5),
            yaw: 90.0,
            pitch: -10.0,
        });

        let loaded = roundtrip(&contents, spawn, true);
        assert_eq!(loaded.meta, sample_meta());
        assert_eq!(loaded.spawn, spawn);
        assert!(loaded.locked);
        assert_eq!(loaded.contents.sections, contents.sections);
        assert_eq!(loaded.contents.entities, contents.entities);
        assert_eq!(loaded.contents.incidental, contents.incidental);
        assert_eq!(loaded.contents.modified, contents.modified);
    }

    #[test]
    fn test_spawn_zero_sentinel() {
        let loaded = roundtrip(&SnapshotContents::default(), None, false);
        assert_eq!(loaded.spawn, None);
        assert!(!loaded.locked);
    }

    #[test]
    fn test_corrupt_token_substituted_others_intact() {
        let mut contents = sample_contents();
        contents
            .sections
            .get_mut(&section_name(VoxelPos::new(0, 0, 0)))
            .unwrap()
            .insert(VoxelPos::new(2, 1, 0), "!!garbage!!".into());

        let loaded = roundtrip(&contents, None, false);
        let section = &loaded.contents.sections[&section_name(VoxelPos::new(0, 0, 0))];
        assert_eq!(section[&VoxelPos::new(2, 1, 0)], "v1;air");
        assert_eq!(section[&VoxelPos::new(0, 1, 0)], "v1;stone");
        assert_eq!(
            section[&VoxelPos::new(1, 1, 0)],
            "v1;oak_stairs;facing=north,half=top"
        );
    }

    fn body_only(contents: &SnapshotContents) -> Vec<u8> {
        let registry = IncidentalRegistry::standard();
        let bytes = encode_file(&sample_meta(), contents, None, false, &registry).unwrap();
        let newline = bytes.iter().position(|&b| b == b'\n').unwrap();
        bytes[newline + 1..].to_vec()
    }

    #[test]
    fn test_migration_v1_header() {
        let mut file = b"1,alice,1600000000,old_world,6.1,0,64,0,10,5,10\n".to_vec();
        file.extend(body_only(&SnapshotContents::default()));

        let loaded = decode_file(&file, &IncidentalRegistry::standard()).unwrap();
        assert_eq!(loaded.meta.format_version, 1);
        assert_eq!(loaded.meta.creator, "alice");
        assert_eq!(loaded.meta.origin, VoxelPos::new(0, 64, 0));
        assert_eq!(loaded.spawn, None);
        assert!(!loaded.locked);
    }

    #[test]
    fn test_migration_v2_header() {
        let mut file = b"2,bob,1650000000,w,6.5,0,0,0,4,4,4,1,70,1,180,0\n".to_vec();
        file.extend(body_only(&SnapshotContents::default()));

        let loaded = decode_file(&file, &IncidentalRegistry::standard()).unwrap();
        assert_eq!(loaded.meta.format_version, 2);
        let spawn = loaded.spawn.unwrap();
        assert_eq!(spawn.pos, glam::DVec3::new(1.0, 70.0, 1.0));
        assert_eq!(spawn.yaw, 180.0);
        assert!(!loaded.locked);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let file = b"0,x,0,w,1,0,0,0,1,1,1\n".to_vec();
        assert!(matches!(
            decode_file(&file, &IncidentalRegistry::standard()),
            Err(Error::UnsupportedFormatVersion(0))
        ));

        let file = b"9,x,0,w,1,0,0,0,1,1,1,0,0,0,0,0,0\n".to_vec();
        assert!(matches!(
            decode_file(&file, &IncidentalRegistry::standard()),
            Err(Error::UnsupportedFormatVersion(9))
        ));
    }

    #[test]
    fn test_truncated_body_is_corrupt() {
        let registry = IncidentalRegistry::standard();
        let bytes = encode_file(&sample_meta(), &sample_contents(), None, false, &registry).unwrap();
        let truncated = &bytes[..bytes.len() - 10];
        assert!(matches!(
            decode_file(truncated, &registry),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_unknown_incidental_kind_skipped() {
        // Write with an extended registry, read back with the standard one.
        struct JukeboxCodec;
        impl crate::snapshot::incidental::IncidentalCodec for JukeboxCodec {
            fn kind(&self) -> &'static str {
                "jukebox"
            }
            fn encode(
                &self,
                _payload: &crate::snapshot::incidental::IncidentalPayload,
            ) -> io::Result<Vec<u8>> {
                Ok(vec![1, 2, 3])
            }
            fn decode(
                &self,
                _bytes: &[u8],
            ) -> io::Result<crate::snapshot::incidental::IncidentalPayload> {
                unreachable!("write-only in this test")
            }
        }

        // Hand-encode an incidental table carrying an unknown kind between
        // two known ones, then splice it into a file.
        let registry = IncidentalRegistry::standard();
        let meta = sample_meta();
        let mut out = Vec::new();
        write_header(&mut out, &meta, None, false).unwrap();
        let mut enc = FrameEncoder::new(out);
        wire::write_u32(&mut enc, 0).unwrap(); // sections
        wire::write_u32(&mut enc, 0).unwrap(); // entities
        wire::write_u32(&mut enc, 2).unwrap(); // incidental kind tables
        // unknown kind with one record
        wire::write_str(&mut enc, "jukebox").unwrap();
        wire::write_u32(&mut enc, 1).unwrap();
        wire::write_f64(&mut enc, 1.0).unwrap();
        wire::write_f64(&mut enc, 2.0).unwrap();
        wire::write_f64(&mut enc, 3.0).unwrap();
        wire::write_blob(&mut enc, &JukeboxCodec.encode(&IncidentalState::sign(SignState::default()).payload).unwrap()).unwrap();
        wire::write_u16(&mut enc, 0).unwrap(); // extras
        // known kind with one record
        let sign = IncidentalState::sign(SignState {
            lines: vec!["hi".into()],
            color: "black".into(),
            glowing: false,
        });
        wire::write_str(&mut enc, "sign").unwrap();
        wire::write_u32(&mut enc, 1).unwrap();
        wire::write_f64(&mut enc, 4.0).unwrap();
        wire::write_f64(&mut enc, 5.0).unwrap();
        wire::write_f64(&mut enc, 6.0).unwrap();
        wire::write_blob(
            &mut enc,
            &registry.codec_for("sign").unwrap().encode(&sign.payload).unwrap(),
        )
        .unwrap();
        wire::write_u16(&mut enc, 0).unwrap();
        wire::write_u32(&mut enc, 0).unwrap(); // diff
        let file = enc.finish().unwrap();

        let loaded = decode_file(&file, &registry).unwrap();
        assert_eq!(loaded.contents.incidental.len(), 1);
        assert_eq!(
            loaded.contents.incidental[&VoxelPos::new(4, 5, 6)],
            sign
        );
    }

    #[tokio::test]
    async fn test_write_read_with_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = SnapshotStore::snapshot_path(dir.path(), "arena");
        let store = SnapshotStore::standard();

        let snapshot = RegionSnapshot::from_capture(
            "arena",
            path.clone(),
            sample_meta(),
            sample_contents(),
        );
        store.write(&snapshot).await.unwrap();
        let first_bytes = std::fs::read(&path).unwrap();

        let loaded = store.read(&path).await.unwrap();
        assert_eq!(loaded.contents.sections, sample_contents().sections);

        // Second write keeps the previous file as the .bak sibling.
        snapshot.record_modified(VoxelPos::new(0, 1, 0), "v1;stone".into());
        store.write(&snapshot).await.unwrap();
        let bak = std::fs::read(format!("{}.bak", path.display())).unwrap();
        assert_eq!(bak, first_bytes);
    }

    #[tokio::test]
    async fn test_streaming_matches_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::standard();
        let meta = sample_meta();
        let contents = sample_contents();

        let buffered_path = SnapshotStore::snapshot_path(dir.path(), "buffered");
        let snapshot = RegionSnapshot::from_capture(
            "buffered",
            buffered_path.clone(),
            meta.clone(),
            contents.clone(),
        );
        store.write(&snapshot).await.unwrap();

        let streamed_path = SnapshotStore::snapshot_path(dir.path(), "streamed");
        let mut writer = store
            .start_streaming_write(
                &streamed_path,
                &meta,
                None,
                false,
                contents.sections.len() as u32,
            )
            .unwrap();
        for (name, voxels) in &contents.sections {
            writer.write_section(name, voxels.iter()).unwrap();
        }
        writer
            .finalize(&contents.entities, &contents.incidental, &contents.modified)
            .unwrap();

        let a = store.read(&buffered_path).await.unwrap();
        let b = store.read(&streamed_path).await.unwrap();
        assert_eq!(a.meta, b.meta);
        assert_eq!(a.contents.sections, b.contents.sections);
        assert_eq!(a.contents.entities, b.contents.entities);
        assert_eq!(a.contents.incidental, b.contents.incidental);
        assert_eq!(a.contents.modified, b.contents.modified);
    }

    #[test]
    fn test_streaming_section_count_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::standard();
        let path = SnapshotStore::snapshot_path(dir.path(), "strict");
        let voxels: BTreeMap<VoxelPos, String> =
            [(VoxelPos::new(0, 0, 0), "v1;stone".to_string())].into();

        let mut writer = store
            .start_streaming_write(&path, &sample_meta(), None, false, 1)
            .unwrap();
        writer.write_section("c_0_0_0", voxels.iter()).unwrap();
        assert!(writer.write_section("c_0_0_1", voxels.iter()).is_err());

        let writer = store
            .start_streaming_write(&path, &sample_meta(), None, false, 2)
            .unwrap();
        assert!(writer
            .finalize(&[], &BTreeMap::new(), &BTreeMap::new())
            .is_err());
    }
}
