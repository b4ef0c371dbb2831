//! Decoding of restore units
//!
//! A restore unit is one stored backup file together with the compression
//! tag its metadata recorded. Units are decoded independently: a corrupt unit
//! is reported with its name and codec and never stops its siblings.

use crate::compression::{self, CompressionType};
use crate::error::RestoreError;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// One stored file to decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreUnit {
    /// Name used in logs and errors, e.g. `rs0/admin.users`
    pub name: String,
    pub source: PathBuf,
    pub compression: CompressionType,
}

impl RestoreUnit {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(name: S, source: P, compression: CompressionType) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            compression,
        }
    }

    /// File name of the decoded output: the source name without its codec suffix
    pub fn output_name(&self) -> String {
        let file_name = self
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.replace('/', "_"));
        match file_name.strip_suffix(self.compression.suffix()) {
            Some(stripped) if !stripped.is_empty() => stripped.to_string(),
            _ => file_name,
        }
    }

    /// Where the decoded file lands under `output_dir`. The directories of the
    /// unit name are kept, so `rs0/users` and `rs1/users` do not meet.
    pub fn output_path(&self, output_dir: &Path) -> PathBuf {
        let mut path = output_dir.to_path_buf();
        if let Some(parent) = Path::new(&self.name).parent() {
            path.extend(parent.components().filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            }));
        }
        path.join(self.output_name())
    }
}

/// Result of decoding one unit
#[derive(Debug)]
pub struct UnitOutcome {
    pub unit: String,
    pub compression: CompressionType,
    pub result: Result<UnitStats, RestoreError>,
}

impl UnitOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Byte counts of a decoded unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Reader that counts the bytes pulled through it
struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Decode `source` written with `codec` into `dest`. Read errors and write
/// errors are reported separately so a full disk is not mistaken for a
/// corrupt backup.
pub fn decode_stream<R: Read, W: Write>(
    unit: &str,
    source: R,
    codec: CompressionType,
    dest: &mut W,
) -> Result<UnitStats, RestoreError> {
    let counter = CountingReader { inner: source, count: 0 };
    let mut decoder = compression::decompress(counter, codec).map_err(|source| RestoreError::Codec {
        unit: unit.to_string(),
        source,
    })?;

    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut bytes_out = 0u64;
    loop {
        let n = match decoder.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(RestoreError::Decode {
                    unit: unit.to_string(),
                    codec,
                    source,
                })
            }
        };
        dest.write_all(&buf[..n]).map_err(|source| RestoreError::Write {
            unit: unit.to_string(),
            source,
        })?;
        bytes_out += n as u64;
    }
    dest.flush().map_err(|source| RestoreError::Write {
        unit: unit.to_string(),
        source,
    })?;

    let bytes_in = decoder.get_ref().count;
    Ok(UnitStats { bytes_in, bytes_out })
}

/// True if both paths exist and resolve to the same file
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Decode the file at `source_path` into `out_path`.
///
/// Output is staged in a temporary file next to `out_path` and renamed over
/// it only once decoding succeeded; a failed decode leaves any existing file
/// at `out_path` untouched. An output path that is the source itself is
/// refused.
pub fn decode_file(
    unit: &str,
    source_path: &Path,
    codec: CompressionType,
    out_path: &Path,
) -> Result<UnitStats, RestoreError> {
    if same_file(source_path, out_path) {
        return Err(RestoreError::SameFile {
            unit: unit.to_string(),
            path: out_path.display().to_string(),
        });
    }

    let file = File::open(source_path).map_err(|source| RestoreError::Open {
        unit: unit.to_string(),
        path: source_path.display().to_string(),
        source,
    })?;

    let dir = match out_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let open_err = |source| RestoreError::Open {
        unit: unit.to_string(),
        path: dir.display().to_string(),
        source,
    };
    fs::create_dir_all(dir).map_err(open_err)?;
    let staged = tempfile::Builder::new()
        .prefix(".pbm-restore-")
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(open_err)?;

    // Dropping the staged file on any error below removes it
    let mut writer = BufWriter::new(staged);
    let stats = decode_stream(unit, BufReader::new(file), codec, &mut writer)?;
    let staged = writer.into_inner().map_err(|e| RestoreError::Write {
        unit: unit.to_string(),
        source: e.into_error(),
    })?;
    staged.persist(out_path).map_err(|e| RestoreError::Write {
        unit: unit.to_string(),
        source: e.error,
    })?;
    Ok(stats)
}

/// Decode one unit from its source file into `output_dir`
pub fn decode_unit(unit: &RestoreUnit, output_dir: &Path) -> Result<UnitStats, RestoreError> {
    let started = Instant::now();
    let out_path = unit.output_path(output_dir);
    let stats = decode_file(&unit.name, &unit.source, unit.compression, &out_path)?;
    tracing::info!(
        unit = %unit.name,
        codec = %unit.compression,
        output = %out_path.display(),
        bytes_in = stats.bytes_in,
        bytes_out = stats.bytes_out,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "restore unit decoded"
    );
    Ok(stats)
}

/// Pair every unit with its output path. A unit whose output path an earlier
/// unit already claimed is failed up front instead of overwriting it.
fn plan_outputs(units: Vec<RestoreUnit>, output_dir: &Path) -> Vec<(RestoreUnit, Result<(), RestoreError>)> {
    let mut claimed: HashMap<PathBuf, String> = HashMap::new();
    units
        .into_iter()
        .map(|unit| {
            let path = unit.output_path(output_dir);
            let slot = match claimed.get(&path) {
                Some(other) => Err(RestoreError::Collision {
                    unit: unit.name.clone(),
                    path: path.display().to_string(),
                    other: other.clone(),
                }),
                None => {
                    claimed.insert(path, unit.name.clone());
                    Ok(())
                }
            };
            (unit, slot)
        })
        .collect()
}

/// Decode a batch of units on blocking worker threads, at most
/// `max_concurrent` at a time. Outcomes come back in input order.
pub async fn decode_units(units: Vec<RestoreUnit>, output_dir: PathBuf, max_concurrent: usize) -> Vec<UnitOutcome> {
    let max_concurrent = max_concurrent.max(1);
    tracing::info!(units = units.len(), max_concurrent, "decoding restore units");

    stream::iter(plan_outputs(units, &output_dir))
        .map(|(unit, slot)| {
            let output_dir = output_dir.clone();
            async move {
                let name = unit.name.clone();
                let compression = unit.compression;
                let result = match slot {
                    Err(e) => Err(e),
                    Ok(()) => match tokio::task::spawn_blocking(move || decode_unit(&unit, &output_dir)).await {
                        Ok(result) => result,
                        Err(e) => Err(RestoreError::Worker {
                            unit: name.clone(),
                            message: e.to_string(),
                        }),
                    },
                };
                if let Err(e) = &result {
                    tracing::warn!(unit = %name, codec = %compression, error = %e, "restore unit failed");
                }
                UnitOutcome {
                    unit: name,
                    compression,
                    result,
                }
            }
        })
        .buffered(max_concurrent)
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use rand::{Rng, SeedableRng};
    use tempfile::TempDir;

    fn payload(len: usize) -> Vec<u8> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        (0..len).map(|_| rng.gen_range(b'a'..=b'f')).collect()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn snappy(data: &[u8]) -> Vec<u8> {
        let mut encoder = snap::write::FrameEncoder::new(Vec::new());
        encoder.write_all(data).unwrap();
        encoder.into_inner().unwrap()
    }

    /// Writer that refuses every write
    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "no space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Staged files still present in `dir`
    fn leftovers(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".partial"))
            .collect()
    }

    #[test]
    fn test_output_path_keeps_unit_directories() {
        let out = Path::new("/restore");
        let unit = RestoreUnit::new("rs0/admin.users", "/backup/rs0/admin.users.bson.gz", CompressionType::Gzip);
        assert_eq!(unit.output_path(out), Path::new("/restore/rs0/admin.users.bson"));

        let unit = RestoreUnit::new("/backup/../rs1/users.bson.s2", "/backup/rs1/users.bson.s2", CompressionType::S2);
        assert_eq!(unit.output_path(out), Path::new("/restore/backup/rs1/users.bson"));

        let unit = RestoreUnit::new("oplog", "/backup/oplog.bson", CompressionType::None);
        assert_eq!(unit.output_path(out), Path::new("/restore/oplog.bson"));
    }

    #[test]
    fn test_output_name() {
        let unit = RestoreUnit::new("rs0/admin.users", "/backup/rs0/admin.users.bson.gz", CompressionType::Gzip);
        assert_eq!(unit.output_name(), "admin.users.bson");

        let unit = RestoreUnit::new("rs0/oplog", "/backup/rs0/oplog.bson", CompressionType::None);
        assert_eq!(unit.output_name(), "oplog.bson");

        let unit = RestoreUnit::new("rs0/odd", "/backup/rs0/odd.bin", CompressionType::S2);
        assert_eq!(unit.output_name(), "odd.bin");
    }

    #[test]
    fn test_decode_stream_counts_bytes() {
        let data = payload(100_000);
        let compressed = gzip(&data);
        let mut out = Vec::new();
        let stats = decode_stream("unit", &compressed[..], CompressionType::Gzip, &mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(stats.bytes_out, data.len() as u64);
        assert_eq!(stats.bytes_in, compressed.len() as u64);
    }

    #[test]
    fn test_decode_stream_error_kinds() {
        let err = decode_stream("u1", &b"plain"[..], CompressionType::Gzip, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, RestoreError::Codec { .. }));

        let mut corrupt = snappy(&payload(10_000));
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xff;
        let err = decode_stream("u2", &corrupt[..], CompressionType::Snappy, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, RestoreError::Decode { codec: CompressionType::Snappy, .. }));
        assert_eq!(err.unit(), "u2");

        let err = decode_stream("u3", &b"raw"[..], CompressionType::None, &mut FullDisk).unwrap_err();
        assert!(matches!(err, RestoreError::Write { .. }));
    }

    #[test]
    fn test_decode_unit_missing_source() {
        let dir = TempDir::new().unwrap();
        let unit = RestoreUnit::new("rs0/missing", dir.path().join("missing.gz"), CompressionType::Gzip);
        let err = decode_unit(&unit, dir.path()).unwrap_err();
        assert!(matches!(err, RestoreError::Open { .. }));
        assert!(err.to_string().contains("rs0/missing"));
    }

    #[tokio::test]
    async fn test_failed_unit_does_not_abort_siblings() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let data = payload(50_000);

        fs::write(src.path().join("a.bson.gz"), gzip(&data)).unwrap();
        fs::write(src.path().join("b.bson.gz"), b"not gzip at all").unwrap();
        fs::write(src.path().join("c.bson.snappy"), snappy(&data)).unwrap();
        fs::write(src.path().join("d.bson"), &data).unwrap();

        let units = vec![
            RestoreUnit::new("rs0/a", src.path().join("a.bson.gz"), CompressionType::Gzip),
            RestoreUnit::new("rs0/b", src.path().join("b.bson.gz"), CompressionType::Pgzip),
            RestoreUnit::new("rs0/c", src.path().join("c.bson.snappy"), CompressionType::Snappy),
            RestoreUnit::new("rs0/d", src.path().join("d.bson"), "unknown".parse().unwrap()),
        ];

        let outcomes = decode_units(units, out.path().to_path_buf(), 2).await;
        let names: Vec<&str> = outcomes.iter().map(|o| o.unit.as_str()).collect();
        assert_eq!(names, vec!["rs0/a", "rs0/b", "rs0/c", "rs0/d"]);

        assert!(outcomes[0].is_ok());
        assert!(!outcomes[1].is_ok());
        assert!(outcomes[2].is_ok());
        assert!(outcomes[3].is_ok());

        match &outcomes[1].result {
            Err(RestoreError::Codec { unit, source }) => {
                assert_eq!(unit, "rs0/b");
                assert_eq!(source.codec(), CompressionType::Pgzip);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let restored = out.path().join("rs0");
        assert_eq!(fs::read(restored.join("a.bson")).unwrap(), data);
        assert_eq!(fs::read(restored.join("c.bson")).unwrap(), data);
        assert_eq!(fs::read(restored.join("d.bson")).unwrap(), data);
        assert!(!restored.join("b.bson").exists());
        assert_eq!(leftovers(&restored), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_same_file_name_in_different_replica_sets() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let data = payload(20_000);

        fs::create_dir_all(src.path().join("rs0")).unwrap();
        fs::create_dir_all(src.path().join("rs1")).unwrap();
        fs::write(src.path().join("rs0/users.bson.gz"), gzip(&data)).unwrap();
        fs::write(src.path().join("rs1/users.bson.gz"), b"corrupt").unwrap();

        let units = vec![
            RestoreUnit::new("rs0/users", src.path().join("rs0/users.bson.gz"), CompressionType::Gzip),
            RestoreUnit::new("rs1/users", src.path().join("rs1/users.bson.gz"), CompressionType::Gzip),
        ];
        let outcomes = decode_units(units, out.path().to_path_buf(), 1).await;

        assert!(outcomes[0].is_ok());
        assert!(!outcomes[1].is_ok());
        assert_eq!(fs::read(out.path().join("rs0/users.bson")).unwrap(), data);
        assert!(!out.path().join("rs1/users.bson").exists());
    }

    #[tokio::test]
    async fn test_duplicate_output_path_is_refused() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let data = payload(5_000);

        fs::create_dir_all(src.path().join("copy")).unwrap();
        fs::write(src.path().join("first.bson.gz"), gzip(&data)).unwrap();
        fs::write(src.path().join("copy/first.bson"), b"must not win").unwrap();
        fs::write(src.path().join("second.bson"), b"other bytes").unwrap();

        // Different sources, same output: rs0/first.bson
        let units = vec![
            RestoreUnit::new("rs0/users", src.path().join("first.bson.gz"), CompressionType::Gzip),
            RestoreUnit::new("rs0/users", src.path().join("copy/first.bson"), CompressionType::None),
            RestoreUnit::new("rs0/second", src.path().join("second.bson"), CompressionType::None),
        ];
        let outcomes = decode_units(units, out.path().to_path_buf(), 3).await;

        assert!(outcomes[0].is_ok());
        assert!(outcomes[2].is_ok());
        match &outcomes[1].result {
            Err(RestoreError::Collision { unit, other, .. }) => {
                assert_eq!(unit, "rs0/users");
                assert_eq!(other, "rs0/users");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(fs::read(out.path().join("rs0/first.bson")).unwrap(), data);
        assert_eq!(fs::read(out.path().join("rs0/second.bson")).unwrap(), b"other bytes");
    }

    #[test]
    fn test_refuses_to_overwrite_source() {
        let dir = TempDir::new().unwrap();
        let data = payload(1_000);
        let source = dir.path().join("oplog.bson");
        fs::write(&source, &data).unwrap();

        let unit = RestoreUnit::new("oplog", &source, CompressionType::None);
        let err = decode_unit(&unit, dir.path()).unwrap_err();
        assert!(matches!(err, RestoreError::SameFile { .. }));
        assert_eq!(fs::read(&source).unwrap(), data);

        let rs0 = dir.path().join("rs0");
        fs::create_dir_all(&rs0).unwrap();
        let nested_source = rs0.join("oplog.bson");
        fs::write(&nested_source, &data).unwrap();
        let nested = RestoreUnit::new("rs0/oplog", &nested_source, "unknown".parse().unwrap());
        let err = decode_unit(&nested, dir.path()).unwrap_err();
        assert!(matches!(err, RestoreError::SameFile { .. }));
        assert_eq!(fs::read(&nested_source).unwrap(), data);

        let err = decode_file("oplog", &source, CompressionType::None, &source).unwrap_err();
        assert!(matches!(err, RestoreError::SameFile { .. }));
        assert_eq!(fs::read(&source).unwrap(), data);
    }

    #[test]
    fn test_failed_decode_keeps_existing_output() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("broken.bson.snappy");
        let mut corrupt = snappy(&payload(10_000));
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xff;
        fs::write(&source, corrupt).unwrap();

        let out_dir = dir.path().join("out");
        fs::create_dir_all(&out_dir).unwrap();
        let target = out_dir.join("broken.bson");
        fs::write(&target, b"restored earlier").unwrap();

        let err = decode_file("broken", &source, CompressionType::Snappy, &target).unwrap_err();
        assert!(matches!(err, RestoreError::Decode { .. }));
        assert_eq!(fs::read(&target).unwrap(), b"restored earlier");
        assert_eq!(leftovers(&out_dir), Vec::<String>::new());
    }

    #[test]
    fn test_decode_file_replaces_existing_output() {
        let dir = TempDir::new().unwrap();
        let data = payload(3_000);
        let source = dir.path().join("users.bson.gz");
        fs::write(&source, gzip(&data)).unwrap();
        let target = dir.path().join("users.bson");
        fs::write(&target, b"stale").unwrap();

        let stats = decode_file("users", &source, CompressionType::Gzip, &target).unwrap();
        assert_eq!(stats.bytes_out, data.len() as u64);
        assert_eq!(fs::read(&target).unwrap(), data);
    }

    #[tokio::test]
    async fn test_decode_units_empty_batch() {
        let out = TempDir::new().unwrap();
        let outcomes = decode_units(Vec::new(), out.path().to_path_buf(), 0).await;
        assert!(outcomes.is_empty());
    }
}
