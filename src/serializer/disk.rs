//! The disk backend: one file per key under the thread's `ebs_<tid>` directory.
//!
//! Every write rewrites the whole file through a temp-file-and-rename, so a
//! crash mid-write leaves the previous value intact. Write failures are logged
//! and leave the stored state unchanged; `put` then reports the current
//! on-disk size.

use super::{Serializer, WireLattice};
use crate::{lattice::Lattice, Key, MeldError};
use eyre::Context;
use serde::de::DeserializeOwned;
use std::{
    fs, io,
    marker::PhantomData,
    path::{Path, PathBuf},
};

/// Returns the per-thread storage directory under the configured root,
/// creating it if necessary.
pub fn thread_dir(ebs_root: &Path, thread_id: u32) -> eyre::Result<PathBuf> {
    let dir = ebs_root.join(format!("ebs_{}", thread_id));
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create storage directory `{}`", dir.display()))?;
    Ok(dir)
}

/// The result of reading a per-key file.
enum DiskRead<L> {
    /// The file does not exist, i.e. the key was never written.
    Missing,
    /// The file exists but does not parse as a value of the expected lattice.
    Corrupt,
    /// The stored value.
    Value(L),
}

fn read_value<L: DeserializeOwned>(path: &Path) -> DiskRead<L> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return DiskRead::Missing,
        Err(err) => {
            log::error!("failed to read `{}`: {}", path.display(), err);
            return DiskRead::Missing;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => DiskRead::Value(value),
        Err(err) => {
            log::error!("failed to parse payload at `{}`: {}", path.display(), err);
            DiskRead::Corrupt
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// Writes the given payload, returning the resulting on-disk size.
///
/// A failed write is logged and leaves the previous file contents in place.
fn store(path: &Path, bytes: &[u8]) -> usize {
    match write_atomic(path, bytes) {
        Ok(()) => bytes.len(),
        Err(err) => {
            log::error!("failed to write payload to `{}`: {}", path.display(), err);
            file_len(path)
        }
    }
}

fn file_len(path: &Path) -> usize {
    fs::metadata(path).map(|m| m.len() as usize).unwrap_or(0)
}

fn unlink(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        log::error!("error deleting file `{}`: {}", path.display(), err);
    }
}

fn get_serialized<L: WireLattice>(path: &Path) -> Result<Vec<u8>, MeldError> {
    match read_value::<L>(path) {
        DiskRead::Missing | DiskRead::Corrupt => Err(MeldError::KeyDoesNotExist),
        DiskRead::Value(value) => {
            if value.is_bottom() {
                Err(MeldError::KeyDoesNotExist)
            } else {
                serde_json::to_vec(&value).map_err(MeldError::from)
            }
        }
    }
}

/// Disk serializer for lattice types without a merge shortcut.
///
/// On every PUT against an existing key, the stored value is parsed, merged
/// with the incoming one through the lattice merge law, and rewritten.
pub struct DiskSerializer<L> {
    dir: PathBuf,
    _lattice: PhantomData<L>,
}

impl<L> DiskSerializer<L> {
    /// Creates a new adapter storing its files in the given directory.
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            _lattice: PhantomData,
        }
    }

    fn key_path(&self, key: &Key) -> PathBuf {
        self.dir.join(key.to_string())
    }
}

impl<L> Serializer for DiskSerializer<L>
where
    L: WireLattice,
{
    fn get(&self, key: &Key) -> Result<Vec<u8>, MeldError> {
        get_serialized::<L>(&self.key_path(key))
    }

    fn put(&mut self, key: &Key, serialized: &[u8]) -> Result<usize, MeldError> {
        let incoming: L = serde_json::from_slice(serialized)?;
        let path = self.key_path(key);

        match read_value::<L>(&path) {
            DiskRead::Missing | DiskRead::Corrupt => {
                let bytes = serde_json::to_vec(&incoming)?;
                Ok(store(&path, &bytes))
            }
            DiskRead::Value(mut stored) => {
                stored.merge(&incoming);
                let bytes = serde_json::to_vec(&stored)?;
                Ok(store(&path, &bytes))
            }
        }
    }

    fn remove(&mut self, key: &Key) {
        unlink(&self.key_path(key));
    }
}

/// Disk serializer for last-writer-wins values.
///
/// Uses a merge shortcut: the file is only rewritten if the incoming value
/// wins the last-writer-wins merge (newer timestamp, or the larger value on
/// equal timestamps), since a losing write makes the full
/// parse-merge-rewrite cycle unnecessary. The winner must match the
/// in-memory merge exactly, so all replicas converge on concurrent writes
/// with identical timestamps regardless of arrival order.
pub struct DiskLwwSerializer {
    dir: PathBuf,
}

impl DiskLwwSerializer {
    /// Creates a new adapter storing its files in the given directory.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn key_path(&self, key: &Key) -> PathBuf {
        self.dir.join(key.to_string())
    }
}

type LwwValue = crate::lattice::LastWriterWinsLattice<Vec<u8>>;

impl Serializer for DiskLwwSerializer {
    fn get(&self, key: &Key) -> Result<Vec<u8>, MeldError> {
        get_serialized::<LwwValue>(&self.key_path(key))
    }

    fn put(&mut self, key: &Key, serialized: &[u8]) -> Result<usize, MeldError> {
        let incoming: LwwValue = serde_json::from_slice(serialized)?;
        let path = self.key_path(key);

        match read_value::<LwwValue>(&path) {
            DiskRead::Missing | DiskRead::Corrupt => {
                let bytes = serde_json::to_vec(&incoming)?;
                Ok(store(&path, &bytes))
            }
            DiskRead::Value(stored) => {
                let incoming_pair = incoming.reveal();
                let stored_pair = stored.reveal();
                let incoming_wins = incoming_pair.timestamp() > stored_pair.timestamp()
                    || (incoming_pair.timestamp() == stored_pair.timestamp()
                        && incoming_pair.value() > stored_pair.value());
                if incoming_wins {
                    let bytes = serde_json::to_vec(&incoming)?;
                    Ok(store(&path, &bytes))
                } else {
                    Ok(file_len(&path))
                }
            }
        }
    }

    fn remove(&mut self, key: &Key) {
        unlink(&self.key_path(key));
    }
}

/// Disk serializer for priority values.
///
/// The file is only rewritten when the incoming priority is strictly smaller
/// than the stored one; an incoming value with an equal priority is dropped.
pub struct DiskPrioritySerializer {
    dir: PathBuf,
}

impl DiskPrioritySerializer {
    /// Creates a new adapter storing its files in the given directory.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn key_path(&self, key: &Key) -> PathBuf {
        self.dir.join(key.to_string())
    }
}

type PriorityValue = crate::lattice::PriorityLattice<f64, Vec<u8>>;

impl Serializer for DiskPrioritySerializer {
    fn get(&self, key: &Key) -> Result<Vec<u8>, MeldError> {
        get_serialized::<PriorityValue>(&self.key_path(key))
    }

    fn put(&mut self, key: &Key, serialized: &[u8]) -> Result<usize, MeldError> {
        let incoming: PriorityValue = serde_json::from_slice(serialized)?;
        let path = self.key_path(key);

        let overwrite = match read_value::<PriorityValue>(&path) {
            DiskRead::Missing | DiskRead::Corrupt => true,
            DiskRead::Value(stored) => incoming.reveal().priority < stored.reveal().priority,
        };
        if overwrite {
            let bytes = serde_json::to_vec(&incoming)?;
            Ok(store(&path, &bytes))
        } else {
            Ok(file_len(&path))
        }
    }

    fn remove(&mut self, key: &Key) {
        unlink(&self.key_path(key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::{
        last_writer_wins::Timestamp, LastWriterWinsLattice, PriorityLattice, SetLattice,
    };
    use std::collections::HashSet;

    fn payload<L: serde::Serialize>(lattice: &L) -> Vec<u8> {
        serde_json::to_vec(lattice).unwrap()
    }

    fn test_key() -> Key {
        crate::ClientKey::from("key").into()
    }

    #[test]
    fn get_of_missing_file_signals_key_dne() {
        let dir = tempfile::tempdir().unwrap();
        let serializer = DiskSerializer::<SetLattice<Vec<u8>>>::new(dir.path().to_owned());
        assert_eq!(serializer.get(&test_key()), Err(MeldError::KeyDoesNotExist));
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut serializer = DiskSerializer::<SetLattice<Vec<u8>>>::new(dir.path().to_owned());
        let key = test_key();

        let set = SetLattice::new([b"x".to_vec()].iter().cloned().collect());
        let size = serializer.put(&key, &payload(&set)).unwrap();
        assert_eq!(size, payload(&set).len());

        let stored: SetLattice<Vec<u8>> =
            serde_json::from_slice(&serializer.get(&key).unwrap()).unwrap();
        assert_eq!(stored, set);
    }

    #[test]
    fn put_merges_with_stored_value() {
        let dir = tempfile::tempdir().unwrap();
        let mut serializer = DiskSerializer::<SetLattice<Vec<u8>>>::new(dir.path().to_owned());
        let key = test_key();

        let first = SetLattice::new([b"x".to_vec(), b"y".to_vec()].iter().cloned().collect());
        let second = SetLattice::new([b"y".to_vec(), b"z".to_vec()].iter().cloned().collect());
        serializer.put(&key, &payload(&first)).unwrap();
        serializer.put(&key, &payload(&second)).unwrap();

        let stored: SetLattice<Vec<u8>> =
            serde_json::from_slice(&serializer.get(&key).unwrap()).unwrap();
        let union: HashSet<Vec<u8>> = [b"x".to_vec(), b"y".to_vec(), b"z".to_vec()]
            .iter()
            .cloned()
            .collect();
        assert_eq!(stored.reveal(), &union);
    }

    #[test]
    fn empty_carrier_reads_as_key_dne() {
        let dir = tempfile::tempdir().unwrap();
        let mut serializer = DiskSerializer::<SetLattice<Vec<u8>>>::new(dir.path().to_owned());
        let key = test_key();

        serializer
            .put(&key, &payload(&SetLattice::<Vec<u8>>::default()))
            .unwrap();
        assert_eq!(serializer.get(&key), Err(MeldError::KeyDoesNotExist));
    }

    #[test]
    fn lww_put_skips_older_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let mut serializer = DiskLwwSerializer::new(dir.path().to_owned());
        let key = test_key();

        let newer = LastWriterWinsLattice::from_pair(Timestamp::from_micros(10), b"a".to_vec());
        let older = LastWriterWinsLattice::from_pair(Timestamp::from_micros(5), b"b".to_vec());

        serializer.put(&key, &payload(&newer)).unwrap();
        serializer.put(&key, &payload(&older)).unwrap();

        let stored: LastWriterWinsLattice<Vec<u8>> =
            serde_json::from_slice(&serializer.get(&key).unwrap()).unwrap();
        assert_eq!(stored, newer);
    }

    #[test]
    fn lww_put_keeps_larger_value_on_equal_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let mut serializer = DiskLwwSerializer::new(dir.path().to_owned());
        let key = test_key();

        // the incoming value is smaller than the stored one, so it must lose
        // the tie break just like it does in the in-memory merge
        let first = LastWriterWinsLattice::from_pair(Timestamp::from_micros(10), b"b".to_vec());
        let second = LastWriterWinsLattice::from_pair(Timestamp::from_micros(10), b"a".to_vec());

        serializer.put(&key, &payload(&first)).unwrap();
        serializer.put(&key, &payload(&second)).unwrap();

        let stored: LastWriterWinsLattice<Vec<u8>> =
            serde_json::from_slice(&serializer.get(&key).unwrap()).unwrap();
        assert_eq!(stored, first);

        // a larger value with the same timestamp does overwrite
        let third = LastWriterWinsLattice::from_pair(Timestamp::from_micros(10), b"c".to_vec());
        serializer.put(&key, &payload(&third)).unwrap();
        let stored: LastWriterWinsLattice<Vec<u8>> =
            serde_json::from_slice(&serializer.get(&key).unwrap()).unwrap();
        assert_eq!(stored, third);
    }

    #[test]
    fn put_replaces_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut serializer = DiskSerializer::<SetLattice<Vec<u8>>>::new(dir.path().to_owned());
        let key = test_key();

        std::fs::write(dir.path().join(key.to_string()), b"not json").unwrap();
        assert_eq!(serializer.get(&key), Err(MeldError::KeyDoesNotExist));

        // a valid write must repair the key instead of being dropped
        let set = SetLattice::new([b"x".to_vec()].iter().cloned().collect());
        serializer.put(&key, &payload(&set)).unwrap();

        let stored: SetLattice<Vec<u8>> =
            serde_json::from_slice(&serializer.get(&key).unwrap()).unwrap();
        assert_eq!(stored, set);
    }

    #[test]
    fn priority_put_requires_strictly_smaller_priority() {
        let dir = tempfile::tempdir().unwrap();
        let mut serializer = DiskPrioritySerializer::new(dir.path().to_owned());
        let key = test_key();

        let first = PriorityLattice::from_pair(5.0, b"a".to_vec());
        serializer.put(&key, &payload(&first)).unwrap();

        // an equal priority with a different value is dropped
        let equal = PriorityLattice::from_pair(5.0, b"b".to_vec());
        serializer.put(&key, &payload(&equal)).unwrap();
        let stored: PriorityLattice<f64, Vec<u8>> =
            serde_json::from_slice(&serializer.get(&key).unwrap()).unwrap();
        assert_eq!(stored, first);

        // a strictly smaller priority overwrites
        let smaller = PriorityLattice::from_pair(2.0, b"c".to_vec());
        serializer.put(&key, &payload(&smaller)).unwrap();
        let stored: PriorityLattice<f64, Vec<u8>> =
            serde_json::from_slice(&serializer.get(&key).unwrap()).unwrap();
        assert_eq!(stored, smaller);
    }

    #[test]
    fn remove_unlinks_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut serializer = DiskSerializer::<SetLattice<Vec<u8>>>::new(dir.path().to_owned());
        let key = test_key();

        let set = SetLattice::new([b"x".to_vec()].iter().cloned().collect());
        serializer.put(&key, &payload(&set)).unwrap();
        serializer.remove(&key);
        assert_eq!(serializer.get(&key), Err(MeldError::KeyDoesNotExist));
    }
}
