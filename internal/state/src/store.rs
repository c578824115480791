//! Keyed stores: a record file plus a separate offset index, so consumers can
//! random-access records by id without loading the whole store.

use std::{
    collections::HashMap,
    fs::File,
    hash::Hash,
    io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

use crate::{Error, FileHeader};

/// Writes a keyed store. Records land in a temporary file that is renamed
/// into place on [`commit`](StoreWriter::commit), alongside its index.
pub struct StoreWriter<K, V> {
    writer: BufWriter<NamedTempFile>,
    index: HashMap<K, u64>,
    offset: u64,
    data_dest: PathBuf,
    index_dest: PathBuf,
    pass: String,
    _value: PhantomData<V>,
}

impl<K, V> StoreWriter<K, V>
where
    K: Serialize + Eq + Hash,
    V: Serialize,
{
    pub(crate) fn create(
        dir: &Path,
        data_dest: PathBuf,
        index_dest: PathBuf,
        pass: &str,
    ) -> Result<Self, Error> {
        let mut file = NamedTempFile::new_in(dir)?;
        let header = bincode::serialize(&FileHeader::new(pass))?;
        file.write_all(&header)?;

        Ok(Self {
            offset: header.len() as u64,
            writer: BufWriter::new(file),
            index: HashMap::new(),
            data_dest,
            index_dest,
            pass: pass.to_string(),
            _value: PhantomData,
        })
    }

    /// Appends one record. Pushing the same key twice keeps the latest
    /// record reachable; the earlier bytes become dead weight.
    pub fn push(&mut self, key: K, value: &V) -> Result<(), Error> {
        let bytes = bincode::serialize(value)?;
        self.writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
        self.writer.write_all(&bytes)?;
        self.index.insert(key, self.offset);
        self.offset += 4 + bytes.len() as u64;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Persists the data file and its index.
    pub fn commit(self) -> Result<(), Error> {
        let file = self
            .writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        file.persist(&self.data_dest).map_err(|e| Error::Io(e.error))?;

        let dir = self
            .index_dest
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let mut index_file = NamedTempFile::new_in(dir)?;
        index_file.write_all(&bincode::serialize(&FileHeader::new(&self.pass))?)?;
        bincode::serialize_into(&mut index_file, &self.index)?;
        index_file
            .persist(&self.index_dest)
            .map_err(|e| Error::Io(e.error))?;

        Ok(())
    }
}

/// Read access to a keyed store.
pub struct Store<K, V> {
    reader: BufReader<File>,
    index: HashMap<K, u64>,
    _value: PhantomData<V>,
}

impl<K, V> Store<K, V>
where
    K: DeserializeOwned + Eq + Hash + std::fmt::Debug,
    V: DeserializeOwned,
{
    pub(crate) fn open(data_path: &Path, index_path: &Path) -> Result<Self, Error> {
        let mut reader = BufReader::new(File::open(data_path)?);
        let header: FileHeader = bincode::deserialize_from(&mut reader)?;
        header.verify(data_path)?;

        let mut index_reader = BufReader::new(File::open(index_path)?);
        let header: FileHeader = bincode::deserialize_from(&mut index_reader)?;
        header.verify(index_path)?;
        let index: HashMap<K, u64> = bincode::deserialize_from(&mut index_reader)?;

        Ok(Self {
            reader,
            index,
            _value: PhantomData,
        })
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.index.keys()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&mut self, key: &K) -> Result<V, Error> {
        let offset = *self
            .index
            .get(key)
            .ok_or_else(|| Error::MissingKey(format!("{:?}", key)))?;

        self.reader.seek(SeekFrom::Start(offset))?;
        let mut len_bytes = [0u8; 4];
        self.reader.read_exact(&mut len_bytes)?;
        let mut bytes = vec![0u8; u32::from_le_bytes(len_bytes) as usize];
        self.reader.read_exact(&mut bytes)?;

        Ok(bincode::deserialize(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("store");
        let index = dir.path().join("store.idx");

        let mut writer: StoreWriter<u32, String> =
            StoreWriter::create(dir.path(), data.clone(), index.clone(), "test").unwrap();
        writer.push(1, &String::from("one")).unwrap();
        writer.push(2, &String::from("two")).unwrap();
        writer.push(7, &String::from("seven")).unwrap();
        writer.commit().unwrap();

        let mut store: Store<u32, String> = Store::open(&data, &index).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(&7).unwrap(), "seven");
        assert_eq!(store.get(&1).unwrap(), "one");
        assert!(matches!(store.get(&9), Err(Error::MissingKey(_))));
    }

    #[test]
    fn test_store_rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("store");
        std::fs::write(&data, b"not a store at all").unwrap();

        assert!(Store::<u32, String>::open(&data, &data).is_err());
    }
}
