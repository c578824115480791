//! Data model and on-disk state for `cvs-svn-fast-export`.
//!
//! Every pass of the conversion pipeline reads files written by earlier
//! passes and writes its own through the [`Layout`]: writers land in
//! temporary files that are renamed into place, and a pass is recorded in the
//! `completed` marker only after all of its artifacts are durable. An
//! interrupted run therefore resumes at the boundary of the last completed
//! pass, and a half-written artifact is never observed.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tempfile::NamedTempFile;

pub mod changeset;
pub mod item;
pub mod metadata;
pub mod symbol;

mod error;
pub use self::error::Error;

mod store;
pub use self::store::{Store, StoreWriter};

/// Bumped whenever any intermediate format changes shape.
pub const SCHEMA_VERSION: u32 = 1;

const MAGIC: [u8; 4] = *b"CSFE";
const COMPLETED_MARKER: &str = "completed";

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FileHeader {
    magic: [u8; 4],
    pass: String,
    version: u32,
}

impl FileHeader {
    pub(crate) fn new(pass: &str) -> Self {
        Self {
            magic: MAGIC,
            pass: pass.to_string(),
            version: SCHEMA_VERSION,
        }
    }

    pub(crate) fn verify(&self, path: &Path) -> Result<(), Error> {
        if self.magic != MAGIC {
            return Err(Error::BadHeader {
                path: path.to_path_buf(),
                detail: String::from("wrong magic"),
            });
        }
        if self.version != SCHEMA_VERSION {
            return Err(Error::BadHeader {
                path: path.to_path_buf(),
                detail: format!(
                    "schema version {} (expected {})",
                    self.version, SCHEMA_VERSION
                ),
            });
        }
        Ok(())
    }
}

/// The stages the changeset partitioning moves through; each graph pass owns
/// the file for the stage it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangesetStage {
    Initial,
    RevisionsAcyclic,
    Ordered,
    SymbolsAcyclic,
    Acyclic,
}

/// Every intermediate file the pipeline knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Paths,
    Items,
    SymbolStats,
    Metadata,
    MetadataClean,
    TypedSymbols,
    RevisionStream,
    SymbolStream,
    SortedRevisionStream,
    SortedSymbolStream,
    DepIndex,
    GroupedItems,
    Changesets(ChangesetStage),
    Order,
    OpeningsClosings,
}

impl Artifact {
    fn file_name(&self) -> &'static str {
        match self {
            Artifact::Paths => "paths",
            Artifact::Items => "items",
            Artifact::SymbolStats => "symbol-stats",
            Artifact::Metadata => "metadata",
            Artifact::MetadataClean => "metadata-clean",
            Artifact::TypedSymbols => "symbols-typed",
            Artifact::RevisionStream => "revs",
            Artifact::SymbolStream => "syms",
            Artifact::SortedRevisionStream => "revs-sorted",
            Artifact::SortedSymbolStream => "syms-sorted",
            Artifact::DepIndex => "dep-index",
            Artifact::GroupedItems => "items-grouped",
            Artifact::Changesets(ChangesetStage::Initial) => "changesets-initial",
            Artifact::Changesets(ChangesetStage::RevisionsAcyclic) => "changesets-rev-acyclic",
            Artifact::Changesets(ChangesetStage::Ordered) => "changesets-ordered",
            Artifact::Changesets(ChangesetStage::SymbolsAcyclic) => "changesets-sym-acyclic",
            Artifact::Changesets(ChangesetStage::Acyclic) => "changesets-acyclic",
            Artifact::Order => "order",
            Artifact::OpeningsClosings => "openings-closings",
        }
    }
}

/// The working directory holding every intermediate file.
#[derive(Debug, Clone)]
pub struct Layout {
    dir: PathBuf,
}

impl Layout {
    pub fn open<P: Into<PathBuf>>(dir: P) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, artifact: Artifact) -> PathBuf {
        self.dir.join(artifact.file_name())
    }

    fn index_path(&self, artifact: Artifact) -> PathBuf {
        self.dir.join(format!("{}.idx", artifact.file_name()))
    }

    /// Serializes `value` as a whole-file bincode artifact.
    pub fn write_bincode<T: Serialize>(
        &self,
        pass: &str,
        artifact: Artifact,
        value: &T,
    ) -> Result<(), Error> {
        let mut file = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(&mut file);
            bincode::serialize_into(&mut writer, &FileHeader::new(pass))?;
            bincode::serialize_into(&mut writer, value)?;
            writer.flush()?;
        }
        file.persist(self.path(artifact))
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    pub fn read_bincode<T: DeserializeOwned>(&self, artifact: Artifact) -> Result<T, Error> {
        let path = self.path(artifact);
        let mut reader = BufReader::new(File::open(&path)?);
        let header: FileHeader = bincode::deserialize_from(&mut reader)?;
        header.verify(&path)?;
        Ok(bincode::deserialize_from(&mut reader)?)
    }

    /// Opens a line-stream artifact for writing.
    pub fn line_writer(&self, pass: &str, artifact: Artifact) -> Result<LineWriter, Error> {
        let mut file = NamedTempFile::new_in(&self.dir)?;
        writeln!(file, "#csfe {} {}", pass, SCHEMA_VERSION)?;
        Ok(LineWriter {
            writer: BufWriter::new(file),
            dest: self.path(artifact),
            records: 0,
        })
    }

    /// Opens a line-stream artifact for reading, positioned after the header.
    pub fn stream_reader(&self, artifact: Artifact) -> Result<BufReader<File>, Error> {
        let path = self.path(artifact);
        let mut reader = BufReader::new(File::open(&path)?);

        let mut header = String::new();
        reader.read_line(&mut header)?;
        let mut fields = header.split_whitespace();
        if fields.next() != Some("#csfe") {
            return Err(Error::BadHeader {
                path,
                detail: String::from("missing stream header"),
            });
        }
        let _pass = fields.next();
        let version = SCHEMA_VERSION.to_string();
        if fields.next() != Some(version.as_str()) {
            return Err(Error::BadHeader {
                path,
                detail: String::from("wrong stream schema version"),
            });
        }

        Ok(reader)
    }

    pub fn line_reader(&self, artifact: Artifact) -> Result<LineReader, Error> {
        Ok(LineReader {
            reader: self.stream_reader(artifact)?,
        })
    }

    pub fn store_writer<K, V>(
        &self,
        pass: &str,
        artifact: Artifact,
    ) -> Result<StoreWriter<K, V>, Error>
    where
        K: Serialize + Eq + std::hash::Hash,
        V: Serialize,
    {
        StoreWriter::create(
            &self.dir,
            self.path(artifact),
            self.index_path(artifact),
            pass,
        )
    }

    pub fn store<K, V>(&self, artifact: Artifact) -> Result<Store<K, V>, Error>
    where
        K: DeserializeOwned + Eq + std::hash::Hash + std::fmt::Debug,
        V: DeserializeOwned,
    {
        Store::open(&self.path(artifact), &self.index_path(artifact))
    }

    pub fn pass_complete(&self, pass: &str) -> Result<bool, Error> {
        let path = self.dir.join(COMPLETED_MARKER);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(contents.lines().any(|line| line == pass)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Records `pass` as complete. Only call after every artifact the pass
    /// writes has been committed.
    pub fn mark_pass_complete(&self, pass: &str) -> Result<(), Error> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(COMPLETED_MARKER))?;
        writeln!(file, "{}", pass)?;
        file.sync_all()?;
        log::debug!("pass {} committed", pass);
        Ok(())
    }

    /// Discards all intermediate state, forcing the next run to start over.
    pub fn reset(&self) -> Result<(), Error> {
        log::debug!("resetting state directory {}", self.dir.display());
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

/// A line-stream writer; records must not contain newlines.
pub struct LineWriter {
    writer: BufWriter<NamedTempFile>,
    dest: PathBuf,
    records: u64,
}

impl LineWriter {
    pub fn write_record(&mut self, record: &[u8]) -> Result<(), Error> {
        debug_assert!(!record.contains(&b'\n'));
        self.writer.write_all(record)?;
        self.writer.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    /// Persists the stream, returning the number of records written through
    /// [`write_record`](LineWriter::write_record).
    pub fn commit(self) -> Result<u64, Error> {
        let file = self
            .writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        file.persist(&self.dest).map_err(|e| Error::Io(e.error))?;
        Ok(self.records)
    }
}

// Raw access for the external sort, which writes pre-formatted lines.
impl Write for LineWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Iterates the records of a line-stream artifact, without their newlines.
pub struct LineReader {
    reader: BufReader<File>,
}

impl Iterator for LineReader {
    type Item = Result<Vec<u8>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line) {
            Ok(0) => None,
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                Some(Ok(line))
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bincode_round_trip_and_header_check() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();

        layout
            .write_bincode("test", Artifact::Order, &vec![1u32, 2, 3])
            .unwrap();
        let have: Vec<u32> = layout.read_bincode(Artifact::Order).unwrap();
        assert_eq!(have, vec![1, 2, 3]);

        fs::write(layout.path(Artifact::Paths), b"garbage").unwrap();
        assert!(layout.read_bincode::<Vec<u32>>(Artifact::Paths).is_err());
    }

    #[test]
    fn test_line_stream_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();

        let mut writer = layout
            .line_writer("test", Artifact::RevisionStream)
            .unwrap();
        writer.write_record(b"0001 first").unwrap();
        writer.write_record(b"0002 second").unwrap();
        assert_eq!(writer.commit().unwrap(), 2);

        let records: Vec<Vec<u8>> = layout
            .line_reader(Artifact::RevisionStream)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records, vec![b"0001 first".to_vec(), b"0002 second".to_vec()]);
    }

    #[test]
    fn test_pass_markers() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();

        assert!(!layout.pass_complete("collect").unwrap());
        layout.mark_pass_complete("collect").unwrap();
        assert!(layout.pass_complete("collect").unwrap());
        assert!(!layout.pass_complete("collate-symbols").unwrap());

        layout.reset().unwrap();
        assert!(!layout.pass_complete("collect").unwrap());
    }
}
