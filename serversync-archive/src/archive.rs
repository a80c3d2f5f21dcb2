//! Archive packing, opening, and extraction.
//!
//! Entries are streamed: packing copies each source file into the zip
//! writer and extraction copies each entry straight into its target file,
//! so neither side holds a whole tree in memory.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::{ArchiveError, ArchiveResult};

/// An opened zip archive. Entry contents are read on demand.
pub struct ChangeArchive<R> {
    zip: ZipArchive<R>,
}

impl<R: Read + Seek> std::fmt::Debug for ChangeArchive<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeArchive")
            .field("entries", &self.zip.len())
            .finish()
    }
}

impl<'a> ChangeArchive<Cursor<&'a [u8]>> {
    /// Opens an archive held in memory.
    pub fn from_bytes(bytes: &'a [u8]) -> ArchiveResult<Self> {
        Self::open(Cursor::new(bytes))
    }
}

impl ChangeArchive<BufReader<File>> {
    /// Opens an archive file on disk.
    pub fn open_path(path: &Path) -> ArchiveResult<Self> {
        Self::open(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> ChangeArchive<R> {
    /// Reads the central directory. No entry data is decompressed yet.
    pub fn open(reader: R) -> ArchiveResult<Self> {
        Ok(Self {
            zip: ZipArchive::new(reader)?,
        })
    }

    /// File entry names in archive order. Directory entries are left out;
    /// their paths are recreated from the file entries on extraction.
    pub fn names(&self) -> Vec<&str> {
        (0..self.zip.len())
            .filter_map(|i| self.zip.name_for_index(i))
            .filter(|name| !is_dir_name(name))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decompresses a single entry, or `None` if the archive has no file
    /// entry by that name.
    pub fn read_entry(&mut self, name: &str) -> ArchiveResult<Option<Vec<u8>>> {
        let Some(index) = self.zip.index_for_name(name).filter(|_| !is_dir_name(name)) else {
            return Ok(None);
        };
        let mut file = self.zip.by_index(index)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(Some(data))
    }

    /// Writes every file entry under `dest`, overwriting files that already
    /// exist.
    ///
    /// All entry names are validated before anything is written, so an
    /// archive with one hostile name leaves `dest` untouched.
    pub fn extract_to(&mut self, dest: &Path) -> ArchiveResult<Vec<PathBuf>> {
        let mut targets = Vec::new();
        for index in 0..self.zip.len() {
            let Some(name) = self.zip.name_for_index(index) else {
                continue;
            };
            if is_dir_name(name) {
                continue;
            }
            let relative =
                safe_entry_path(name).ok_or_else(|| ArchiveError::UnsafePath(name.to_string()))?;
            targets.push((index, dest.join(relative)));
        }

        fs::create_dir_all(dest)?;
        for (index, target) in &targets {
            let mut entry = self.zip.by_index(*index)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = BufWriter::new(File::create(target)?);
            let written = io::copy(&mut entry, &mut out)?;
            out.flush()?;
            debug!("Extracted {} ({} bytes)", entry.name(), written);
        }

        Ok(targets.into_iter().map(|(_, target)| target).collect())
    }
}

fn is_dir_name(name: &str) -> bool {
    name.ends_with('/') || name.ends_with('\\')
}

/// Where an entry's content comes from.
#[derive(Debug, Clone)]
enum Source {
    Memory(Vec<u8>),
    Disk(PathBuf),
}

/// Fluent builder for creating archives.
///
/// Files added from disk are only opened when the archive is written.
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    entries: BTreeMap<String, Source>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an in-memory file. A later entry with the same name replaces
    /// the earlier one.
    pub fn add_file(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.entries.insert(name.into(), Source::Memory(data));
        self
    }

    /// Adds `root/relative` under `relative`. Fails now if the source is
    /// not a regular file.
    pub fn add_from_disk(mut self, root: &Path, relative: &str) -> ArchiveResult<Self> {
        let path = root.join(relative);
        if !fs::metadata(&path)?.is_file() {
            return Err(ArchiveError::MissingSource(path.display().to_string()));
        }
        self.entries.insert(relative.to_string(), Source::Disk(path));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Streams the archive into `writer` and hands the writer back.
    pub fn write_to<W: Write + Seek>(self, writer: W) -> ArchiveResult<W> {
        let mut zip = ZipWriter::new(writer);

        for (name, source) in self.entries {
            let options = |len: u64| {
                SimpleFileOptions::default()
                    .compression_method(CompressionMethod::Deflated)
                    .large_file(len >= u64::from(u32::MAX))
            };
            match source {
                Source::Memory(data) => {
                    zip.start_file(name.as_str(), options(data.len() as u64))?;
                    zip.write_all(&data)?;
                }
                Source::Disk(path) => {
                    let mut file = File::open(&path)?;
                    let len = file.metadata()?.len();
                    zip.start_file(name.as_str(), options(len))?;
                    io::copy(&mut file, &mut zip)?;
                }
            }
        }

        Ok(zip.finish()?)
    }

    /// Builds the archive in memory and returns the raw bytes.
    pub fn build(self) -> ArchiveResult<Vec<u8>> {
        Ok(self.write_to(Cursor::new(Vec::new()))?.into_inner())
    }

    /// Writes the archive to `dest` through a temp file in the same
    /// directory, replacing `dest` only once the archive is complete.
    pub fn write_file(self, dest: &Path) -> ArchiveResult<()> {
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let temp = NamedTempFile::new_in(dir)?;
        let mut writer = self.write_to(BufWriter::new(temp))?;
        writer.flush()?;
        let temp = writer.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;
        temp.persist(dest).map_err(|e| ArchiveError::Io(e.error))?;
        Ok(())
    }
}

fn files_builder<I, S>(root: &Path, relative_paths: I) -> ArchiveResult<ArchiveBuilder>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut builder = ArchiveBuilder::new();
    for relative in relative_paths {
        builder = builder.add_from_disk(root, relative.as_ref())?;
    }
    Ok(builder)
}

fn tree_builder(root: &Path) -> ArchiveResult<ArchiveBuilder> {
    if !root.is_dir() {
        return Err(ArchiveError::MissingSource(root.display().to_string()));
    }

    let mut entries = BTreeMap::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(relative) = relative_slash_path(root, entry.path()) {
            entries.insert(relative, Source::Disk(entry.into_path()));
        }
    }
    Ok(ArchiveBuilder { entries })
}

/// Packs the listed files, given relative to `root`, into one archive.
pub fn pack_files<I, S>(root: &Path, relative_paths: I) -> ArchiveResult<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    files_builder(root, relative_paths)?.build()
}

/// Like [`pack_files`], writing the archive to `dest`.
pub fn pack_files_to<I, S>(root: &Path, relative_paths: I, dest: &Path) -> ArchiveResult<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    files_builder(root, relative_paths)?.write_file(dest)
}

/// Packs every regular file below `root`.
pub fn pack_tree(root: &Path) -> ArchiveResult<Vec<u8>> {
    tree_builder(root)?.build()
}

/// Like [`pack_tree`], streaming the archive to `dest`.
pub fn pack_tree_to(root: &Path, dest: &Path) -> ArchiveResult<()> {
    tree_builder(root)?.write_file(dest)
}

/// Converts `path` below `root` into a slash-separated relative path.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Maps an entry name to a relative path, or `None` if it is absolute or
/// climbs out of the destination.
fn safe_entry_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut path = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}
