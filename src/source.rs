//! Source files and locations.
//!
//! Every node of the input declaration tree carries a [`FileRange`] so that
//! diagnostics produced by the translator can point back at the offending
//! source text. The [`Files`] database implements
//! [`codespan_reporting::files::Files`] for rendering those diagnostics.

use std::fmt;
use std::num::NonZeroU32;
use std::ops::{Deref, DerefMut, Range};

use codespan_reporting::files::{Error, SimpleFile};

/// File id.
// - Use `u32` over `usize` because 4 billion files should be enough for anyone
// - `NonZeroU32` keeps `Option<FileId>` pointer-sized
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileId(NonZeroU32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl TryFrom<u32> for FileId {
    type Error = <NonZeroU32 as TryFrom<u32>>::Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        let id = NonZeroU32::try_from(value)?;
        Ok(Self(id))
    }
}

impl From<FileId> for u32 {
    fn from(value: FileId) -> Self {
        value.0.get()
    }
}

impl From<FileId> for usize {
    fn from(value: FileId) -> Self {
        value.0.get() as Self
    }
}

/// A database of source files, addressed by [`FileId`].
pub struct Files<Name, Source> {
    files: Vec<SimpleFile<Name, Source>>,
}

impl<Name, Source> Files<Name, Source>
where
    Name: std::fmt::Display,
    Source: AsRef<str>,
{
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    /// Add a file to the database, returning the handle that can be used to
    /// refer to it again.
    pub fn add(&mut self, name: Name, source: Source) -> FileId {
        self.files.push(SimpleFile::new(name, source));
        let len = u32::try_from(self.files.len())
            .expect("Too many files (maximum amount of files is `u32::MAX`)");
        FileId::try_from(len).unwrap()
    }

    /// Get the file corresponding to the given id.
    pub fn get(&self, file_id: FileId) -> Result<&SimpleFile<Name, Source>, Error> {
        let index = usize::from(file_id) - 1;
        self.files.get(index).ok_or(Error::FileMissing)
    }
}

impl<Name, Source> Default for Files<Name, Source>
where
    Name: std::fmt::Display,
    Source: AsRef<str>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, Name, Source> codespan_reporting::files::Files<'a> for Files<Name, Source>
where
    Name: 'a + std::fmt::Display + Clone,
    Source: 'a + AsRef<str>,
{
    type FileId = FileId;
    type Name = Name;
    type Source = &'a str;

    fn name(&self, file_id: FileId) -> Result<Name, Error> {
        Ok(self.get(file_id)?.name().clone())
    }

    fn source(&self, file_id: FileId) -> Result<&str, Error> {
        Ok(self.get(file_id)?.source().as_ref())
    }

    fn line_index(&self, file_id: FileId, byte_index: usize) -> Result<usize, Error> {
        self.get(file_id)?.line_index((), byte_index)
    }

    fn line_range(&self, file_id: FileId, line_index: usize) -> Result<Range<usize>, Error> {
        self.get(file_id)?.line_range((), line_index)
    }
}

/// Byte offsets into source files.
pub type BytePos = u32;

/// Byte ranges in source files.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ByteRange {
    start: BytePos,
    end: BytePos,
}

impl fmt::Debug for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteRange({}..{})", self.start, self.end)
    }
}

impl ByteRange {
    pub const fn new(start: BytePos, end: BytePos) -> ByteRange {
        ByteRange { start, end }
    }

    pub const fn start(&self) -> BytePos {
        self.start
    }

    pub const fn end(&self) -> BytePos {
        self.end
    }

    pub fn merge(self, other: ByteRange) -> ByteRange {
        ByteRange::new(self.start.min(other.start), self.end.max(other.end))
    }
}

impl From<ByteRange> for Range<usize> {
    fn from(range: ByteRange) -> Range<usize> {
        (range.start as usize)..(range.end as usize)
    }
}

/// Byte ranges tagged with the file they belong to.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct FileRange {
    file_id: FileId,
    byte_range: ByteRange,
}

impl fmt::Debug for FileRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FileRange({}, {}..{})",
            self.file_id, self.byte_range.start, self.byte_range.end
        )
    }
}

impl FileRange {
    pub const fn new(file_id: FileId, byte_range: ByteRange) -> FileRange {
        FileRange {
            file_id,
            byte_range,
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub const fn byte_range(&self) -> ByteRange {
        self.byte_range
    }

    pub fn merge(&self, other: &FileRange) -> Option<FileRange> {
        (self.file_id == other.file_id).then(|| {
            FileRange::new(self.file_id, self.byte_range.merge(other.byte_range))
        })
    }
}

impl From<FileRange> for Range<usize> {
    fn from(range: FileRange) -> Range<usize> {
        range.byte_range.into()
    }
}

/// A value paired with the source range it came from.
#[derive(Debug, Copy, Clone)]
pub struct Spanned<T> {
    range: FileRange,
    inner: T,
}

impl<T> Spanned<T> {
    pub fn new(range: FileRange, inner: T) -> Spanned<T> {
        Spanned { range, inner }
    }

    pub fn range(&self) -> FileRange {
        self.range
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> Deref for Spanned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for Spanned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// `ByteRange` is used a lot. Ensure it doesn't grow accidentally.
    fn byte_range_size() {
        assert_eq!(std::mem::size_of::<ByteRange>(), 8);
    }

    #[test]
    /// `FileRange` is used a lot. Ensure it doesn't grow accidentally.
    fn file_range_size() {
        assert_eq!(std::mem::size_of::<FileRange>(), 12);
    }
}
