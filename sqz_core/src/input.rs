//! Entry inputs: the sources append operations read headers and content
//! from.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use sqz_codecs::CompressionParams;

use crate::entry::{EntryAttributes, EntryPermissions, EntryType, SemVer};
use crate::header::EntryHeader;

/// Content handed out by [`EntryInput::init`]: nothing (directories), a
/// byte stream (regular files), or a string (symlink targets).
pub enum EntryContent<'a> {
    None,
    Stream(&'a mut dyn Read),
    String(String),
}

/// Source of one entry to append: provides the header and the content.
/// `deinit` must be called after the content has been consumed, even on
/// failure.
pub trait EntryInput {
    fn init(&mut self) -> Result<(EntryHeader, EntryContent<'_>)>;

    fn deinit(&mut self) {}

    /// The archived path of this entry.
    fn path(&self) -> &[u8];
}

fn make_header(
    path: &[u8],
    compression: CompressionParams,
    attributes: EntryAttributes,
) -> EntryHeader {
    EntryHeader {
        version: SemVer::current(),
        content_size: 0,
        compression,
        attributes,
        path: path.to_vec(),
    }
}

/// Pre-set content held in memory; useful for tests and synthetic entries.
pub struct CustomContentEntryInput {
    path: Vec<u8>,
    compression: CompressionParams,
    attributes: EntryAttributes,
    content: CustomContent,
    cursor: Option<Cursor<Vec<u8>>>,
}

/// Owned counterpart of [`EntryContent`].
pub enum CustomContent {
    None,
    Bytes(Vec<u8>),
    String(String),
}

impl CustomContentEntryInput {
    pub fn new(
        path: impl Into<Vec<u8>>,
        compression: CompressionParams,
        content: CustomContent,
        attributes: EntryAttributes,
    ) -> Self {
        Self {
            path: path.into(),
            compression,
            attributes,
            content,
            cursor: None,
        }
    }

    /// A regular-file entry over the given bytes with default permissions.
    pub fn regular(
        path: impl Into<Vec<u8>>,
        compression: CompressionParams,
        bytes: Vec<u8>,
    ) -> Self {
        Self::new(
            path,
            compression,
            CustomContent::Bytes(bytes),
            EntryAttributes::new(EntryType::RegularFile, EntryPermissions::from_bits(0o644)),
        )
    }
}

impl EntryInput for CustomContentEntryInput {
    fn init(&mut self) -> Result<(EntryHeader, EntryContent<'_>)> {
        let header = make_header(&self.path, self.compression, self.attributes);
        let content = match &mut self.content {
            CustomContent::None => EntryContent::None,
            CustomContent::String(target) => EntryContent::String(target.clone()),
            CustomContent::Bytes(bytes) => {
                self.cursor = Some(Cursor::new(std::mem::take(bytes)));
                EntryContent::Stream(self.cursor.as_mut().unwrap())
            }
        };
        Ok((header, content))
    }

    fn deinit(&mut self) {
        // hand the bytes back so the input can be initialized again
        if let Some(cursor) = self.cursor.take() {
            self.content = CustomContent::Bytes(cursor.into_inner());
        }
    }

    fn path(&self) -> &[u8] {
        &self.path
    }
}

/// Entry input backed by the filesystem: stats the path, maps its type and
/// permission bits, and opens regular files for streaming.
pub struct FileEntryInput {
    path: PathBuf,
    archived_path: Vec<u8>,
    compression: CompressionParams,
    file: Option<File>,
}

impl FileEntryInput {
    /// `path` is both the filesystem location and the archived path.
    pub fn new(path: impl Into<PathBuf>, compression: CompressionParams) -> Self {
        let path = path.into();
        let archived_path = path.to_string_lossy().into_owned().into_bytes();
        Self {
            path,
            archived_path,
            compression,
            file: None,
        }
    }

    fn stat_attributes(path: &Path) -> Result<(EntryType, EntryPermissions)> {
        let metadata = std::fs::symlink_metadata(path)
            .with_context(|| format!("failed getting file status of '{}'", path.display()))?;
        let file_type = metadata.file_type();
        let entry_type = if file_type.is_symlink() {
            EntryType::Symlink
        } else if file_type.is_dir() {
            EntryType::Directory
        } else if file_type.is_file() {
            EntryType::RegularFile
        } else {
            bail!("unsupported file type - '{}'", path.display());
        };

        #[cfg(unix)]
        let permissions = {
            use std::os::unix::fs::PermissionsExt;
            EntryPermissions::from_mode(metadata.permissions().mode())
        };
        #[cfg(not(unix))]
        let permissions = if metadata.permissions().readonly() {
            EntryPermissions::from_bits(0o444)
        } else {
            EntryPermissions::from_bits(0o644)
        };

        Ok((entry_type, permissions))
    }
}

impl EntryInput for FileEntryInput {
    fn init(&mut self) -> Result<(EntryHeader, EntryContent<'_>)> {
        let (entry_type, permissions) = Self::stat_attributes(&self.path)?;
        let header = make_header(
            &self.archived_path,
            self.compression,
            EntryAttributes::new(entry_type, permissions),
        );

        let content = match entry_type {
            EntryType::Directory => EntryContent::None,
            EntryType::Symlink => {
                let target = std::fs::read_link(&self.path).with_context(|| {
                    format!("failed reading symlink - '{}'", self.path.display())
                })?;
                EntryContent::String(target.to_string_lossy().into_owned())
            }
            EntryType::RegularFile => {
                let file = File::open(&self.path).with_context(|| {
                    format!("failed opening a file: '{}'", self.path.display())
                })?;
                self.file = Some(file);
                EntryContent::Stream(self.file.as_mut().unwrap())
            }
            EntryType::None => bail!("unsupported file type - '{}'", self.path.display()),
        };
        Ok((header, content))
    }

    fn deinit(&mut self) {
        self.file = None;
    }

    fn path(&self) -> &[u8] {
        &self.archived_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqz_codecs::{CompressionMethod, CompressionParams};

    #[test]
    fn custom_input_can_be_reinitialized() {
        let params = CompressionParams::new(CompressionMethod::None, 0);
        let mut input =
            CustomContentEntryInput::regular("a.txt", params, b"payload".to_vec());

        for _ in 0..2 {
            let (header, content) = input.init().unwrap();
            assert_eq!(header.path, b"a.txt");
            assert_eq!(
                header.attributes.entry_type().unwrap(),
                EntryType::RegularFile
            );
            match content {
                EntryContent::Stream(stream) => {
                    let mut bytes = Vec::new();
                    stream.read_to_end(&mut bytes).unwrap();
                    assert_eq!(bytes, b"payload");
                }
                _ => panic!("expected stream content"),
            }
            input.deinit();
        }
    }

    #[test]
    fn symlink_input_yields_target_string() {
        let params = CompressionParams::default();
        let mut input = CustomContentEntryInput::new(
            "lnk",
            params,
            CustomContent::String("a.txt".into()),
            EntryAttributes::new(EntryType::Symlink, EntryPermissions::ALL),
        );
        let (header, content) = input.init().unwrap();
        assert_eq!(header.attributes.entry_type().unwrap(), EntryType::Symlink);
        match content {
            EntryContent::String(target) => assert_eq!(target, "a.txt"),
            _ => panic!("expected string content"),
        }
        input.deinit();
    }
}
