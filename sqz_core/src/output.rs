//! Entry outputs: the sinks extract operations materialize entries into.

use std::fs::File;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::entry::EntryType;
use crate::header::EntryHeader;

/// Sink for one extracted entry. `init` returns a stream for entries with
/// content, or `None` when the entry materializes without one (a
/// directory). `finalize` runs post-processing such as applying
/// permissions; `deinit` must always follow an `init`.
pub trait EntryOutput {
    fn init(&mut self, header: &EntryHeader) -> Result<Option<&mut dyn Write>>;

    fn init_symlink(&mut self, header: &EntryHeader, target: &str) -> Result<()>;

    fn finalize(&mut self) -> Result<()>;

    fn deinit(&mut self) {}
}

/// Materializes entries on the filesystem under a root directory.
pub struct FileEntryOutput {
    root: PathBuf,
    file: Option<File>,
    finalize_path: Option<(PathBuf, u32)>,
}

impl FileEntryOutput {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file: None,
            finalize_path: None,
        }
    }

    /// Resolve an archived path under the extraction root, refusing
    /// absolute paths and parent traversals.
    fn resolve(&self, archived_path: &[u8]) -> Result<PathBuf> {
        let path_str = String::from_utf8_lossy(archived_path);
        let path = Path::new(path_str.as_ref());
        let mut resolved = self.root.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    bail!("entry path '{path_str}' escapes the extraction root")
                }
            }
        }
        if resolved == self.root {
            bail!("entry path '{path_str}' resolves to the extraction root");
        }
        Ok(resolved)
    }

    fn prepare_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed making directory '{}'", parent.display()))?;
        }
        Ok(())
    }
}

impl EntryOutput for FileEntryOutput {
    fn init(&mut self, header: &EntryHeader) -> Result<Option<&mut dyn Write>> {
        match header.attributes.entry_type()? {
            EntryType::None => {
                bail!("attempt to extract a none-type entry without a custom output stream")
            }
            EntryType::RegularFile => {
                let path = self.resolve(&header.path)?;
                Self::prepare_parent(&path)?;
                let file = File::create(&path)
                    .with_context(|| format!("failed making a regular file '{}'", path.display()))?;
                self.file = Some(file);
                self.finalize_path = Some((path, header.attributes.permissions().mode()));
                Ok(Some(self.file.as_mut().unwrap()))
            }
            EntryType::Directory => {
                let path = self.resolve(&header.path)?;
                std::fs::create_dir_all(&path)
                    .with_context(|| format!("failed making directory '{}'", path.display()))?;
                self.finalize_path = Some((path, header.attributes.permissions().mode()));
                Ok(None)
            }
            EntryType::Symlink => bail!("can't create a symlink without a target"),
        }
    }

    fn init_symlink(&mut self, header: &EntryHeader, target: &str) -> Result<()> {
        let path = self.resolve(&header.path)?;
        Self::prepare_parent(&path)?;
        #[cfg(unix)]
        {
            if path.symlink_metadata().is_ok() {
                std::fs::remove_file(&path).ok();
            }
            std::os::unix::fs::symlink(target, &path).with_context(|| {
                format!("failed creating symlink '{}' -> '{target}'", path.display())
            })?;
            Ok(())
        }
        #[cfg(not(unix))]
        {
            let _ = target;
            bail!("symlink extraction is not supported on this platform");
        }
    }

    fn finalize(&mut self) -> Result<()> {
        let Some((path, mode)) = self.finalize_path.take() else {
            return Ok(());
        };
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
                .context("failed setting file permissions")?;
        }
        #[cfg(not(unix))]
        let _ = (path, mode);
        Ok(())
    }

    fn deinit(&mut self) {
        self.file = None;
    }
}

/// Routes extracted content (or the symlink target bytes) into a caller
/// stream.
pub struct StreamEntryOutput<'w> {
    stream: &'w mut dyn Write,
}

impl<'w> StreamEntryOutput<'w> {
    pub fn new(stream: &'w mut dyn Write) -> Self {
        Self { stream }
    }
}

impl EntryOutput for StreamEntryOutput<'_> {
    fn init(&mut self, _header: &EntryHeader) -> Result<Option<&mut dyn Write>> {
        Ok(Some(&mut *self.stream))
    }

    fn init_symlink(&mut self, _header: &EntryHeader, target: &str) -> Result<()> {
        self.stream
            .write_all(target.as_bytes())
            .context("output write error")
    }

    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryAttributes, EntryPermissions};

    fn header_for(path: &[u8], entry_type: EntryType) -> EntryHeader {
        EntryHeader {
            attributes: EntryAttributes::new(entry_type, EntryPermissions::from_bits(0o644)),
            path: path.to_vec(),
            ..EntryHeader::default()
        }
    }

    #[test]
    fn traversal_paths_are_rejected() {
        let output = FileEntryOutput::new("/tmp/sqz-test-root");
        assert!(output.resolve(b"../evil").is_err());
        assert!(output.resolve(b"ok/../../evil").is_err());
        // absolute paths are re-rooted rather than rejected
        let resolved = output.resolve(b"/abs/file").unwrap();
        assert!(resolved.starts_with("/tmp/sqz-test-root"));
    }

    #[test]
    fn stream_output_passes_through() {
        let mut sink = Vec::new();
        let mut output = StreamEntryOutput::new(&mut sink);
        let header = header_for(b"x", EntryType::Symlink);
        output.init_symlink(&header, "target/path").unwrap();
        output.finalize().unwrap();
        output.deinit();
        assert_eq!(sink, b"target/path");
    }
}
