//! Entry attributes: file type, POSIX-style permission bits, and the packed
//! semantic version stamped into every entry header.

use std::fmt;
use std::ops::{BitAnd, BitOr};

use anyhow::{bail, Result};

/// Type of an archived entry, stored in the 7 high bits of
/// [`EntryAttributes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryType {
    #[default]
    None,
    RegularFile,
    Directory,
    Symlink,
}

impl EntryType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(EntryType::None),
            1 => Ok(EntryType::RegularFile),
            2 => Ok(EntryType::Directory),
            3 => Ok(EntryType::Symlink),
            _ => bail!("invalid entry type"),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            EntryType::None => 0,
            EntryType::RegularFile => 1,
            EntryType::Directory => 2,
            EntryType::Symlink => 3,
        }
    }
}

/// Permission bits: owner/group/others x read/write/exec, in the usual
/// octal layout (0o400 = owner read, ... 0o001 = others exec).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryPermissions(u16);

impl EntryPermissions {
    pub const NONE: Self = Self(0);
    pub const OWNER_READ: Self = Self(0o400);
    pub const OWNER_WRITE: Self = Self(0o200);
    pub const OWNER_EXEC: Self = Self(0o100);
    pub const GROUP_READ: Self = Self(0o040);
    pub const GROUP_WRITE: Self = Self(0o020);
    pub const GROUP_EXEC: Self = Self(0o010);
    pub const OTHERS_READ: Self = Self(0o004);
    pub const OTHERS_WRITE: Self = Self(0o002);
    pub const OTHERS_EXEC: Self = Self(0o001);
    pub const ALL: Self = Self(0o777);

    /// Keep only the permission bits of a raw unix mode.
    pub fn from_mode(mode: u32) -> Self {
        Self((mode & 0o777) as u16)
    }

    pub fn from_bits(bits: u16) -> Self {
        Self(bits & 0o777)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn mode(self) -> u32 {
        u32::from(self.0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EntryPermissions {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for EntryPermissions {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// Packed entry attributes: 7 high bits of entry type, 9 low bits of
/// permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryAttributes(u16);

impl EntryAttributes {
    pub fn new(entry_type: EntryType, permissions: EntryPermissions) -> Self {
        Self((u16::from(entry_type.to_u8()) << 9) | permissions.bits())
    }

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    /// Decode the type bits; unknown values are a format error.
    pub fn entry_type(self) -> Result<EntryType> {
        EntryType::from_u8((self.0 >> 9) as u8)
    }

    pub fn permissions(self) -> EntryPermissions {
        EntryPermissions::from_bits(self.0 & 0o777)
    }

    pub fn set_permissions(&mut self, permissions: EntryPermissions) {
        self.0 = (self.0 & !0o777) | permissions.bits();
    }
}

impl fmt::Display for EntryAttributes {
    /// `ls`-style rendering: `-rwxr-xr--`, `d...`, `l...`, or `?` for a
    /// none-type entry.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_char = match self.entry_type() {
            Ok(EntryType::RegularFile) => '-',
            Ok(EntryType::Directory) => 'd',
            Ok(EntryType::Symlink) => 'l',
            _ => '?',
        };
        write!(f, "{type_char}")?;
        let permissions = self.permissions();
        for (flag, ch) in [
            (EntryPermissions::OWNER_READ, 'r'),
            (EntryPermissions::OWNER_WRITE, 'w'),
            (EntryPermissions::OWNER_EXEC, 'x'),
            (EntryPermissions::GROUP_READ, 'r'),
            (EntryPermissions::GROUP_WRITE, 'w'),
            (EntryPermissions::GROUP_EXEC, 'x'),
            (EntryPermissions::OTHERS_READ, 'r'),
            (EntryPermissions::OTHERS_WRITE, 'w'),
            (EntryPermissions::OTHERS_EXEC, 'x'),
        ] {
            write!(f, "{}", if permissions.contains(flag) { ch } else { '-' })?;
        }
        Ok(())
    }
}

/// Semantic version packed into 32 bits: 12 bits major, 10 minor, 10 patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SemVer(u32);

impl SemVer {
    pub fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self(
            (u32::from(major & 0xFFF) << 20)
                | (u32::from(minor & 0x3FF) << 10)
                | u32::from(patch & 0x3FF),
        )
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn major(self) -> u16 {
        ((self.0 >> 20) & 0xFFF) as u16
    }

    pub fn minor(self) -> u16 {
        ((self.0 >> 10) & 0x3FF) as u16
    }

    pub fn patch(self) -> u16 {
        (self.0 & 0x3FF) as u16
    }

    /// The version of this crate, as stamped into new entries.
    pub fn current() -> Self {
        let mut parts = env!("CARGO_PKG_VERSION")
            .split('.')
            .map(|part| part.parse::<u16>().unwrap_or(0));
        let major = parts.next().unwrap_or(0);
        let minor = parts.next().unwrap_or(0);
        let patch = parts.next().unwrap_or(0);
        Self::new(major, minor, patch)
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}
