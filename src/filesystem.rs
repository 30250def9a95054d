// This file is part of the rtbprobe library.
// Copyright (C) 2017-2018 Niklas Fiekas <niklas.fiekas@backscattering.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <http://www.gnu.org/licenses/>.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use memmap2::{Mmap, MmapOptions};

use crate::errors::{SyzygyError, SyzygyResult};

/// Separator between directories in a search path list.
#[cfg(windows)]
pub const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_SEPARATOR: char = ':';

/// Splits a search path list into its directories, skipping empty segments.
pub fn split_paths(paths: &str) -> Vec<PathBuf> {
    paths
        .split(PATH_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Returns the path of the first directory in the list that contains a
/// regular file with the given name.
pub fn resolve(paths: &[PathBuf], name: &str) -> Option<PathBuf> {
    paths
        .iter()
        .map(|directory| directory.join(name))
        .find(|path| path.is_file())
}

/// A read-only memory mapping of a table file with the magic bytes already
/// validated. All typed reads are bounds checked against the mapping and
/// fail with `CorruptedTable` instead of panicking.
pub struct TableFile {
    mmap: Mmap,
}

impl fmt::Debug for TableFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableFile")
            .field("len", &self.mmap.len())
            .finish()
    }
}

impl TableFile {
    pub fn open<P: AsRef<Path>>(path: P, magic: &[u8; 4]) -> SyzygyResult<TableFile> {
        let file = File::open(path)?;

        // Safety: The table files are opened read-only and are required not
        // to be modified while the process is running. I/O errors after
        // this point are the operating system's problem.
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        #[cfg(unix)]
        mmap.advise(memmap2::Advice::Random)?;

        let file = TableFile { mmap };

        if file.mmap.get(..4) != Some(&magic[..]) {
            return Err(SyzygyError::Magic);
        }

        Ok(file)
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    fn bytes(&self, ptr: usize, width: usize) -> SyzygyResult<&[u8]> {
        let end = u!(ptr.checked_add(width));
        Ok(u!(self.mmap.get(ptr..end)))
    }

    pub fn read_u8(&self, ptr: usize) -> SyzygyResult<u8> {
        Ok(*u!(self.mmap.get(ptr)))
    }

    pub fn read_u16_le(&self, ptr: usize) -> SyzygyResult<u16> {
        Ok(LittleEndian::read_u16(self.bytes(ptr, 2)?))
    }

    pub fn read_u32_le(&self, ptr: usize) -> SyzygyResult<u32> {
        Ok(LittleEndian::read_u32(self.bytes(ptr, 4)?))
    }

    pub fn read_u32_be(&self, ptr: usize) -> SyzygyResult<u32> {
        Ok(BigEndian::read_u32(self.bytes(ptr, 4)?))
    }

    pub fn read_u64_be(&self, ptr: usize) -> SyzygyResult<u64> {
        Ok(BigEndian::read_u64(self.bytes(ptr, 8)?))
    }

    /// Reads a symbol pair, two 12-bit numbers packed into 3 bytes.
    pub fn read_lr(&self, ptr: usize) -> SyzygyResult<(u16, u16)> {
        let buf = self.bytes(ptr, 3)?;
        let left = (u16::from(buf[1] & 0xf) << 8) | u16::from(buf[0]);
        let right = (u16::from(buf[2]) << 4) | (u16::from(buf[1]) >> 4);
        Ok((left, right))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_split_paths() {
        let sep = PATH_SEPARATOR;
        let paths = split_paths(&format!("/tb/wdl345{}{}/tb/dtz345", sep, sep));
        assert_eq!(paths, vec![PathBuf::from("/tb/wdl345"), PathBuf::from("/tb/dtz345")]);
        assert!(split_paths("").is_empty());
    }

    #[test]
    fn test_resolve() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("KQvK.rtbw"), b"\x71\xe8\x23\x5d").expect("write");

        let missing = PathBuf::from("/nonexistent");
        let paths = vec![missing, dir.path().to_owned()];

        assert_eq!(resolve(&paths, "KQvK.rtbw"), Some(dir.path().join("KQvK.rtbw")));
        assert_eq!(resolve(&paths, "KQvKR.rtbw"), None);
    }

    #[test]
    fn test_magic_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("KQvK.rtbw");
        fs::write(&path, b"\x00\x00\x00\x00 not a table").expect("write");

        assert!(matches!(
            TableFile::open(&path, &[0x71, 0xe8, 0x23, 0x5d]),
            Err(SyzygyError::Magic)
        ));
    }

    #[test]
    fn test_reads_are_bounds_checked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("KQvK.rtbw");
        fs::write(&path, b"\x71\xe8\x23\x5d\x00\x00").expect("write");

        let file = TableFile::open(&path, &[0x71, 0xe8, 0x23, 0x5d]).expect("open");
        assert!(file.read_u8(5).is_ok());
        assert!(file.read_u8(6).is_err());
        assert!(file.read_u64_be(0).is_err());
        assert_eq!(file.read_u16_le(4).expect("in bounds"), 0);
    }
}
