// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use log::debug;
use packer_common::*;
use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path
};

use crate::{
    signing_block::find_signing_block,
    zip_parser::{central_directory_offset, checked_central_directory_offset, find_eocd}
};

/// A run of bytes copied out of a file, along with where they came from.
#[derive(Clone, PartialEq, Eq)]
pub struct ByteRegion {
    pub offset: u64,
    pub bytes: Vec<u8>
}

impl ByteRegion {
    pub fn new(offset: u64, bytes: Vec<u8>) -> ByteRegion {
        ByteRegion { offset, bytes }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// First offset after this region.
    pub fn end(&self) -> u64 {
        self.offset + self.len()
    }

    fn read<R: Read + Seek>(reader: &mut R, offset: u64, length: u64) -> Result<ByteRegion> {
        reader.seek(SeekFrom::Start(offset))?;
        let mut bytes = vec![0u8; length as usize];
        reader.read_exact(&mut bytes)?;
        Ok(ByteRegion::new(offset, bytes))
    }
}

// Regions can be megabytes long, so never print their contents
impl std::fmt::Debug for ByteRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ByteRegion({}..{})", self.offset, self.end())
    }
}

/// The ZIP entries in front of the APK Signing Block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentEntry {
    /// Read into memory so the whole file can be written back out.
    Loaded(ByteRegion),
    /// Low memory mode. The entries stay on disk and only the tail of the
    /// file is ever rewritten.
    Skipped
}

/// The [APK structure] has four major sections:
///
/// | Zip contents | APK Signing Block | Central directory | EOCD(End of Central Directory) |
///
/// Every section is held in memory except, in low memory mode, the zip
/// contents. Built fresh from the file for every operation.
///
/// [APK structure]: https://source.android.com/docs/security/apksigning/v2#apk-signing-block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApkSections {
    pub file_size: u64,
    pub content: ContentEntry,
    pub signing_block: ByteRegion,
    pub central_directory: ByteRegion,
    pub eocd: ByteRegion
}

impl ApkSections {
    pub fn from_path(path: impl AsRef<Path>, low_memory: bool) -> Result<ApkSections> {
        let mut apk = File::open(path.as_ref())?;
        let sections = ApkSections::read(&mut apk, low_memory)?;
        debug!("{:?} sections: {:?}", path.as_ref(), sections);
        Ok(sections)
    }

    pub fn read<R: Read + Seek>(reader: &mut R, low_memory: bool) -> Result<ApkSections> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        let eocd = find_eocd(reader)?;
        // The APK Signing Block immediately precedes the Central Directory
        let cd_offset = checked_central_directory_offset(&eocd)?;
        let signing_block = find_signing_block(reader, cd_offset)?;
        let central_directory = ByteRegion::read(reader, cd_offset, eocd.offset - cd_offset)?;
        let content = if low_memory {
            ContentEntry::Skipped
        } else {
            ContentEntry::Loaded(ByteRegion::read(reader, 0, signing_block.offset)?)
        };

        let sections = ApkSections {
            file_size,
            content,
            signing_block,
            central_directory,
            eocd
        };
        sections.check()?;
        Ok(sections)
    }

    pub fn low_memory(&self) -> bool {
        matches!(self.content, ContentEntry::Skipped)
    }

    /// Where a rewrite has to start: the whole file when the zip contents are
    /// in memory, otherwise the APK Signing Block.
    pub fn rewrite_start(&self) -> u64 {
        match &self.content {
            ContentEntry::Loaded(content) => content.offset,
            ContentEntry::Skipped => self.signing_block.offset
        }
    }

    /// Makes sure the sections cover the file end to end, in order, and that
    /// the EOCD agrees about where the Central Directory is.
    pub fn check(&self) -> Result<()> {
        if let ContentEntry::Loaded(content) = &self.content {
            if content.offset != 0 || content.end() != self.signing_block.offset {
                return Err(self.inconsistent("zip contents"));
            }
        }
        if self.signing_block.end() != self.central_directory.offset {
            return Err(self.inconsistent("APK Signing Block"));
        }
        if self.central_directory.end() != self.eocd.offset {
            return Err(self.inconsistent("Central Directory"));
        }
        if self.eocd.end() != self.file_size {
            return Err(self.inconsistent("End of Central Directory"));
        }

        let recorded_offset = central_directory_offset(&self.eocd.bytes)?;
        if recorded_offset != self.central_directory.offset {
            return Err(PackerError::InconsistentSections(format!(
                "Central Directory offset mismatch, EOCD records {} but it starts at {}",
                recorded_offset, self.central_directory.offset
            )));
        }
        Ok(())
    }

    fn inconsistent(&self, section: &str) -> PackerError {
        PackerError::InconsistentSections(format!("{} out of place in {:?}", section, self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{create_test_apk, synthetic_apk, FAKE_V2_SIGNATURE};
    use crate::zip_parser::with_central_directory_offset;
    use std::io::Cursor;

    #[test]
    fn test_apk_sections() {
        let apk = create_test_apk(&[]).unwrap();
        let sections = ApkSections::read(&mut Cursor::new(&apk), false).unwrap();

        assert!(!sections.low_memory());
        assert_eq!(sections.file_size, apk.len() as u64);
        assert_eq!(sections.rewrite_start(), 0);
        let ContentEntry::Loaded(content) = &sections.content else {
            panic!("contents should be loaded");
        };
        assert_eq!(content.bytes, apk[..sections.signing_block.offset as usize]);
        // Central Directory file header signature
        assert_eq!(&sections.central_directory.bytes[..4], &[0x50, 0x4B, 0x01, 0x02]);
    }

    #[test]
    fn test_low_memory_skips_contents() {
        let apk = create_test_apk(&[]).unwrap();
        let sections = ApkSections::read(&mut Cursor::new(&apk), true).unwrap();

        assert!(sections.low_memory());
        assert_eq!(sections.content, ContentEntry::Skipped);
        assert_eq!(sections.rewrite_start(), sections.signing_block.offset);
        sections.check().unwrap();
    }

    #[test]
    fn test_synthetic_layout() {
        let apk = synthetic_apk(10_000, 500, &[]).unwrap();
        let sections = ApkSections::read(&mut Cursor::new(&apk), false).unwrap();

        let block_len = 8 + 8 + 4 + FAKE_V2_SIGNATURE.len() as u64 + 24;
        assert_eq!(block_len, 60);
        assert_eq!(sections.file_size, 10_000);
        assert_eq!(sections.signing_block.len(), block_len);
        assert_eq!(sections.central_directory.len(), 500);
        assert_eq!(sections.eocd.offset, 10_000 - 22);
    }

    #[test]
    fn test_check_catches_inconsistencies() {
        let apk = create_test_apk(&[]).unwrap();
        let sections = ApkSections::read(&mut Cursor::new(&apk), false).unwrap();

        let mut wrong_size = sections.clone();
        wrong_size.file_size += 1;
        assert!(matches!(wrong_size.check(), Err(PackerError::InconsistentSections(_))));

        let mut wrong_offset = sections.clone();
        let off_by_one = sections.central_directory.offset + 1;
        wrong_offset.eocd.bytes =
            with_central_directory_offset(&sections.eocd.bytes, off_by_one).unwrap();
        assert!(matches!(wrong_offset.check(), Err(PackerError::InconsistentSections(_))));

        let mut shifted_content = sections;
        if let ContentEntry::Loaded(content) = &mut shifted_content.content {
            content.offset = 1;
        }
        assert!(matches!(shifted_content.check(), Err(PackerError::InconsistentSections(_))));
    }
}
