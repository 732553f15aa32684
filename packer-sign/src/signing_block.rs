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

use byteorder::{LittleEndian, ReadBytesExt};
use packer_common::*;
use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::{section_info::ByteRegion, signing_types::APK_SIGNING_BLOCK_MAGIC};

const APK_SIG_BLOCK_MIN_SIZE: u64 = 32;
// uint64 size + uint128 magic
const APK_SIG_BLOCK_FOOTER_SIZE: u64 = 24;
// Offsets in a non-ZIP64 archive are 32-bit
const APK_SIG_BLOCK_MAX_SIZE: u64 = u32::MAX as u64 - 8;

/// Reads the APK Signing Block which ends where the Central Directory starts.
pub fn find_signing_block<R: Read + Seek>(
    reader: &mut R,
    central_directory_offset: u64
) -> Result<ByteRegion> {
    // FORMAT:
    // OFFSET       DATA TYPE  DESCRIPTION
    // * @+0  bytes uint64:    size in bytes (excluding this field)
    // * @+8  bytes payload
    // * @-24 bytes uint64:    size in bytes (same as the one above)
    // * @-16 bytes uint128:   magic
    if central_directory_offset < APK_SIG_BLOCK_MIN_SIZE {
        return Err(PackerError::SignatureNotFound(format!(
            "APK too small for APK Signing Block. ZIP Central Directory offset: {}",
            central_directory_offset
        )));
    }

    reader.seek(SeekFrom::Start(central_directory_offset - APK_SIG_BLOCK_FOOTER_SIZE))?;
    let size_in_footer = reader.read_u64::<LittleEndian>()?;
    let mut magic = [0u8; 16];
    reader.read_exact(&mut magic)?;
    if &magic != APK_SIGNING_BLOCK_MAGIC {
        return Err(PackerError::SignatureNotFound(
            "No APK Signing Block before ZIP Central Directory".into()
        ));
    }
    if !(APK_SIG_BLOCK_FOOTER_SIZE..=APK_SIG_BLOCK_MAX_SIZE).contains(&size_in_footer) {
        return Err(PackerError::SignatureNotFound(format!(
            "APK Signing Block size out of range: {}",
            size_in_footer
        )));
    }

    let total_size = size_in_footer + 8;
    let signing_block_offset = central_directory_offset
        .checked_sub(total_size)
        .ok_or_else(|| {
            PackerError::SignatureNotFound(format!(
                "APK Signing Block offset out of range: {} - {}",
                central_directory_offset, total_size
            ))
        })?;

    reader.seek(SeekFrom::Start(signing_block_offset))?;
    let mut block = vec![0u8; total_size as usize];
    reader.read_exact(&mut block)?;
    let size_in_header = Cursor::new(&block).read_u64::<LittleEndian>()?;
    if size_in_header != size_in_footer {
        return Err(PackerError::SignatureNotFound(format!(
            "APK Signing Block sizes in header and footer do not match: {} vs {}",
            size_in_header, size_in_footer
        )));
    }

    Ok(ByteRegion::new(signing_block_offset, block))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{create_test_apk, create_test_zip, FAKE_V2_SIGNATURE};
    use crate::zip_parser::{central_directory_offset, find_eocd};

    fn signing_block_of(apk: &[u8]) -> Result<ByteRegion> {
        let mut cursor = Cursor::new(apk);
        let eocd = find_eocd(&mut cursor)?;
        let cd_offset = central_directory_offset(&eocd.bytes)?;
        find_signing_block(&mut cursor, cd_offset)
    }

    #[test]
    fn test_find_signing_block() {
        let apk = create_test_apk(&[]).unwrap();
        let block = signing_block_of(&apk).unwrap();

        // size + (size + id + value) + size + magic
        assert_eq!(block.len(), 8 + (8 + 4 + FAKE_V2_SIGNATURE.len() as u64) + 8 + 16);
        assert_eq!(&block.bytes[block.bytes.len() - 16..], APK_SIGNING_BLOCK_MAGIC);
        let eocd = find_eocd(&mut Cursor::new(&apk)).unwrap();
        assert_eq!(block.end(), central_directory_offset(&eocd.bytes).unwrap());
    }

    #[test]
    fn test_plain_zip_has_no_signing_block() {
        let zip = create_test_zip().unwrap();
        assert!(matches!(signing_block_of(&zip), Err(PackerError::SignatureNotFound(_))));
    }

    #[test]
    fn test_header_and_footer_sizes_must_match() {
        let mut apk = create_test_apk(&[]).unwrap();
        let block = signing_block_of(&apk).unwrap();
        apk[block.offset as usize] ^= 0x01;
        assert!(matches!(signing_block_of(&apk), Err(PackerError::SignatureNotFound(_))));
    }

    #[test]
    fn test_footer_size_out_of_range() {
        let mut apk = create_test_apk(&[]).unwrap();
        let block = signing_block_of(&apk).unwrap();
        let footer = (block.end() - 24) as usize;
        apk[footer..footer + 8].copy_from_slice(&16u64.to_le_bytes());
        assert!(matches!(signing_block_of(&apk), Err(PackerError::SignatureNotFound(_))));

        // Larger than everything in front of the Central Directory
        apk[footer..footer + 8].copy_from_slice(&(block.end() + 1).to_le_bytes());
        assert!(matches!(signing_block_of(&apk), Err(PackerError::SignatureNotFound(_))));
    }
}
