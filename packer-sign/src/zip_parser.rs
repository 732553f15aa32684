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

//! Locates and reads the ZIP End of Central Directory (EOCD) record.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use packer_common::*;
use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::section_info::ByteRegion;

pub const EOCD_MAGIC: &[u8; 4] = &[0x50, 0x4B, 0x05, 0x06];
pub const EOCD_MIN_SIZE: usize = 22;
pub const EOCD_CENTRAL_DIRECTORY_SIZE_OFFSET: u64 = 12;
pub const EOCD_CENTRAL_DIRECTORY_OFFSET_OFFSET: u64 = 16;
pub const EOCD_COMMENT_LENGTH_OFFSET: u64 = 20;
pub const MAX_COMMENT_SIZE: usize = u16::MAX as usize;

const ZIP64_EOCD_LOCATOR_MAGIC: &[u8; 4] = &[0x50, 0x4B, 0x06, 0x07];
const ZIP64_EOCD_LOCATOR_SIZE: u64 = 20;

/// Finds the EOCD record and returns it (comment included) with its offset.
///
/// Nearly every APK has an empty comment, so the last 22 bytes are tried before
/// reading the up to 64KiB a comment could occupy.
pub fn find_eocd<R: Read + Seek>(reader: &mut R) -> Result<ByteRegion> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    if file_size < EOCD_MIN_SIZE as u64 {
        return Err(PackerError::SignatureNotFound(format!(
            "File too small for a ZIP End of Central Directory record: {} bytes",
            file_size
        )));
    }

    let eocd = match find_eocd_within(reader, file_size, 0)? {
        Some(eocd) => eocd,
        None => find_eocd_within(reader, file_size, MAX_COMMENT_SIZE)?.ok_or_else(|| {
            PackerError::SignatureNotFound(
                "Not an APK file: ZIP End of Central Directory record not found".into()
            )
        })?
    };

    if is_zip64_locator_present(reader, eocd.offset)? {
        return Err(PackerError::Zip64Unsupported);
    }
    Ok(eocd)
}

fn find_eocd_within<R: Read + Seek>(
    reader: &mut R,
    file_size: u64,
    max_comment_size: usize
) -> Result<Option<ByteRegion>> {
    // Don't read before the start of small files
    let max_comment_size = max_comment_size.min((file_size - EOCD_MIN_SIZE as u64) as usize);
    let buf_size = EOCD_MIN_SIZE + max_comment_size;
    let buf_offset = file_size - buf_size as u64;

    reader.seek(SeekFrom::Start(buf_offset))?;
    let mut buf = vec![0u8; buf_size];
    reader.read_exact(&mut buf)?;

    Ok(find_eocd_in_buffer(&buf)
        .map(|pos| ByteRegion::new(buf_offset + pos as u64, buf.split_off(pos))))
}

/// Returns where the EOCD starts in a buffer holding the tail of a ZIP file.
///
/// Scans backwards from the position an empty comment would put the record at.
/// A signature only counts if the comment length stored after it covers exactly
/// the rest of the buffer, which rules out signature bytes inside the comment.
pub fn find_eocd_in_buffer(buf: &[u8]) -> Option<usize> {
    if buf.len() < EOCD_MIN_SIZE {
        return None;
    }
    let empty_comment_pos = buf.len() - EOCD_MIN_SIZE;
    let max_comment_size = empty_comment_pos.min(MAX_COMMENT_SIZE);

    (0..=max_comment_size).find_map(|expected_comment_size| {
        let pos = empty_comment_pos - expected_comment_size;
        if &buf[pos..pos + 4] != EOCD_MAGIC {
            return None;
        }
        match comment_length(&buf[pos..]) {
            Ok(actual) if actual as usize == expected_comment_size => Some(pos),
            _ => None
        }
    })
}

// The ZIP64 locator sits directly in front of the EOCD
fn is_zip64_locator_present<R: Read + Seek>(reader: &mut R, eocd_offset: u64) -> Result<bool> {
    let Some(locator_offset) = eocd_offset.checked_sub(ZIP64_EOCD_LOCATOR_SIZE) else {
        return Ok(false);
    };
    reader.seek(SeekFrom::Start(locator_offset))?;
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    Ok(&magic == ZIP64_EOCD_LOCATOR_MAGIC)
}

pub fn central_directory_size(eocd: &[u8]) -> Result<u64> {
    let mut cursor = Cursor::new(eocd);
    cursor.set_position(EOCD_CENTRAL_DIRECTORY_SIZE_OFFSET);
    Ok(cursor.read_u32::<LittleEndian>()? as u64)
}

pub fn central_directory_offset(eocd: &[u8]) -> Result<u64> {
    let mut cursor = Cursor::new(eocd);
    cursor.set_position(EOCD_CENTRAL_DIRECTORY_OFFSET_OFFSET);
    Ok(cursor.read_u32::<LittleEndian>()? as u64)
}

pub fn comment_length(eocd: &[u8]) -> Result<u16> {
    let mut cursor = Cursor::new(eocd);
    cursor.set_position(EOCD_COMMENT_LENGTH_OFFSET);
    Ok(cursor.read_u16::<LittleEndian>()?)
}

/// Returns a copy of `eocd` recording `offset` as the Central Directory start.
/// The original bytes are left alone.
pub fn with_central_directory_offset(eocd: &[u8], offset: u64) -> Result<Vec<u8>> {
    let offset = u32::try_from(offset).map_err(|_e| PackerError::Zip64Unsupported)?;
    let mut patched = Cursor::new(eocd.to_vec());
    // Checks the record is long enough before overwriting anything
    central_directory_offset(patched.get_ref())?;
    patched.set_position(EOCD_CENTRAL_DIRECTORY_OFFSET_OFFSET);
    patched.write_u32::<LittleEndian>(offset)?;
    Ok(patched.into_inner())
}

/// Reads the Central Directory offset out of the EOCD, making sure the Central
/// Directory sits right in front of the EOCD with no gap or overlap.
pub fn checked_central_directory_offset(eocd: &ByteRegion) -> Result<u64> {
    let cd_offset = central_directory_offset(&eocd.bytes)?;
    if cd_offset >= eocd.offset {
        return Err(PackerError::SignatureNotFound(format!(
            "ZIP Central Directory offset {} out of range, End of Central Directory at {}",
            cd_offset, eocd.offset
        )));
    }
    let cd_size = central_directory_size(&eocd.bytes)?;
    if cd_offset + cd_size != eocd.offset {
        return Err(PackerError::SignatureNotFound(
            "ZIP Central Directory is not immediately followed by End of Central Directory".into()
        ));
    }
    Ok(cd_offset)
}
