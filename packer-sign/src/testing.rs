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

//! Builders for small APKs used in tests.

use packer_common::*;
use std::io::{Cursor, Write};
use zip::{write::SimpleFileOptions, CompressionMethod, DateTime, ZipWriter};

use crate::{
    id_values::{build_signing_block, IdValueMap},
    signing_types::SIGNATURE_SCHEME_V2_BLOCK_ID,
    zip_parser::{
        central_directory_offset, find_eocd_in_buffer, with_central_directory_offset,
        EOCD_COMMENT_LENGTH_OFFSET, EOCD_MAGIC, EOCD_MIN_SIZE
    }
};

/// Stands in for a real v2 signature, nothing ever verifies it.
pub const FAKE_V2_SIGNATURE: &[u8; 16] = b"fake v2 signer!!";

/// A plain ZIP with a couple of entries and no APK Signing Block.
pub fn create_test_zip() -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    // Fixed timestamp so two builds are byte-identical
    let options = SimpleFileOptions::default()
        .last_modified_time(DateTime::default())
        .compression_method(CompressionMethod::Stored)
        .with_alignment(4);

    zip.start_file("AndroidManifest.xml", options)?;
    zip.write_all(b"<manifest package=\"com.example.channel\" />")?;
    zip.start_file("classes.dex", options.compression_method(CompressionMethod::Deflated))?;
    zip.write_all(&[0x64, 0x65, 0x78, 0x0A, 0x30, 0x33, 0x35, 0x00])?;
    zip.write_all(&[0u8; 256])?;

    Ok(zip.finish()?.into_inner())
}

/// Replaces the EOCD comment of `zip`.
pub fn set_comment(zip: &[u8], comment: &[u8]) -> Result<Vec<u8>> {
    let pos = find_eocd_in_buffer(zip)
        .ok_or_else(|| PackerError::SignatureNotFound("No EOCD in test zip".into()))?;
    let comment_len =
        u16::try_from(comment.len()).map_err(|_e| PackerError::CommentTooLong(comment.len()))?;

    let length_pos = pos + EOCD_COMMENT_LENGTH_OFFSET as usize;
    let mut commented = zip[..length_pos].to_vec();
    commented.extend(comment_len.to_le_bytes());
    commented.extend(comment);
    Ok(commented)
}

/// Slots `signing_block` in between the zip entries and the Central Directory
/// of an unsigned `zip`.
pub fn insert_signing_block(zip: &[u8], signing_block: &[u8]) -> Result<Vec<u8>> {
    let eocd_pos = find_eocd_in_buffer(zip)
        .ok_or_else(|| PackerError::SignatureNotFound("No EOCD in test zip".into()))?;
    let cd_offset = central_directory_offset(&zip[eocd_pos..])? as usize;

    let mut apk = zip[..cd_offset].to_vec();
    apk.extend(signing_block);
    apk.extend(&zip[cd_offset..eocd_pos]);
    apk.extend(with_central_directory_offset(
        &zip[eocd_pos..],
        (cd_offset + signing_block.len()) as u64
    )?);
    Ok(apk)
}

fn signing_block_with(extra: &[(u32, &[u8])]) -> Result<Vec<u8>> {
    let mut id_values =
        IdValueMap::from([(SIGNATURE_SCHEME_V2_BLOCK_ID, FAKE_V2_SIGNATURE.to_vec())]);
    for (id, value) in extra {
        id_values.insert(*id, value.to_vec());
    }
    build_signing_block(&id_values)
}

/// A v2-signed looking APK holding the fake signature plus `extra` pairs.
pub fn create_test_apk(extra: &[(u32, &[u8])]) -> Result<Vec<u8>> {
    insert_signing_block(&create_test_zip()?, &signing_block_with(extra)?)
}

/// An APK of exactly `total_size` bytes made of opaque zip contents, the
/// signing block, a Central Directory of `cd_len` filler bytes and a bare EOCD.
pub fn synthetic_apk(total_size: usize, cd_len: usize, extra: &[(u32, &[u8])]) -> Result<Vec<u8>> {
    let signing_block = signing_block_with(extra)?;
    let content_len = total_size
        .checked_sub(signing_block.len() + cd_len + EOCD_MIN_SIZE)
        .ok_or_else(|| PackerError::InvalidArgument(format!("{} bytes is too small", total_size)))?;

    let mut apk = vec![0x11u8; content_len];
    apk.extend(&signing_block);
    apk.extend(vec![0x22u8; cd_len]);
    apk.extend(EOCD_MAGIC);
    // Disk numbers and entry counts
    apk.extend([0u8; 8]);
    apk.extend((cd_len as u32).to_le_bytes());
    apk.extend(((content_len + signing_block.len()) as u32).to_le_bytes());
    apk.extend(0u16.to_le_bytes());
    Ok(apk)
}
