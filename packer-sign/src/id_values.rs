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
use deku::DekuContainerWrite;
use indexmap::IndexMap;
use log::debug;
use packer_common::*;
use std::io::Cursor;

use crate::signing_types::{
    ApkSigningBlock, SigningBlockIdValuePair, ANDROID_COMMON_PAGE_ALIGNMENT_BYTES,
    SIGNATURE_SCHEME_V2_BLOCK_ID, VERITY_PADDING_BLOCK_ID
};

/// ID-value pairs of an APK Signing Block, in the order they appear.
pub type IdValueMap = IndexMap<u32, Vec<u8>>;

/// Reads every ID-value pair out of a whole APK Signing Block.
///
/// If an ID shows up more than once, the last value wins and the pair keeps
/// the position of the first one.
pub fn parse_id_values(signing_block: &[u8]) -> Result<IdValueMap> {
    // FORMAT:
    // OFFSET       DATA TYPE  DESCRIPTION
    // * @+0  bytes uint64:    size in bytes (excluding this field)
    // * @+8  bytes pairs
    // * @-24 bytes uint64:    size in bytes (same as the one above)
    // * @-16 bytes uint128:   magic
    if signing_block.len() < 8 + 24 {
        return Err(PackerError::SignatureNotFound(format!(
            "APK Signing Block too small: {} bytes",
            signing_block.len()
        )));
    }
    let pairs = &signing_block[8..signing_block.len() - 24];
    let mut cursor = Cursor::new(pairs);
    let mut id_values = IdValueMap::new();
    let mut entry_count = 0;

    while (cursor.position() as usize) < pairs.len() {
        entry_count += 1;
        let remaining = pairs.len() - cursor.position() as usize;
        if remaining < 8 {
            return Err(PackerError::MalformedEntry {
                entry: entry_count,
                detail: format!("Insufficient data to read size: {} bytes left", remaining)
            });
        }
        let length = cursor.read_u64::<LittleEndian>()?;
        let available = remaining - 8;
        if length < 4 || length > available as u64 {
            return Err(PackerError::MalformedEntry {
                entry: entry_count,
                detail: format!("Size out of range: {}, available: {}", length, available)
            });
        }
        let id = cursor.read_u32::<LittleEndian>()?;
        let value_start = cursor.position() as usize;
        let value_end = value_start + length as usize - 4;
        id_values.insert(id, pairs[value_start..value_end].to_vec());
        cursor.set_position(value_end as u64);
    }

    if id_values.is_empty() {
        return Err(PackerError::SignatureNotFound(
            "No ID-value pairs in APK Signing Block".into()
        ));
    }
    if id_values.contains_key(&SIGNATURE_SCHEME_V2_BLOCK_ID) {
        debug!("Found APK Signature Scheme v2 block among {} pairs", id_values.len());
    }
    Ok(id_values)
}

/// Serialises ID-value pairs into a complete APK Signing Block.
///
/// A verity padding pair is never copied as-is. If the map has one, a fresh one
/// is appended after every other pair, sized so the whole block lands on a
/// 4096 byte boundary (or dropped, if the block is already aligned).
pub fn build_signing_block(id_values: &IdValueMap) -> Result<Vec<u8>> {
    if id_values.is_empty() {
        return Err(PackerError::EmptyBlock);
    }

    let mut pairs: Vec<SigningBlockIdValuePair> = id_values
        .iter()
        .filter(|(id, _)| **id != VERITY_PADDING_BLOCK_ID)
        .map(|(id, value)| SigningBlockIdValuePair::new(*id, value.clone()))
        .collect();
    // Size of self not counted: magic + trailing size + pairs
    let mut size_of_self = 16 + 8 + pairs.iter().map(|p| p.encoded_len()).sum::<u64>();

    if id_values.contains_key(&VERITY_PADDING_BLOCK_ID) {
        let remainder = (size_of_self + 8) % ANDROID_COMMON_PAGE_ALIGNMENT_BYTES;
        if remainder != 0 {
            let mut padding = ANDROID_COMMON_PAGE_ALIGNMENT_BYTES - remainder;
            // The padding has to fit its own length prefix and ID
            if padding < SigningBlockIdValuePair::OVERHEAD {
                padding += ANDROID_COMMON_PAGE_ALIGNMENT_BYTES;
            }
            size_of_self += padding;
            let filler = vec![0u8; (padding - SigningBlockIdValuePair::OVERHEAD) as usize];
            pairs.push(SigningBlockIdValuePair::new(VERITY_PADDING_BLOCK_ID, filler));
            debug!("Padding APK Signing Block by {} bytes", padding);
        }
    }

    let bytes = ApkSigningBlock::new(pairs, size_of_self).to_bytes()?;
    if bytes.len() as u64 != size_of_self + 8 {
        return Err(PackerError::SigningBlockLayoutMismatch {
            expected: size_of_self + 8,
            actual: bytes.len() as u64
        });
    }
    Ok(bytes)
}
