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

// Types involved in the APK Signing Block
use deku::prelude::*;

/// The APK Signature Scheme v2 block. Belongs to the APK's signer, never to us.
pub const SIGNATURE_SCHEME_V2_BLOCK_ID: u32 = 0x7109871a;
/// Filler pair which pads the whole block to a page boundary (added alongside v3).
pub const VERITY_PADDING_BLOCK_ID: u32 = 0x42726577;
/// Where the channel string lives when written through the signing block.
pub const CHANNEL_BLOCK_ID: u32 = 0x881155ff;

/// IDs a caller may never write.
pub const RESERVED_BLOCK_IDS: &[u32] = &[SIGNATURE_SCHEME_V2_BLOCK_ID, VERITY_PADDING_BLOCK_ID];

pub const APK_SIGNING_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";
pub const ANDROID_COMMON_PAGE_ALIGNMENT_BYTES: u64 = 4096;

// Named according to the APK Signature Scheme v2 doc

#[derive(Debug, PartialEq, DekuWrite, Clone)]
pub struct ApkSigningBlock {
    // Size of this structure MINUS this field!
    // This field appears twice, the 'minus' is only for one of them.
    // So if the structure is 128 bytes, this reads 120, NOT 112.
    #[deku(endian = "little")]
    pub size_of_self_not_counted: u64,
    pub pairs: Vec<SigningBlockIdValuePair>,
    #[deku(endian = "little")]
    pub size_of_self_counted: u64,
    pub magic: [u8; 16]
}

#[derive(Debug, PartialEq, DekuWrite, Clone)]
pub struct SigningBlockIdValuePair {
    // Counts the ID as well as the value
    #[deku(endian = "little")]
    pub length: u64,
    #[deku(endian = "little")]
    pub id: u32,
    pub value: Vec<u8>
}

impl SigningBlockIdValuePair {
    /// Length prefix (8) + ID (4)
    pub const OVERHEAD: u64 = 8 + 4;

    pub fn new(id: u32, value: Vec<u8>) -> SigningBlockIdValuePair {
        SigningBlockIdValuePair {
            length: 4 + value.len() as u64,
            id,
            value
        }
    }

    /// Bytes this pair occupies inside the block, length prefix included.
    pub fn encoded_len(&self) -> u64 {
        8 + self.length
    }
}

impl ApkSigningBlock {
    /// Wraps already sized pairs. `size_of_self` must already account for every
    /// pair, the trailing size field and the magic.
    pub fn new(pairs: Vec<SigningBlockIdValuePair>, size_of_self: u64) -> ApkSigningBlock {
        ApkSigningBlock {
            size_of_self_not_counted: size_of_self,
            pairs,
            size_of_self_counted: size_of_self,
            magic: *APK_SIGNING_BLOCK_MAGIC
        }
    }
}
