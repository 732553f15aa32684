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

use log::{debug, info};
use packer_common::*;
use std::{
    fs::File,
    io::{self, Cursor, Seek, SeekFrom, Write}
};

use crate::{
    id_values::{build_signing_block, parse_id_values, IdValueMap},
    section_info::{ApkSections, ContentEntry},
    signing_types::{RESERVED_BLOCK_IDS, SIGNATURE_SCHEME_V2_BLOCK_ID},
    zip_parser::with_central_directory_offset
};

/// Output which can be cut short (or grown) after it is rewritten.
// Output can be a file *or* a buffer in memory
pub trait SetLen {
    fn set_len(&mut self, size: u64) -> io::Result<()>;
}

impl SetLen for File {
    fn set_len(&mut self, size: u64) -> io::Result<()> {
        File::set_len(self, size)
    }
}

impl SetLen for Cursor<Vec<u8>> {
    fn set_len(&mut self, size: u64) -> io::Result<()> {
        self.get_mut().resize(size as usize, 0);
        Ok(())
    }
}

/// What [update_id_values] did to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// Nothing to add and nothing that was asked to be removed existed, so the
    /// output was never touched.
    Unchanged,
    /// The output now ends at `new_size`, `delta` bytes longer than before.
    Rewritten { delta: i64, new_size: u64 }
}

/// A rewrite worked out from the sections alone, before any output is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    signing_block: Vec<u8>,
    eocd: Vec<u8>,
    pub delta: i64,
    pub new_size: u64
}

/// Works out the new APK Signing Block and EOCD for adding and removing
/// ID-value pairs. Returns `None` if there's nothing to add and nothing that
/// was asked to be removed exists.
///
/// Removals happen before additions. The v2 signature and verity padding can't
/// be added or removed.
pub fn plan_update(
    sections: &ApkSections,
    add: &IdValueMap,
    remove: &[u32]
) -> Result<Option<Rewrite>> {
    check_writable(add)?;

    let mut id_values = parse_id_values(&sections.signing_block.bytes)?;
    if !id_values.contains_key(&SIGNATURE_SCHEME_V2_BLOCK_ID) {
        return Err(PackerError::SignatureNotFound(
            "No APK Signature Scheme v2 block in APK Signing Block".into()
        ));
    }
    debug!("Existing ID-value pairs: {:x?}", id_values.keys());

    let mut removed = 0;
    for id in remove.iter().filter(|id| !RESERVED_BLOCK_IDS.contains(id)) {
        if id_values.shift_remove(id).is_some() {
            removed += 1;
        }
    }
    if removed == 0 && add.is_empty() {
        info!("No ID-value pair was added or removed");
        return Ok(None);
    }
    for (id, value) in add {
        id_values.insert(*id, value.clone());
    }
    debug!("Final ID-value pairs: {:x?}", id_values.keys());

    let signing_block = build_signing_block(&id_values)?;
    let delta = signing_block.len() as i64 - sections.signing_block.len() as i64;
    debug!(
        "APK Signing Block size {} -> {}",
        sections.signing_block.len(),
        signing_block.len()
    );
    let new_cd_offset = shift(sections.central_directory.offset, delta)?;
    let eocd = with_central_directory_offset(&sections.eocd.bytes, new_cd_offset)?;
    let new_size = shift(sections.file_size, delta)?;

    Ok(Some(Rewrite {
        signing_block,
        eocd,
        delta,
        new_size
    }))
}

/// Writes a planned rewrite to `dest`.
///
/// `dest` may be the file `sections` was read from. In low memory mode it has
/// to be, or a byte-for-byte copy of it, since the zip contents in front of
/// the APK Signing Block are left where they are.
pub fn apply_rewrite<W: Write + Seek + SetLen>(
    sections: &ApkSections,
    rewrite: &Rewrite,
    dest: &mut W
) -> Result<Mutation> {
    dest.seek(SeekFrom::Start(sections.rewrite_start()))?;
    if let ContentEntry::Loaded(content) = &sections.content {
        dest.write_all(&content.bytes)?;
    }
    dest.write_all(&rewrite.signing_block)?;
    dest.write_all(&sections.central_directory.bytes)?;
    dest.write_all(&rewrite.eocd)?;
    dest.flush()?;

    let position = dest.stream_position()?;
    if position != rewrite.new_size {
        return Err(PackerError::SizeMismatch {
            expected: rewrite.new_size,
            actual: position
        });
    }
    dest.set_len(rewrite.new_size)?;
    info!("Rewrote APK Signing Block, APK is now {} bytes", rewrite.new_size);

    Ok(Mutation::Rewritten {
        delta: rewrite.delta,
        new_size: rewrite.new_size
    })
}

/// Adds and removes ID-value pairs in the APK Signing Block described by
/// `sections`, writing the resulting APK to `dest`. See [plan_update] and
/// [apply_rewrite].
pub fn update_id_values<W: Write + Seek + SetLen>(
    sections: &ApkSections,
    dest: &mut W,
    add: &IdValueMap,
    remove: &[u32]
) -> Result<Mutation> {
    match plan_update(sections, add, remove)? {
        Some(rewrite) => apply_rewrite(sections, &rewrite, dest),
        None => Ok(Mutation::Unchanged)
    }
}

/// Fails if `add` holds an ID which belongs to the APK itself.
pub fn check_writable(add: &IdValueMap) -> Result<()> {
    match add.keys().find(|id| RESERVED_BLOCK_IDS.contains(id)) {
        Some(id) => Err(PackerError::ReservedId(*id)),
        None => Ok(())
    }
}

fn shift(offset: u64, delta: i64) -> Result<u64> {
    offset.checked_add_signed(delta).ok_or(PackerError::SizeMismatch {
        expected: offset,
        actual: 0
    })
}
