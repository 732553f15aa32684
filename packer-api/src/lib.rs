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

//! # PACKER API
//!
//! This crate exposes the main public API through which build tooling can
//! stamp a distribution channel into an already signed APK, and read it back
//! at runtime, without signing the APK again.
//!
//! ## APK Signature Scheme v2 and up
//!
//! The channel is stored as an extra ID-value pair inside the APK Signing
//! Block. Verifiers skip pairs they don't know, so the signature still holds.
//!
//! ```ignore
//! let mutation = write_channel_v2("app.apk", "out/app-huawei.apk", "huawei", false)?;
//! assert_eq!(read_channel_v2("out/app-huawei.apk")?, "huawei");
//! ```
//!
//! Low memory mode leaves the zip entries on disk and only rewrites the tail
//! of the file, which is much cheaper for large APKs.
//!
//! ```ignore
//! write_channel_v2("app.apk", "app.apk", "huawei", true)?;
//! ```
//!
//! ## v1 (JAR) signing only
//!
//! The channel goes at the end of the ZIP comment, which a JAR signature
//! doesn't cover.
//!
//! ```ignore
//! copy_with_channel_v1("app.apk", "out/app-xiaomi.apk", "xiaomi")?;
//! assert_eq!(read_channel_v1("out/app-xiaomi.apk")?, "xiaomi");
//! ```
//!
//! ## Arbitrary values
//!
//! Any ID other than the APK's own v2 signature and verity padding can be
//! written, read back and removed.
//!
//! ```ignore
//! write_id_map("app.apk", "app.apk", &IdValueMap::from([(0x1234, b"build 42".to_vec())]), true)?;
//! remove_ids("app.apk", &[0x1234], true)?;
//! ```

use log::{debug, info};
use packer_sign::{
    apply_rewrite, check_writable, plan_update, section_info::ApkSections, v1_comment, values,
    VERITY_PADDING_BLOCK_ID
};
use std::{
    fs::{self, File},
    path::Path
};
use zip::ZipArchive;

pub use packer_common::{PackerError, Result};
pub use packer_sign::{IdValueMap, Mutation, CHANNEL_BLOCK_ID, SIGNATURE_SCHEME_V2_BLOCK_ID};

/// Whether the APK ends with a v1 channel trailer.
pub fn has_v1_marker(path: impl AsRef<Path>) -> Result<bool> {
    let mut apk = File::open(path.as_ref())?;
    v1_comment::has_v1_magic(&mut apk)
}

/// Whether the APK has an APK Signing Block carrying an APK Signature Scheme
/// v2 signature. Only a v2 signed APK can hold a v2 channel.
pub fn has_v2_marker(path: impl AsRef<Path>) -> Result<bool> {
    let mut apk = File::open(path.as_ref())?;
    let id_values = values::read_id_values(&mut apk);
    probe(id_values.map(|id_values| id_values.contains_key(&SIGNATURE_SCHEME_V2_BLOCK_ID)))
}

/// Whether the APK is JAR signed, meaning it has a `META-INF/MANIFEST.MF`
/// and at least one `META-INF/*.SF` signature file.
///
/// Files which can't be read as a ZIP are reported as not signed.
pub fn has_jar_signature(path: impl AsRef<Path>) -> Result<bool> {
    let apk = File::open(path.as_ref())?;
    let archive = match ZipArchive::new(apk) {
        Ok(archive) => archive,
        Err(e) => {
            debug!("{:?} is not a readable ZIP: {}", path.as_ref(), e);
            return Ok(false);
        }
    };

    let mut has_manifest = false;
    let mut has_signature_file = false;
    for name in archive.file_names() {
        has_manifest |= name == "META-INF/MANIFEST.MF";
        has_signature_file |= is_signature_file(name);
    }
    Ok(has_manifest && has_signature_file)
}

fn is_signature_file(name: &str) -> bool {
    name.strip_prefix("META-INF/")
        .and_then(|name| name.strip_suffix(".SF"))
        .is_some_and(|stem| {
            !stem.is_empty() && stem.chars().all(|c| c.is_alphanumeric() || c == '_')
        })
}

pub fn read_channel_v1(path: impl AsRef<Path>) -> Result<String> {
    let mut apk = File::open(path.as_ref())?;
    v1_comment::read_channel(&mut apk)
}

pub fn read_channel_v2(path: impl AsRef<Path>) -> Result<String> {
    let mut apk = File::open(path.as_ref())?;
    debug!("Reading channel from APK Signing Block of {:?}", path.as_ref());
    values::read_string_value(&mut apk, CHANNEL_BLOCK_ID)?.ok_or(PackerError::ChannelNotFound)
}

/// True only if the APK's v1 channel can be read and equals `channel`.
pub fn verify_channel_v1(path: impl AsRef<Path>, channel: &str) -> bool {
    read_channel_v1(path).is_ok_and(|existing| existing == channel)
}

/// True only if the APK's v2 channel can be read and equals `channel`.
pub fn verify_channel_v2(path: impl AsRef<Path>, channel: &str) -> bool {
    read_channel_v2(path).is_ok_and(|existing| existing == channel)
}

/// Appends `channel` to the ZIP comment of the APK, in place.
///
/// If the APK already carries a v1 channel the file is **deleted** and
/// [PackerError::ChannelAlreadyExists] is returned.
pub fn write_channel_v1(path: impl AsRef<Path>, channel: &str) -> Result<()> {
    v1_comment::write_channel(path.as_ref(), channel)?;
    info!("Wrote v1 channel {:?} to {:?}", channel, path.as_ref());
    Ok(())
}

/// Copies `src` to `dest`, then writes a v1 channel into `dest`. If `dest` is
/// `src` the channel is written in place.
pub fn copy_with_channel_v1(
    src: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    channel: &str
) -> Result<()> {
    let (src, dest) = (src.as_ref(), dest.as_ref());
    if !is_same_file(src, dest)? {
        create_parent_dirs(dest)?;
        fs::copy(src, dest)?;
    }
    write_channel_v1(dest, channel)
}

/// Stores `channel` in the APK Signing Block of `src`, writing the result to
/// `dest`. `src` and `dest` may be the same file.
pub fn write_channel_v2(
    src: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    channel: &str,
    low_memory: bool
) -> Result<Mutation> {
    write_id_value(src, dest, CHANNEL_BLOCK_ID, channel.as_bytes().to_vec(), low_memory)
}

/// Drops the whole ZIP comment of the APK, channel included.
pub fn remove_channel_v1(path: impl AsRef<Path>) -> Result<()> {
    v1_comment::remove_channel(path.as_ref())?;
    info!("Removed v1 channel from {:?}", path.as_ref());
    Ok(())
}

pub fn remove_channel_v2(path: impl AsRef<Path>, low_memory: bool) -> Result<Mutation> {
    remove_ids(path, &[CHANNEL_BLOCK_ID], low_memory)
}

/// Every ID-value pair in the APK Signing Block, in file order. The verity
/// padding is left out since it carries nothing.
pub fn read_id_map(path: impl AsRef<Path>) -> Result<IdValueMap> {
    let mut apk = File::open(path.as_ref())?;
    let mut id_values = values::read_id_values(&mut apk)?;
    id_values.shift_remove(&VERITY_PADDING_BLOCK_ID);
    Ok(id_values)
}

pub fn read_id_value(path: impl AsRef<Path>, id: u32) -> Result<Option<Vec<u8>>> {
    let mut apk = File::open(path.as_ref())?;
    values::read_value(&mut apk, id)
}

pub fn read_string_value(path: impl AsRef<Path>, id: u32) -> Result<Option<String>> {
    let mut apk = File::open(path.as_ref())?;
    values::read_string_value(&mut apk, id)
}

pub fn write_id_value(
    src: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    id: u32,
    value: Vec<u8>,
    low_memory: bool
) -> Result<Mutation> {
    write_id_map(src, dest, &IdValueMap::from([(id, value)]), low_memory)
}

/// Adds every pair in `id_values` to the APK Signing Block of `src`, writing
/// the result to `dest`. Existing values for the same IDs are replaced.
///
/// In low memory mode only the end of `dest` is rewritten, so unless `dest` is
/// `src` it starts out as a copy of `src`.
///
/// `dest` is only created once `src` is known to be writable, so a failure to
/// parse `src` leaves no file behind. The rewrite itself happens in place. If
/// it is interrupted, `dest` is left broken.
pub fn write_id_map(
    src: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    id_values: &IdValueMap,
    low_memory: bool
) -> Result<Mutation> {
    let (src, dest) = (src.as_ref(), dest.as_ref());
    if id_values.is_empty() {
        return Err(PackerError::InvalidArgument("No ID-value pairs to write".into()));
    }
    check_writable(id_values)?;

    let sections = ApkSections::from_path(src, low_memory)?;
    let Some(rewrite) = plan_update(&sections, id_values, &[])? else {
        return Ok(Mutation::Unchanged);
    };

    create_parent_dirs(dest)?;
    if low_memory && !is_same_file(src, dest)? {
        debug!("Copying {:?} to {:?} before rewriting its tail", src, dest);
        fs::copy(src, dest)?;
    }
    let mut apk = File::options().read(true).write(true).create(true).truncate(false).open(dest)?;
    let mutation = apply_rewrite(&sections, &rewrite, &mut apk)?;
    drop(apk);
    check_rewritten(dest, &mutation)?;
    info!("Wrote {} ID-value pairs to {:?}", id_values.len(), dest);
    Ok(mutation)
}

/// Removes the pairs with the given IDs from the APK Signing Block, in place.
/// IDs which aren't present, and the APK's own v2 signature and padding, are
/// skipped. If nothing is removed the file isn't touched.
pub fn remove_ids(path: impl AsRef<Path>, ids: &[u32], low_memory: bool) -> Result<Mutation> {
    let path = path.as_ref();
    let sections = ApkSections::from_path(path, low_memory)?;
    let Some(rewrite) = plan_update(&sections, &IdValueMap::new(), ids)? else {
        return Ok(Mutation::Unchanged);
    };

    let mut apk = File::options().read(true).write(true).open(path)?;
    let mutation = apply_rewrite(&sections, &rewrite, &mut apk)?;
    drop(apk);
    check_rewritten(path, &mutation)?;
    Ok(mutation)
}

// Turns "this APK doesn't have that structure" into a plain no
fn probe(result: Result<bool>) -> Result<bool> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!("Probe failed: {:?}", e);
            Ok(false)
        }
        result => result
    }
}

fn create_parent_dirs(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(fs::create_dir_all(parent)?),
        _ => Ok(())
    }
}

fn is_same_file(a: &Path, b: &Path) -> Result<bool> {
    if !b.exists() {
        return Ok(false);
    }
    Ok(fs::canonicalize(a)? == fs::canonicalize(b)?)
}

// Re-reads the sections the rewrite just produced to make sure they line up
fn check_rewritten(path: &Path, mutation: &Mutation) -> Result<()> {
    let Mutation::Rewritten { new_size, .. } = mutation else {
        return Ok(());
    };
    let sections = ApkSections::from_path(path, true)?;
    if sections.file_size != *new_size {
        return Err(PackerError::SizeMismatch {
            expected: *new_size,
            actual: sections.file_size
        });
    }
    Ok(())
}
