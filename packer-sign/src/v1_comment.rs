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

//! Channels stored in the ZIP comment, for APKs signed with v1 (JAR) signing
//! only. The comment isn't covered by a v1 signature, so it can be changed
//! freely.
//!
//! The channel is appended to whatever comment is already there:
//!
//! | existing comment | channel (n bytes, UTF-8) | n (int16) | magic (8 bytes) |

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use packer_common::*;
use std::{
    fs::{self, File},
    io::{Read, Seek, SeekFrom, Write},
    path::Path
};

use crate::{
    block_mutator::SetLen,
    zip_parser::{comment_length, find_eocd, EOCD_COMMENT_LENGTH_OFFSET, MAX_COMMENT_SIZE}
};

pub const V1_MAGIC: &[u8; 8] = b"LTlovezh";
// int16 length + magic
const V1_TRAILER_SIZE: usize = 2 + V1_MAGIC.len();

/// Whether the file ends with [V1_MAGIC].
pub fn has_v1_magic<R: Read + Seek>(reader: &mut R) -> Result<bool> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    if file_size < V1_MAGIC.len() as u64 {
        return Ok(false);
    }
    reader.seek(SeekFrom::End(-(V1_MAGIC.len() as i64)))?;
    let mut magic = [0u8; V1_MAGIC.len()];
    reader.read_exact(&mut magic)?;
    Ok(&magic == V1_MAGIC)
}

pub fn read_channel<R: Read + Seek>(reader: &mut R) -> Result<String> {
    if !has_v1_magic(reader)? {
        return Err(PackerError::MagicNotFound);
    }
    let file_size = reader.seek(SeekFrom::End(0))?;
    if file_size < V1_TRAILER_SIZE as u64 {
        return Err(PackerError::ChannelNotFound);
    }

    reader.seek(SeekFrom::Start(file_size - V1_TRAILER_SIZE as u64))?;
    let length = reader.read_i16::<LittleEndian>()?;
    if length <= 0 || length as u64 > file_size - V1_TRAILER_SIZE as u64 {
        return Err(PackerError::ChannelNotFound);
    }

    reader.seek(SeekFrom::Start(file_size - V1_TRAILER_SIZE as u64 - length as u64))?;
    let mut channel = vec![0u8; length as usize];
    reader.read_exact(&mut channel)?;
    Ok(String::from_utf8(channel)?)
}

/// Appends `channel` to the ZIP comment of an open APK.
///
/// Fails with [PackerError::ChannelAlreadyExists] if the comment already ends
/// with a readable channel. A comment which merely ends with the magic is
/// treated like any other comment.
pub fn write_channel_to<F: Read + Write + Seek>(file: &mut F, channel: &str) -> Result<()> {
    if channel.is_empty() {
        return Err(PackerError::InvalidArgument("Channel must not be empty".into()));
    }
    let channel = channel.as_bytes();
    let length =
        i16::try_from(channel.len()).map_err(|_e| PackerError::CommentTooLong(channel.len()))?;

    let eocd = find_eocd(file)?;
    let existing_length = comment_length(&eocd.bytes)? as usize;
    if existing_length > 0 && has_v1_magic(file)? {
        match read_channel(file) {
            Ok(existing) => return Err(PackerError::ChannelAlreadyExists(existing)),
            Err(e) => debug!("Comment ends with channel magic but holds no channel: {:?}", e)
        }
    }

    let new_length = existing_length + channel.len() + V1_TRAILER_SIZE;
    if new_length > MAX_COMMENT_SIZE {
        return Err(PackerError::CommentTooLong(new_length));
    }
    debug!("ZIP comment length {} -> {}", existing_length, new_length);

    file.seek(SeekFrom::Start(eocd.offset + EOCD_COMMENT_LENGTH_OFFSET))?;
    file.write_u16::<LittleEndian>(new_length as u16)?;
    // Channel goes after the existing comment, which runs to the end of the file
    file.seek(SeekFrom::Start(eocd.end()))?;
    file.write_all(channel)?;
    file.write_i16::<LittleEndian>(length)?;
    file.write_all(V1_MAGIC)?;
    file.flush()?;
    Ok(())
}

/// Writes `channel` into the ZIP comment of the APK at `path`.
///
/// An APK which already has a channel is deleted.
pub fn write_channel(path: impl AsRef<Path>, channel: &str) -> Result<()> {
    let path = path.as_ref();
    let mut file = File::options().read(true).write(true).open(path)?;
    match write_channel_to(&mut file, channel) {
        Err(PackerError::ChannelAlreadyExists(existing)) => {
            drop(file);
            info!("{:?} already has channel {:?}, deleting it", path, existing);
            fs::remove_file(path)?;
            Err(PackerError::ChannelAlreadyExists(existing))
        }
        result => result
    }
}

/// Drops the whole ZIP comment, channel included.
pub fn remove_channel_from<F: Read + Write + Seek + SetLen>(file: &mut F) -> Result<()> {
    let eocd = find_eocd(file)?;
    let length = comment_length(&eocd.bytes)?;
    if length == 0 {
        debug!("No ZIP comment to remove");
        return Ok(());
    }

    file.seek(SeekFrom::Start(eocd.offset + EOCD_COMMENT_LENGTH_OFFSET))?;
    file.write_u16::<LittleEndian>(0)?;
    file.flush()?;
    file.set_len(eocd.end() - length as u64)?;
    debug!("Removed {} byte ZIP comment", length);
    Ok(())
}

pub fn remove_channel(path: impl AsRef<Path>) -> Result<()> {
    let mut file = File::options().read(true).write(true).open(path.as_ref())?;
    remove_channel_from(&mut file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{create_test_zip, set_comment};
    use crate::zip_parser::EOCD_MIN_SIZE;
    use std::io::Cursor;

    fn write(zip: Vec<u8>, channel: &str) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(zip);
        write_channel_to(&mut cursor, channel)?;
        Ok(cursor.into_inner())
    }

    #[test]
    fn test_write_then_read() {
        let zip = create_test_zip().unwrap();
        let written = write(zip.clone(), "xiaomi").unwrap();

        assert_eq!(written.len(), zip.len() + 6 + 10);
        assert!(written.ends_with(V1_MAGIC));
        assert_eq!(&written[..zip.len() - 2], &zip[..zip.len() - 2]);
        let eocd = find_eocd(&mut Cursor::new(&written)).unwrap();
        assert_eq!(comment_length(&eocd.bytes).unwrap(), 16);
        assert_eq!(read_channel(&mut Cursor::new(&written)).unwrap(), "xiaomi");
    }

    #[test]
    fn test_multi_byte_channel() {
        let zip = create_test_zip().unwrap();
        let written = write(zip, "应用宝-渠道").unwrap();
        assert_eq!(read_channel(&mut Cursor::new(&written)).unwrap(), "应用宝-渠道");
    }

    #[test]
    fn test_appends_after_existing_comment() {
        let zip = set_comment(&create_test_zip().unwrap(), b"built by ci").unwrap();
        let written = write(zip.clone(), "huawei").unwrap();

        assert_eq!(&written[zip.len() - 11..zip.len()], b"built by ci");
        let eocd = find_eocd(&mut Cursor::new(&written)).unwrap();
        assert_eq!(comment_length(&eocd.bytes).unwrap() as usize, 11 + 6 + 10);
        assert_eq!(read_channel(&mut Cursor::new(&written)).unwrap(), "huawei");
    }

    #[test]
    fn test_existing_channel_is_refused() {
        let written = write(create_test_zip().unwrap(), "first").unwrap();
        let result = write(written, "second");
        assert!(matches!(
            result,
            Err(PackerError::ChannelAlreadyExists(existing)) if existing == "first"
        ));
    }

    #[test]
    fn test_magic_without_channel_is_appended_to() {
        // Magic preceded by a zero length
        let mut comment = b"junk".to_vec();
        comment.extend(0i16.to_le_bytes());
        comment.extend(V1_MAGIC);
        let zip = set_comment(&create_test_zip().unwrap(), &comment).unwrap();
        assert!(matches!(read_channel(&mut Cursor::new(&zip)), Err(PackerError::ChannelNotFound)));

        let written = write(zip, "oppo").unwrap();
        assert_eq!(read_channel(&mut Cursor::new(&written)).unwrap(), "oppo");
    }

    #[test]
    fn test_invalid_channels() {
        let zip = create_test_zip().unwrap();
        assert!(matches!(write(zip.clone(), ""), Err(PackerError::InvalidArgument(_))));

        let huge = "x".repeat(i16::MAX as usize + 1);
        assert!(matches!(write(zip.clone(), &huge), Err(PackerError::CommentTooLong(_))));

        let long_comment = set_comment(&zip, &vec![b'c'; MAX_COMMENT_SIZE - 12]).unwrap();
        assert!(matches!(write(long_comment, "abc"), Err(PackerError::CommentTooLong(_))));
    }

    #[test]
    fn test_read_errors() {
        let zip = create_test_zip().unwrap();
        assert!(matches!(read_channel(&mut Cursor::new(&zip)), Err(PackerError::MagicNotFound)));
        let truncated_magic = read_channel(&mut Cursor::new(b"LTlove"));
        assert!(matches!(truncated_magic, Err(PackerError::MagicNotFound)));
        assert!(!has_v1_magic(&mut Cursor::new(b"")).unwrap());

        // Length claims more bytes than the file has
        let mut short = 500i16.to_le_bytes().to_vec();
        short.extend(V1_MAGIC);
        let result = read_channel(&mut Cursor::new(&short));
        assert!(matches!(result, Err(PackerError::ChannelNotFound)));

        // The length is signed, so 0xFFFF is -1 rather than 65535
        let mut negative = vec![b'x'; 300];
        negative.extend((-1i16).to_le_bytes());
        negative.extend(V1_MAGIC);
        let result = read_channel(&mut Cursor::new(&negative));
        assert!(matches!(result, Err(PackerError::ChannelNotFound)));

        let mut not_utf8 = vec![0xFF, 0xFE];
        not_utf8.extend(2i16.to_le_bytes());
        not_utf8.extend(V1_MAGIC);
        let result = read_channel(&mut Cursor::new(&not_utf8));
        assert!(matches!(result, Err(PackerError::ChannelNotUtf8(_))));
    }

    #[test]
    fn test_remove_channel() {
        let zip = set_comment(&create_test_zip().unwrap(), b"old comment").unwrap();
        let written = write(zip, "vivo").unwrap();

        let mut cursor = Cursor::new(written);
        remove_channel_from(&mut cursor).unwrap();
        let removed = cursor.into_inner();
        let eocd = find_eocd(&mut Cursor::new(&removed)).unwrap();
        assert_eq!(eocd.len(), EOCD_MIN_SIZE as u64);
        assert_eq!(removed, create_test_zip().unwrap());

        // Nothing left to remove
        let mut cursor = Cursor::new(removed.clone());
        remove_channel_from(&mut cursor).unwrap();
        assert_eq!(cursor.into_inner(), removed);
    }
}
