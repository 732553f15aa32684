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

use bytes::Bytes;
use packer_common::*;
use std::io::{Read, Seek};

use crate::{
    id_values::{parse_id_values, IdValueMap},
    section_info::ByteRegion,
    signing_block::find_signing_block,
    zip_parser::{checked_central_directory_offset, find_eocd}
};

/// Reads just the APK Signing Block, without the rest of the sections.
pub fn read_signing_block<R: Read + Seek>(reader: &mut R) -> Result<ByteRegion> {
    let eocd = find_eocd(reader)?;
    let cd_offset = checked_central_directory_offset(&eocd)?;
    find_signing_block(reader, cd_offset)
}

pub fn read_id_values<R: Read + Seek>(reader: &mut R) -> Result<IdValueMap> {
    parse_id_values(&read_signing_block(reader)?.bytes)
}

pub fn read_value<R: Read + Seek>(reader: &mut R, id: u32) -> Result<Option<Vec<u8>>> {
    Ok(read_id_values(reader)?.shift_remove(&id))
}

pub fn read_value_buffer<R: Read + Seek>(reader: &mut R, id: u32) -> Result<Option<Bytes>> {
    Ok(read_value(reader, id)?.map(Bytes::from))
}

/// Reads the value stored under `id` as UTF-8 text.
pub fn read_string_value<R: Read + Seek>(reader: &mut R, id: u32) -> Result<Option<String>> {
    read_value(reader, id)?
        .map(|value| Ok(String::from_utf8(value)?))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing_types::{CHANNEL_BLOCK_ID, SIGNATURE_SCHEME_V2_BLOCK_ID};
    use crate::testing::{create_test_apk, create_test_zip, FAKE_V2_SIGNATURE};
    use std::io::Cursor;

    #[test]
    fn test_read_values() {
        let extra: &[(u32, &[u8])] = &[(CHANNEL_BLOCK_ID, "渠道".as_bytes()), (0x99, &[1, 2, 3])];
        let apk = create_test_apk(extra).unwrap();
        let mut reader = Cursor::new(&apk);

        let id_values = read_id_values(&mut reader).unwrap();
        assert_eq!(id_values.len(), 3);
        assert_eq!(
            read_value(&mut reader, SIGNATURE_SCHEME_V2_BLOCK_ID).unwrap(),
            Some(FAKE_V2_SIGNATURE.to_vec())
        );
        assert_eq!(
            read_value_buffer(&mut reader, 0x99).unwrap(),
            Some(Bytes::from_static(&[1, 2, 3]))
        );
        assert_eq!(
            read_string_value(&mut reader, CHANNEL_BLOCK_ID).unwrap().as_deref(),
            Some("渠道")
        );
        assert_eq!(read_value(&mut reader, 0x1234).unwrap(), None);
    }

    #[test]
    fn test_value_not_utf8() {
        let apk = create_test_apk(&[(CHANNEL_BLOCK_ID, &[0xC3, 0x28])]).unwrap();
        let result = read_string_value(&mut Cursor::new(&apk), CHANNEL_BLOCK_ID);
        assert!(matches!(result, Err(PackerError::ChannelNotUtf8(_))));
    }

    #[test]
    fn test_unsigned_zip() {
        let zip = create_test_zip().unwrap();
        let result = read_value(&mut Cursor::new(&zip), CHANNEL_BLOCK_ID);
        assert!(matches!(result, Err(PackerError::SignatureNotFound(_))));
    }
}
