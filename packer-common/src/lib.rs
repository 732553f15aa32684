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

use std::{io, rc::Rc, string::FromUtf8Error};

use deku::prelude::*;
use zip::result::ZipError;

/// Common error type shared between the packer crates.
///
/// In general designed to avoid needing utilities like `map_err`.
#[derive(Debug, Clone)]
pub enum PackerError {
    /// packer-cli encountered an error while processing something specific to
    /// the command line implementation. For example, not enough arguments were
    /// passed via the shell.
    Cli(String),
    /// A caller passed something that can never be written, such as an empty
    /// channel or an empty id-value map.
    InvalidArgument(String),
    /// The ZIP or APK Signing Block structure is missing or inconsistent.
    ///
    /// This covers a missing End of Central Directory record, a missing APK
    /// Signing Block, an APK Signing Block without an APK Signature Scheme v2
    /// entry, and a Central Directory which isn't immediately followed by the
    /// End of Central Directory record.
    SignatureNotFound(String),
    /// The archive carries a ZIP64 End of Central Directory Locator, or an
    /// offset grew past what a 32-bit End of Central Directory can record.
    Zip64Unsupported,
    /// An ID-value pair inside the APK Signing Block has a length which is too
    /// small or runs past the end of the block. `entry` is 1-based.
    MalformedEntry { entry: usize, detail: String },
    /// Attempted to build an APK Signing Block with no ID-value pairs.
    EmptyBlock,
    /// Attempted to write an ID which belongs to the APK itself (the v2
    /// signature or the verity padding).
    ReservedId(u32),
    /// The serialised APK Signing Block was not the length its own size
    /// fields claim.
    ///
    /// **If you experience this, it is considered an internal bug.**
    SigningBlockLayoutMismatch { expected: u64, actual: u64 },
    /// The sections read from an APK don't line up end to end, or the Central
    /// Directory offset recorded in the EOCD disagrees with where the Central
    /// Directory was found.
    InconsistentSections(String),
    /// After rewriting an APK the write position didn't land on the expected
    /// file length.
    ///
    /// **If you experience this, it is considered an internal bug.**
    SizeMismatch { expected: u64, actual: u64 },
    /// The ZIP comment already carries a channel. The destination file has
    /// been deleted rather than left with two channels.
    ChannelAlreadyExists(String),
    /// The channel magic was found but no channel precedes it, or the ID-value
    /// pair for the channel is absent.
    ChannelNotFound,
    /// The last bytes of the file are not the channel magic.
    MagicNotFound,
    /// Channel bytes were found but they are not valid UTF-8.
    ChannelNotUtf8(FromUtf8Error),
    /// Writing the channel would grow the ZIP comment past what its 16-bit
    /// length field (or the channel's own length field) can describe.
    CommentTooLong(usize),
    /// An error occurred while reading or writing an APK on disk.
    FileIoError(Rc<io::Error>),
    /// The `zip` crate failed to read the archive's entry list.
    ZipReadingFailed(Rc<ZipError>),
    /// Something went wrong while serialising an APK Signing Block. See
    /// [DekuError].
    ByteSerialisationFailed(DekuError)
}

/// Result type where the error is always [PackerError].
pub type Result<T> = std::result::Result<T, PackerError>;

impl PackerError {
    /// True for errors which only mean "this file doesn't have that structure".
    /// Used by the `has_*` probes, which answer `false` instead of failing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PackerError::SignatureNotFound(_)
                | PackerError::Zip64Unsupported
                | PackerError::MalformedEntry { .. }
                | PackerError::MagicNotFound
                | PackerError::ChannelNotFound
        )
    }
}

impl From<PackerError> for String {
    fn from(value: PackerError) -> Self {
        format!("{:?}", value)
    }
}

// Automatic conversion from other types of error to PackerError makes the rest of the code cleaner
impl From<io::Error> for PackerError {
    fn from(value: io::Error) -> Self {
        PackerError::FileIoError(value.into())
    }
}

impl From<DekuError> for PackerError {
    fn from(value: DekuError) -> Self {
        PackerError::ByteSerialisationFailed(value)
    }
}

impl From<ZipError> for PackerError {
    fn from(value: ZipError) -> Self {
        PackerError::ZipReadingFailed(value.into())
    }
}

impl From<FromUtf8Error> for PackerError {
    fn from(value: FromUtf8Error) -> Self {
        PackerError::ChannelNotUtf8(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_errors_are_probe_friendly() {
        assert!(PackerError::SignatureNotFound("no EOCD".into()).is_not_found());
        assert!(PackerError::Zip64Unsupported.is_not_found());
        assert!(PackerError::MagicNotFound.is_not_found());
        assert!(!PackerError::ReservedId(0x7109871a).is_not_found());
        assert!(!PackerError::from(io::Error::from(io::ErrorKind::NotFound)).is_not_found());
    }

    #[test]
    fn error_converts_to_string() {
        let message: String = PackerError::ReservedId(0x42726577).into();
        assert_eq!(message, "ReservedId(1114793335)");
    }
}
