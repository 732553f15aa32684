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

//! Binary layer for channel packing: finds, parses and rewrites the APK
//! Signing Block and the ZIP comment without touching the APK's signature.

pub mod block_mutator;
pub mod id_values;
pub mod section_info;
// APK Signing Block based on https://source.android.com/docs/security/features/apksigning/v2
pub mod signing_block;
pub mod signing_types;
#[allow(dead_code)]
pub mod testing;
pub mod v1_comment;
pub mod values;
pub mod zip_parser;

pub use block_mutator::{
    apply_rewrite, check_writable, plan_update, update_id_values, Mutation, Rewrite, SetLen
};
pub use id_values::{build_signing_block, parse_id_values, IdValueMap};
pub use section_info::{ApkSections, ByteRegion, ContentEntry};
pub use signing_types::{CHANNEL_BLOCK_ID, SIGNATURE_SCHEME_V2_BLOCK_ID, VERITY_PADDING_BLOCK_ID};
