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

use log::debug;
use packer_api::*;
use std::env;

/// Stamps channels into signed APKs.
///
/// ```
/// $ packer-cli write ./app.apk ./out/app-huawei.apk huawei
/// $ packer-cli show ./out/app-huawei.apk
/// v2 channel: huawei
/// ```
///
/// Add `--v1` to use the ZIP comment instead of the APK Signing Block, for APKs
/// which are only JAR signed. Add `--low-memory` to avoid reading the whole
/// APK into memory:
///
/// ```
/// $ packer-cli write ./app.apk ./app.apk xiaomi --low-memory
/// $ packer-cli remove ./app.apk --low-memory
/// $ packer-cli ids ./app.apk
/// ```
///
/// Set `RUST_LOG=debug` to see what gets rewritten.
fn main() -> Result<()> {
    env_logger::init();

    let (flags, args): (Vec<String>, Vec<String>) =
        env::args().skip(1).partition(|arg| arg.starts_with("--"));
    let v1 = flags.iter().any(|flag| flag == "--v1");
    let low_memory = flags.iter().any(|flag| flag == "--low-memory");
    debug!("Arguments {:?}, flags {:?}", args, flags);

    let command = args.first().ok_or(PackerError::Cli(
        "Command not provided, expected show, write, remove or ids".into()
    ))?;
    let apk_path = args.get(1).ok_or(PackerError::Cli("APK path not provided".into()))?;

    match command.as_str() {
        "show" => show(apk_path)?,
        "write" => {
            let dest_path = args
                .get(2)
                .ok_or(PackerError::Cli("Output APK path not provided".into()))?;
            let channel = args.get(3).ok_or(PackerError::Cli("Channel not provided".into()))?;
            if v1 {
                copy_with_channel_v1(apk_path, dest_path, channel)?;
            } else {
                write_channel_v2(apk_path, dest_path, channel, low_memory)?;
            }
            println!("Wrote channel {:?} to {:?}", channel, dest_path);
        }
        "remove" => {
            if v1 {
                remove_channel_v1(apk_path)?;
            } else if remove_channel_v2(apk_path, low_memory)? == Mutation::Unchanged {
                println!("{:?} has no channel", apk_path);
                return Ok(());
            }
            println!("Removed channel from {:?}", apk_path);
        }
        "ids" => {
            for (id, value) in read_id_map(apk_path)? {
                println!("{:#010x}: {} bytes", id, value.len());
            }
        }
        other => return Err(PackerError::Cli(format!("Unknown command {:?}", other)))
    }

    Ok(())
}

fn show(apk_path: &str) -> Result<()> {
    println!("JAR signed: {}", has_jar_signature(apk_path)?);
    println!("APK Signature Scheme v2: {}", has_v2_marker(apk_path)?);
    match read_channel_v1(apk_path) {
        Ok(channel) => println!("v1 channel: {}", channel),
        Err(e) if e.is_not_found() => println!("v1 channel: none"),
        Err(e) => return Err(e)
    }
    match read_channel_v2(apk_path) {
        Ok(channel) => println!("v2 channel: {}", channel),
        Err(e) if e.is_not_found() => println!("v2 channel: none"),
        Err(e) => return Err(e)
    }
    Ok(())
}
