// Copyright 2025 bgped Authors
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

use bgped::cli::Command;
use bgped::config::Config;
use bgped::log::LogLevel;
use bgped::server::Speaker;
use bgped::{error, info};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "bgpedd")]
#[command(about = "BGP speaker daemon", version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = Config::from_file(&args.config).map_err(|e| {
        error!("failed to load config", "path" => &args.config, "error" => e.to_string());
        e
    })?;
    match LogLevel::from_str(&config.log_level) {
        Ok(level) => bgped::log::set_level(level),
        Err(e) => error!("invalid log level in config", "error" => e),
    }

    let speaker_config = config.speaker().clone();
    info!("starting BGP speaker",
        "speaker" => &speaker_config.name,
        "local_id" => speaker_config.local_id.to_string(),
        "local_asn" => speaker_config.local_asn,
        "local_port" => speaker_config.local_port);

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let speaker = Speaker::new(speaker_config);

    // Operator CLI: one command per stdin line, unknown input ignored.
    let stdin_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(command) = Command::parse(&line) {
                let is_exit = command == Command::Exit;
                if cmd_tx.send(command).await.is_err() || is_exit {
                    break;
                }
            }
        }
    });

    let result = speaker.run(cmd_rx).await;
    stdin_task.abort();
    result?;
    Ok(())
}
