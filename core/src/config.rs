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

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;

/// Top-level configuration: a set of speaker profiles plus a selector
/// naming the profile this process runs as.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Name of the speaker profile to run. Defaults to the first profile.
    #[serde(default)]
    pub speaker: Option<String>,
    pub speakers: Vec<SpeakerConfig>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SpeakerConfig {
    pub name: String,
    pub local_id: Ipv4Addr,
    pub local_asn: u32,
    #[serde(default = "default_local_port")]
    pub local_port: u16,
    pub neighbors: Vec<NeighborConfig>,
    #[serde(default = "default_connect_retry_time")]
    pub connect_retry_secs: u16,
    #[serde(default = "default_hold_time")]
    pub hold_time_secs: u16,
    #[serde(default = "default_keepalive_time")]
    pub keepalive_secs: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NeighborConfig {
    pub remote_id: Ipv4Addr,
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_local_port() -> u16 {
    179
}

fn default_remote_port() -> u16 {
    179
}

fn default_connect_retry_time() -> u16 {
    30
}

fn default_hold_time() -> u16 {
    45
}

fn default_keepalive_time() -> u16 {
    15
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.speakers.is_empty() {
            return Err("no speaker profiles configured".to_string());
        }
        if let Some(name) = &self.speaker {
            if !self.speakers.iter().any(|s| &s.name == name) {
                return Err(format!("speaker profile not found: {}", name));
            }
        }
        for speaker in &self.speakers {
            // OPEN carries a 2-octet ASN and no 4-byte-ASN capability is
            // negotiated; a wider value would wrap on the wire.
            if speaker.local_asn > u16::MAX as u32 {
                return Err(format!(
                    "speaker {}: local_asn {} does not fit the 2-octet OPEN field",
                    speaker.name, speaker.local_asn
                ));
            }
            if speaker.hold_time_secs > 0
                && speaker.keepalive_secs > speaker.hold_time_secs / 3
            {
                return Err(format!(
                    "speaker {}: keepalive_secs must be at most one third of hold_time_secs",
                    speaker.name
                ));
            }
            if (speaker.hold_time_secs == 0) != (speaker.keepalive_secs == 0) {
                return Err(format!(
                    "speaker {}: hold_time_secs and keepalive_secs must be disabled together",
                    speaker.name
                ));
            }
        }
        Ok(())
    }

    /// Resolve the selected speaker profile.
    pub fn speaker(&self) -> &SpeakerConfig {
        match &self.speaker {
            Some(name) => self
                .speakers
                .iter()
                .find(|s| &s.name == name)
                .expect("validated at load time"),
            None => &self.speakers[0],
        }
    }
}

impl SpeakerConfig {
    pub fn new(name: &str, local_id: Ipv4Addr, local_asn: u32, local_port: u16) -> Self {
        SpeakerConfig {
            name: name.to_string(),
            local_id,
            local_asn,
            local_port,
            neighbors: Vec::new(),
            connect_retry_secs: default_connect_retry_time(),
            hold_time_secs: default_hold_time(),
            keepalive_secs: default_keepalive_time(),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_yaml(name: &str, content: &str) -> String {
        let temp_file = std::env::temp_dir().join(name);
        let mut file = std::fs::File::create(&temp_file).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        temp_file.to_str().unwrap().to_string()
    }

    const BASIC_CONFIG: &str = "\
speakers:
  - name: r1
    local_id: \"2.2.2.2\"
    local_asn: 65002
    neighbors:
      - remote_id: \"1.1.1.1\"
";

    #[test]
    fn test_config_from_file() {
        let temp_file = write_temp_yaml("bgped_test_config.yaml", BASIC_CONFIG);

        let config = Config::from_file(&temp_file).unwrap();
        let speaker = config.speaker();
        assert_eq!(speaker.name, "r1");
        assert_eq!(speaker.local_id, Ipv4Addr::new(2, 2, 2, 2));
        assert_eq!(speaker.local_asn, 65002);
        assert_eq!(speaker.local_port, 179);
        assert_eq!(speaker.connect_retry_secs, 30);
        assert_eq!(speaker.hold_time_secs, 45);
        assert_eq!(speaker.keepalive_secs, 15);
        assert_eq!(speaker.neighbors.len(), 1);
        assert_eq!(speaker.neighbors[0].remote_id, Ipv4Addr::new(1, 1, 1, 1));
        assert_eq!(speaker.neighbors[0].remote_port, 179);

        std::fs::remove_file(temp_file).unwrap();
    }

    #[test]
    fn test_config_speaker_selector() {
        let content = "\
speaker: r2
speakers:
  - name: r1
    local_id: \"1.1.1.1\"
    local_asn: 65001
    neighbors: []
  - name: r2
    local_id: \"2.2.2.2\"
    local_asn: 65002
    local_port: 1790
    neighbors: []
";
        let temp_file = write_temp_yaml("bgped_test_config_selector.yaml", content);

        let config = Config::from_file(&temp_file).unwrap();
        let speaker = config.speaker();
        assert_eq!(speaker.name, "r2");
        assert_eq!(speaker.local_port, 1790);

        std::fs::remove_file(temp_file).unwrap();
    }

    #[test]
    fn test_config_unknown_speaker() {
        let content = format!("speaker: r9\n{}", BASIC_CONFIG);
        let temp_file = write_temp_yaml("bgped_test_config_unknown.yaml", &content);

        assert!(Config::from_file(&temp_file).is_err());

        std::fs::remove_file(temp_file).unwrap();
    }

    #[test]
    fn test_config_rejects_bad_keepalive() {
        let content = "\
speakers:
  - name: r1
    local_id: \"2.2.2.2\"
    local_asn: 65002
    keepalive_secs: 40
    neighbors: []
";
        let temp_file = write_temp_yaml("bgped_test_config_keepalive.yaml", content);

        assert!(Config::from_file(&temp_file).is_err());

        std::fs::remove_file(temp_file).unwrap();
    }

    #[test]
    fn test_config_rejects_wide_asn() {
        let content = "\
speakers:
  - name: r1
    local_id: \"2.2.2.2\"
    local_asn: 4200000000
    neighbors: []
";
        let temp_file = write_temp_yaml("bgped_test_config_asn.yaml", content);

        assert!(Config::from_file(&temp_file).is_err());

        std::fs::remove_file(temp_file).unwrap();
    }

    #[test]
    fn test_config_from_file_not_found() {
        let result = Config::from_file("/nonexistent/path.yaml");
        assert!(result.is_err());
    }
}
