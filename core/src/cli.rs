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

//! Operator command parsing for the stdin CLI.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Exit,
    ShowFsm,
    ShowDevice,
    ShowRib,
    ShowRibDetail,
}

impl Command {
    /// Parse one input line. Unknown input yields `None`; the caller
    /// ignores it silently.
    pub fn parse(line: &str) -> Option<Command> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["start"] => Some(Command::Start),
            ["stop"] => Some(Command::Stop),
            ["exit"] => Some(Command::Exit),
            ["show", "fsm"] => Some(Command::ShowFsm),
            ["show", "device"] => Some(Command::ShowDevice),
            ["show", "rib"] => Some(Command::ShowRib),
            ["show", "rib", "detail"] => Some(Command::ShowRibDetail),
            _ => None,
        }
    }
}
