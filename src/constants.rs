// Copyright (c) 2024-2026, The SNet Developers
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

// configuration defaults
pub const SNET_DEFAULT_READ_BLOCK_SIZE: usize = 16_384;
pub const SNET_DEFAULT_WRITE_BLOCK_SIZE: usize = 16_384;
pub const SNET_DEFAULT_BACKLOG: i32 = 5;
pub const SNET_DEFAULT_READ_TIMEOUT_SECS: i64 = 60;
pub const SNET_DEFAULT_WRITE_TIMEOUT_SECS: i64 = 60;
pub const SNET_DEFAULT_CONNECT_TIMEOUT_SECS: i64 = 10;
pub const SNET_DEFAULT_HANDSHAKE_TIMEOUT_SECS: i64 = 10;
pub const SNET_DEFAULT_TERMINATE_TIMEOUT_SECS: i64 = 1;

// upper bound for a single multiplexer wait so the loop stays responsive
pub(crate) const SNET_MAX_TICK_WAIT_MILLIS: i64 = 10_000;

// a buffer whose capacity exceeds twice its content is shrunk
pub(crate) const SNET_BUFFER_SHRINK_FACTOR: usize = 2;
