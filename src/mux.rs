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

use crate::error::Error;
use crate::event::Direction;
use crate::socket::Handle;
use crate::timeval::TimeVal;

/// One readiness notification reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MuxEvent {
	pub(crate) handle: Handle,
	pub(crate) direction: Direction,
}

/// The system readiness backend to multiplex with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MuxKind {
	/// poll(2). Scales with the number of registered descriptors.
	#[default]
	Poll,
	/// select(2). Limited to descriptors below FD_SETSIZE.
	Select,
}

/// A readiness backend. Registration (`mux_add`/`mux_del`) tracks which
/// descriptors exist per direction; arming (`mux_on`/`mux_off`) controls
/// whether a registered direction is actually waited on. A suspended
/// receiver keeps its registration but is disarmed.
pub(crate) trait Multiplexer {
	fn mux_add(&mut self, handle: Handle, direction: Direction, armed: bool) -> Result<(), Error>;

	fn mux_del(&mut self, handle: Handle, direction: Direction);

	fn mux_on(&mut self, handle: Handle, direction: Direction);

	fn mux_off(&mut self, handle: Handle, direction: Direction);

	/// Block for at most `timeout` and append the fired events to
	/// `events`. Returns the number of events appended. An interrupted
	/// wait reports zero events.
	fn wait(&mut self, timeout: TimeVal, events: &mut Vec<MuxEvent>) -> Result<usize, Error>;
}

pub(crate) fn build_multiplexer(kind: MuxKind) -> Box<dyn Multiplexer> {
	match kind {
		MuxKind::Poll => Box::new(crate::mux_poll::PollMultiplexer::new()),
		MuxKind::Select => Box::new(crate::mux_select::SelectMultiplexer::new()),
	}
}
