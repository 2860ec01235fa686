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

use crate::socket::Handle;
use crate::timeval::TimeVal;
use rand::random;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

/// The readiness direction a receiver is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
	Read,
	Write,
}

/// Stable identity of one registration (a descriptor in one direction).
/// Random so ids are never reused for the lifetime of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiverId(u128);

impl ReceiverId {
	pub(crate) fn generate() -> Self {
		ReceiverId(random())
	}
}

impl std::fmt::Display for ReceiverId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:032x}", self.0)
	}
}

/// A state machine driven by descriptor readiness. Implementations never
/// mutate the reactor directly from a callback; they queue commands on the
/// supplied [`ReactorCtl`], which the reactor applies at the next
/// reconciliation point.
pub trait EventReceiver {
	/// The registered direction became ready, or a span pass scheduled this
	/// receiver because [`EventReceiver::continue_immediately`] held.
	fn dispatch(&mut self, ctl: &mut ReactorCtl);

	/// The inactivity deadline expired before any readiness arrived.
	fn dispatch_timeout(&mut self, ctl: &mut ReactorCtl);

	/// True when this receiver has work it can make progress on without a
	/// fresh readiness notification. While any enabled receiver reports
	/// true the reactor does not block.
	fn continue_immediately(&self) -> bool {
		false
	}

	/// The reactor is shutting down. Begin a graceful close.
	fn terminate(&mut self, ctl: &mut ReactorCtl);

	/// No publisher observes this receiver any more. Fired exactly once;
	/// the registration is removed afterwards. Last chance to release the
	/// descriptor and any shared state.
	fn unobserved(&mut self, ctl: &mut ReactorCtl) {
		let _ = ctl;
	}

	/// Diagnostic name used in log output.
	fn name(&self) -> &str {
		"receiver"
	}
}

/// Per-registration bookkeeping owned by the reactor.
#[derive(Debug)]
pub(crate) struct ReceiverCore {
	pub(crate) handle: Handle,
	pub(crate) direction: Direction,
	pub(crate) name: String,
	/// currently in a publisher's observed list
	pub(crate) enabled: bool,
	/// registered with the multiplexer but not armed
	pub(crate) suspended: bool,
	pub(crate) enable_queued: bool,
	pub(crate) disable_queued: bool,
	/// publishers currently observing this receiver
	pub(crate) observations: u32,
	/// None disables inactivity tracking
	pub(crate) max_inactivity: Option<TimeVal>,
	pub(crate) last_triggered: Instant,
}

impl ReceiverCore {
	pub(crate) fn deadline_wait(&self, now: Instant) -> TimeVal {
		match self.max_inactivity {
			Some(max) => {
				let elapsed: TimeVal = now.duration_since(self.last_triggered).into();
				max - elapsed
			}
			None => TimeVal::MAX,
		}
	}

	pub(crate) fn expired(&self, now: Instant) -> bool {
		match self.max_inactivity {
			Some(max) => TimeVal::from(now.duration_since(self.last_triggered)) >= max,
			None => false,
		}
	}
}

/// A shared, reference counted receiver implementation.
pub type ReceiverRef = Rc<RefCell<dyn EventReceiver>>;

#[derive(Clone)]
pub(crate) enum Cmd {
	Register {
		id: ReceiverId,
		handle: Handle,
		direction: Direction,
		name: String,
		max_inactivity: Option<TimeVal>,
		suspended: bool,
		receiver: ReceiverRef,
	},
	Enable(ReceiverId),
	Disable(ReceiverId),
	Suspend(ReceiverId),
	Resume(ReceiverId),
	SetTimeout(ReceiverId, Option<TimeVal>),
}

/// Command collector handed to every receiver callback. Commands take
/// effect at the next reconciliation, so an enable immediately followed by
/// a disable in the same tick cancels out before the receiver is ever
/// observed.
pub struct ReactorCtl {
	pub(crate) cmds: Vec<Cmd>,
	pub(crate) now: Instant,
}

impl ReactorCtl {
	pub(crate) fn new(now: Instant) -> Self {
		Self { cmds: vec![], now }
	}

	/// The instant this tick started. Used instead of repeated clock reads
	/// so every decision in a tick sees the same time.
	pub fn now(&self) -> Instant {
		self.now
	}

	/// Queue a new registration. The receiver becomes observed at the next
	/// reconciliation. `suspended` registrations are tracked but not armed
	/// with the multiplexer until resumed.
	pub fn register(
		&mut self,
		id: ReceiverId,
		handle: Handle,
		direction: Direction,
		name: &str,
		max_inactivity: Option<TimeVal>,
		suspended: bool,
		receiver: ReceiverRef,
	) {
		self.cmds.push(Cmd::Register {
			id,
			handle,
			direction,
			name: name.to_string(),
			max_inactivity,
			suspended,
			receiver,
		});
	}

	pub fn enable(&mut self, id: ReceiverId) {
		self.cmds.push(Cmd::Enable(id));
	}

	pub fn disable(&mut self, id: ReceiverId) {
		self.cmds.push(Cmd::Disable(id));
	}

	pub fn suspend(&mut self, id: ReceiverId) {
		self.cmds.push(Cmd::Suspend(id));
	}

	pub fn resume(&mut self, id: ReceiverId) {
		self.cmds.push(Cmd::Resume(id));
	}

	pub fn set_timeout(&mut self, id: ReceiverId, max_inactivity: Option<TimeVal>) {
		self.cmds.push(Cmd::SetTimeout(id, max_inactivity));
	}
}
