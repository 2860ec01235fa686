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

use crate::error::{ErrKind, Error};
use crate::err;
use crate::event::Direction;
use crate::mux::{Multiplexer, MuxEvent};
use crate::socket::Handle;
use crate::timeval::TimeVal;
use errno::errno;
use libc::{c_int, nfds_t, poll, pollfd, EINTR, POLLERR, POLLHUP, POLLIN, POLLOUT};
use std::collections::HashMap;

/// poll(2) backend. A dense pollfd array plus a descriptor index for O(1)
/// arming updates; deletion swap-removes and fixes the moved index.
pub(crate) struct PollMultiplexer {
	fds: Vec<pollfd>,
	/// registered directions per slot, parallel to `fds`
	registered: Vec<(bool, bool)>,
	index: HashMap<Handle, usize>,
}

fn bit(direction: Direction) -> i16 {
	match direction {
		Direction::Read => POLLIN,
		Direction::Write => POLLOUT,
	}
}

impl PollMultiplexer {
	pub(crate) fn new() -> Self {
		Self {
			fds: vec![],
			registered: vec![],
			index: HashMap::new(),
		}
	}

	fn slot(&mut self, handle: Handle) -> usize {
		match self.index.get(&handle) {
			Some(slot) => *slot,
			None => {
				let slot = self.fds.len();
				self.fds.push(pollfd {
					fd: handle,
					events: 0,
					revents: 0,
				});
				self.registered.push((false, false));
				self.index.insert(handle, slot);
				slot
			}
		}
	}
}

impl Multiplexer for PollMultiplexer {
	fn mux_add(&mut self, handle: Handle, direction: Direction, armed: bool) -> Result<(), Error> {
		let slot = self.slot(handle);
		match direction {
			Direction::Read => self.registered[slot].0 = true,
			Direction::Write => self.registered[slot].1 = true,
		}
		if armed {
			self.fds[slot].events |= bit(direction);
		} else {
			self.fds[slot].events &= !bit(direction);
		}
		Ok(())
	}

	fn mux_del(&mut self, handle: Handle, direction: Direction) {
		let slot = match self.index.get(&handle) {
			Some(slot) => *slot,
			None => return,
		};
		match direction {
			Direction::Read => self.registered[slot].0 = false,
			Direction::Write => self.registered[slot].1 = false,
		}
		self.fds[slot].events &= !bit(direction);
		if self.registered[slot] == (false, false) {
			self.fds.swap_remove(slot);
			self.registered.swap_remove(slot);
			self.index.remove(&handle);
			if slot < self.fds.len() {
				self.index.insert(self.fds[slot].fd, slot);
			}
		}
	}

	fn mux_on(&mut self, handle: Handle, direction: Direction) {
		if let Some(slot) = self.index.get(&handle) {
			self.fds[*slot].events |= bit(direction);
		}
	}

	fn mux_off(&mut self, handle: Handle, direction: Direction) {
		if let Some(slot) = self.index.get(&handle) {
			self.fds[*slot].events &= !bit(direction);
		}
	}

	fn wait(&mut self, timeout: TimeVal, events: &mut Vec<MuxEvent>) -> Result<usize, Error> {
		let millis = timeout.as_wait_millis().min(i32::MAX as i64) as c_int;
		let fired =
			unsafe { poll(self.fds.as_mut_ptr(), self.fds.len() as nfds_t, millis) };
		if fired < 0 {
			let e = errno().0;
			if e == EINTR {
				return Ok(0);
			}
			return Err(err!(ErrKind::IO, "poll failed: errno {}", e));
		}
		let mut remaining = fired as usize;
		let mut appended = 0;
		for pfd in self.fds.iter_mut() {
			if remaining == 0 {
				break;
			}
			if pfd.revents == 0 {
				continue;
			}
			remaining -= 1;
			// error and hangup conditions wake whichever directions are armed
			if pfd.events & POLLIN != 0 && pfd.revents & (POLLIN | POLLHUP | POLLERR) != 0 {
				events.push(MuxEvent {
					handle: pfd.fd,
					direction: Direction::Read,
				});
				appended += 1;
			}
			if pfd.events & POLLOUT != 0 && pfd.revents & (POLLOUT | POLLHUP | POLLERR) != 0 {
				events.push(MuxEvent {
					handle: pfd.fd,
					direction: Direction::Write,
				});
				appended += 1;
			}
			pfd.revents = 0;
		}
		Ok(appended)
	}
}
