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
use libc::{fd_set, select, timeval, EINTR, FD_ISSET, FD_SET, FD_SETSIZE, FD_ZERO};
use std::collections::HashSet;
use std::mem::zeroed;

/// select(2) backend. Registered and armed sets are kept per direction; each
/// wait copies the armed sets into active fd_sets (select mutates them in
/// place) and scans descriptors up to the highest registered one.
pub(crate) struct SelectMultiplexer {
	registered: [HashSet<Handle>; 2],
	armed: [HashSet<Handle>; 2],
}

fn dir_index(direction: Direction) -> usize {
	match direction {
		Direction::Read => 0,
		Direction::Write => 1,
	}
}

impl SelectMultiplexer {
	pub(crate) fn new() -> Self {
		Self {
			registered: [HashSet::new(), HashSet::new()],
			armed: [HashSet::new(), HashSet::new()],
		}
	}

	fn max_handle(&self) -> Handle {
		let mut max = -1;
		for set in self.registered.iter() {
			for handle in set.iter() {
				if *handle > max {
					max = *handle;
				}
			}
		}
		max
	}

	fn fill(set: &HashSet<Handle>) -> fd_set {
		let mut fds: fd_set = unsafe { zeroed() };
		unsafe {
			FD_ZERO(&mut fds);
			for handle in set.iter() {
				FD_SET(*handle, &mut fds);
			}
		}
		fds
	}
}

impl Multiplexer for SelectMultiplexer {
	fn mux_add(&mut self, handle: Handle, direction: Direction, armed: bool) -> Result<(), Error> {
		if handle as usize >= FD_SETSIZE {
			return Err(err!(
				ErrKind::IO,
				"handle {} exceeds FD_SETSIZE ({})",
				handle,
				FD_SETSIZE
			));
		}
		self.registered[dir_index(direction)].insert(handle);
		if armed {
			self.armed[dir_index(direction)].insert(handle);
		} else {
			self.armed[dir_index(direction)].remove(&handle);
		}
		Ok(())
	}

	fn mux_del(&mut self, handle: Handle, direction: Direction) {
		self.registered[dir_index(direction)].remove(&handle);
		self.armed[dir_index(direction)].remove(&handle);
	}

	fn mux_on(&mut self, handle: Handle, direction: Direction) {
		if self.registered[dir_index(direction)].contains(&handle) {
			self.armed[dir_index(direction)].insert(handle);
		}
	}

	fn mux_off(&mut self, handle: Handle, direction: Direction) {
		self.armed[dir_index(direction)].remove(&handle);
	}

	fn wait(&mut self, timeout: TimeVal, events: &mut Vec<MuxEvent>) -> Result<usize, Error> {
		let mut active_read = Self::fill(&self.armed[0]);
		let mut active_write = Self::fill(&self.armed[1]);
		let max = self.max_handle();
		let mut tv = timeval {
			tv_sec: timeout.secs().clamp(0, 3_600) as libc::time_t,
			tv_usec: timeout.usecs() as libc::suseconds_t,
		};
		let fired = unsafe {
			select(
				max + 1,
				&mut active_read,
				&mut active_write,
				std::ptr::null_mut(),
				&mut tv,
			)
		};
		if fired < 0 {
			let e = errno().0;
			if e == EINTR {
				return Ok(0);
			}
			return Err(err!(ErrKind::IO, "select failed: errno {}", e));
		}
		let mut remaining = fired as usize;
		let mut appended = 0;
		for handle in 0..=max {
			if remaining == 0 {
				break;
			}
			let readable =
				self.armed[0].contains(&handle) && unsafe { FD_ISSET(handle, &active_read) };
			let writable =
				self.armed[1].contains(&handle) && unsafe { FD_ISSET(handle, &active_write) };
			if readable {
				events.push(MuxEvent {
					handle,
					direction: Direction::Read,
				});
				remaining -= 1;
				appended += 1;
			}
			if writable {
				events.push(MuxEvent {
					handle,
					direction: Direction::Write,
				});
				remaining -= 1;
				appended += 1;
			}
		}
		Ok(appended)
	}
}
