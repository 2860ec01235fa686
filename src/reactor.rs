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

use crate::constants::*;
use crate::error::Error;
use crate::event::{Cmd, Direction, EventReceiver, ReactorCtl, ReceiverCore, ReceiverId};
use crate::mux::{build_multiplexer, Multiplexer, MuxEvent, MuxKind};
use crate::publisher::{EventPublisher, Removal};
use crate::timeval::TimeVal;
use log::{debug, trace, warn};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Instant;

struct Slot {
	core: ReceiverCore,
	receiver: Rc<RefCell<dyn EventReceiver>>,
}

/// A single-threaded descriptor-readiness reactor. Owns the multiplexer
/// backend, the registered receivers and the per-direction publishers, and
/// drives everything from [`Reactor::run`]. There is no global instance;
/// construct one and pass it to [`crate::listen`] / [`crate::connect`].
pub struct Reactor {
	mux: Box<dyn Multiplexer>,
	receivers: HashMap<ReceiverId, Slot>,
	read_publisher: EventPublisher,
	write_publisher: EventPublisher,
	pending: Vec<Cmd>,
	stopping: bool,
	terminate_delivered: bool,
}

impl Default for Reactor {
	fn default() -> Self {
		Self::new(MuxKind::default())
	}
}

impl Reactor {
	pub fn new(kind: MuxKind) -> Self {
		Self {
			mux: build_multiplexer(kind),
			receivers: HashMap::new(),
			read_publisher: EventPublisher::default(),
			write_publisher: EventPublisher::default(),
			pending: vec![],
			stopping: false,
			terminate_delivered: false,
		}
	}

	/// Run ticks until the last receiver is gone. [`Reactor::stop`] makes
	/// that happen by asking every receiver to shut down gracefully.
	pub fn run(&mut self) -> Result<(), Error> {
		while !self.receivers.is_empty() || !self.pending.is_empty() {
			self.tick()?;
		}
		debug!("reactor drained, exiting run loop");
		Ok(())
	}

	/// Request shutdown. Every receiver gets a `terminate` at the start of
	/// the next tick; connections begin a graceful close bounded by their
	/// terminate grace window.
	pub fn stop(&mut self) {
		self.stopping = true;
	}

	pub fn is_stopping(&self) -> bool {
		self.stopping
	}

	/// Number of live registrations.
	pub fn receiver_count(&self) -> usize {
		self.receivers.len()
	}

	/// Queue commands outside of a dispatch, e.g. when setting up a
	/// listener before the loop starts.
	pub(crate) fn with_ctl<F: FnOnce(&mut ReactorCtl)>(&mut self, f: F) {
		let mut ctl = ReactorCtl::new(Instant::now());
		f(&mut ctl);
		self.pending.append(&mut ctl.cmds);
	}

	/// One pass of the loop: reconcile queued commands, compute the wait,
	/// block in the multiplexer, dispatch fired and spanning receivers,
	/// then check inactivity deadlines.
	pub fn tick(&mut self) -> Result<(), Error> {
		let now = Instant::now();

		if self.stopping && !self.terminate_delivered {
			self.terminate_delivered = true;
			self.deliver_terminate(now);
		}

		self.reconcile(now)?;

		// fully drained: nothing left to wait on
		if self.receivers.is_empty() && self.pending.is_empty() {
			return Ok(());
		}

		let timeout = self.next_timeout(now);
		let mut events = vec![];
		if let Err(e) = self.mux.wait(timeout, &mut events) {
			warn!("multiplexer wait failed: {}", e);
			events.clear();
		}

		let now = Instant::now();
		let mut ctl = ReactorCtl::new(now);
		let mut dispatched = HashSet::new();

		self.dispatch_fired(&events, &mut ctl, &mut dispatched);
		self.dispatch_spanning(&mut ctl, &mut dispatched);
		self.dispatch_expired(&mut ctl, &dispatched);

		self.pending.append(&mut ctl.cmds);
		Ok(())
	}

	fn deliver_terminate(&mut self, now: Instant) {
		let ids: Vec<ReceiverId> = self
			.receivers
			.iter()
			.filter(|(_, slot)| slot.core.enabled || slot.core.enable_queued)
			.map(|(id, _)| *id)
			.collect();
		let mut ctl = ReactorCtl::new(now);
		for id in ids {
			let receiver = match self.receivers.get(&id) {
				Some(slot) => slot.receiver.clone(),
				None => continue,
			};
			receiver.borrow_mut().terminate(&mut ctl);
		}
		self.pending.append(&mut ctl.cmds);
	}

	fn publisher(&mut self, direction: Direction) -> &mut EventPublisher {
		match direction {
			Direction::Read => &mut self.read_publisher,
			Direction::Write => &mut self.write_publisher,
		}
	}

	fn publisher_ref(&self, direction: Direction) -> &EventPublisher {
		match direction {
			Direction::Read => &self.read_publisher,
			Direction::Write => &self.write_publisher,
		}
	}

	/// Apply queued commands, then move newly enabled receivers into the
	/// observed lists, release disabled ones, and destroy receivers no
	/// publisher observes any more. Order matters: enables run before
	/// disables so a descriptor handed from one receiver to another is
	/// never unregistered in between.
	fn reconcile(&mut self, now: Instant) -> Result<(), Error> {
		let cmds = std::mem::take(&mut self.pending);
		for cmd in cmds {
			self.apply(cmd, now);
		}

		// enables
		let enable_ids: Vec<ReceiverId> = self
			.receivers
			.iter()
			.filter(|(_, slot)| slot.core.enable_queued)
			.map(|(id, _)| *id)
			.collect();
		for id in enable_ids {
			let (handle, direction, suspended) = {
				let slot = match self.receivers.get_mut(&id) {
					Some(slot) => slot,
					None => continue,
				};
				slot.core.enable_queued = false;
				slot.core.enabled = true;
				slot.core.observations += 1;
				slot.core.last_triggered = now;
				(slot.core.handle, slot.core.direction, slot.core.suspended)
			};
			self.publisher(direction).add(handle, id);
			// the new front's suspension decides the arming bit
			self.mux.mux_add(handle, direction, !suspended)?;
			trace!("enabled {} on handle {} ({:?})", id, handle, direction);
		}

		// disables
		let disable_ids: Vec<ReceiverId> = self
			.receivers
			.iter()
			.filter(|(_, slot)| slot.core.disable_queued)
			.map(|(id, _)| *id)
			.collect();
		for id in disable_ids {
			let (handle, direction) = {
				let slot = match self.receivers.get_mut(&id) {
					Some(slot) => slot,
					None => continue,
				};
				slot.core.disable_queued = false;
				slot.core.enabled = false;
				slot.core.observations = slot.core.observations.saturating_sub(1);
				(slot.core.handle, slot.core.direction)
			};
			match self.publisher(direction).remove(handle, id) {
				Removal::Empty => self.mux.mux_del(handle, direction),
				Removal::Remaining {
					new_front,
					front_changed,
				} => {
					// the successor starts a fresh inactivity window
					if front_changed {
						if let Some(front) = self.receivers.get_mut(&new_front) {
							front.core.last_triggered = now;
							if front.core.suspended {
								self.mux.mux_off(handle, direction);
							} else {
								self.mux.mux_on(handle, direction);
							}
						}
					}
				}
				Removal::NotFound => {
					warn!("disabled receiver {} was not observed on handle {}", id, handle)
				}
			}
			trace!("disabled {} on handle {} ({:?})", id, handle, direction);
		}

		// destruction: nothing observes these any more
		let unobserved_ids: Vec<ReceiverId> = self
			.receivers
			.iter()
			.filter(|(_, slot)| {
				!slot.core.enabled
					&& !slot.core.enable_queued
					&& !slot.core.disable_queued
					&& slot.core.observations == 0
			})
			.map(|(id, _)| *id)
			.collect();
		let mut ctl = ReactorCtl::new(now);
		for id in unobserved_ids {
			if let Some(slot) = self.receivers.remove(&id) {
				trace!("destroying unobserved receiver {} ({})", id, slot.core.name);
				slot.receiver.borrow_mut().unobserved(&mut ctl);
			}
		}
		self.pending.append(&mut ctl.cmds);

		Ok(())
	}

	fn apply(&mut self, cmd: Cmd, now: Instant) {
		match cmd {
			Cmd::Register {
				id,
				handle,
				direction,
				name,
				max_inactivity,
				suspended,
				receiver,
			} => {
				if self.receivers.contains_key(&id) {
					warn!("duplicate registration for receiver {}", id);
					return;
				}
				self.receivers.insert(
					id,
					Slot {
						core: ReceiverCore {
							handle,
							direction,
							name,
							enabled: false,
							suspended,
							enable_queued: true,
							disable_queued: false,
							observations: 0,
							max_inactivity,
							last_triggered: now,
						},
						receiver,
					},
				);
			}
			Cmd::Enable(id) => match self.receivers.get_mut(&id) {
				Some(slot) => {
					if slot.core.disable_queued {
						// same-tick disable then enable cancels out
						slot.core.disable_queued = false;
					} else if slot.core.enabled || slot.core.enable_queued {
						warn!("receiver {} ({}) already enabled", id, slot.core.name);
					} else {
						slot.core.enable_queued = true;
					}
				}
				None => warn!("enable for unknown receiver {}", id),
			},
			Cmd::Disable(id) => match self.receivers.get_mut(&id) {
				Some(slot) => {
					if slot.core.enable_queued {
						// same-tick enable then disable: never observed
						slot.core.enable_queued = false;
					} else if slot.core.enabled && !slot.core.disable_queued {
						slot.core.disable_queued = true;
					} else {
						warn!("receiver {} ({}) already disabled", id, slot.core.name);
					}
				}
				None => warn!("disable for unknown receiver {}", id),
			},
			Cmd::Suspend(id) => {
				let state = match self.receivers.get_mut(&id) {
					Some(slot) => {
						if slot.core.suspended {
							warn!("receiver {} ({}) already suspended", id, slot.core.name);
							return;
						}
						slot.core.suspended = true;
						(slot.core.handle, slot.core.direction, slot.core.enabled)
					}
					None => {
						warn!("suspend for unknown receiver {}", id);
						return;
					}
				};
				if state.2 && self.publisher_ref(state.1).is_front(state.0, id) {
					self.mux.mux_off(state.0, state.1);
				}
			}
			Cmd::Resume(id) => {
				let state = match self.receivers.get_mut(&id) {
					Some(slot) => {
						if !slot.core.suspended {
							warn!("receiver {} ({}) not suspended", id, slot.core.name);
							return;
						}
						slot.core.suspended = false;
						(slot.core.handle, slot.core.direction, slot.core.enabled)
					}
					None => {
						warn!("resume for unknown receiver {}", id);
						return;
					}
				};
				if state.2 && self.publisher_ref(state.1).is_front(state.0, id) {
					self.mux.mux_on(state.0, state.1);
				}
			}
			Cmd::SetTimeout(id, max_inactivity) => match self.receivers.get_mut(&id) {
				Some(slot) => {
					slot.core.max_inactivity = max_inactivity;
					slot.core.last_triggered = now;
				}
				None => warn!("set_timeout for unknown receiver {}", id),
			},
		}
	}

	/// Zero while anything is queued or any enabled receiver can continue
	/// without readiness; otherwise the nearest front-receiver deadline,
	/// capped so the loop revisits state periodically.
	fn next_timeout(&self, now: Instant) -> TimeVal {
		if !self.pending.is_empty() {
			return TimeVal::ZERO;
		}
		let mut min = TimeVal::from_millis(SNET_MAX_TICK_WAIT_MILLIS);
		for publisher in [&self.read_publisher, &self.write_publisher] {
			for (_, id) in publisher.fronts() {
				if let Some(slot) = self.receivers.get(&id) {
					if slot.core.enabled {
						let wait = slot.core.deadline_wait(now);
						if wait < min {
							min = wait;
						}
					}
				}
			}
		}
		for slot in self.receivers.values() {
			if slot.core.enabled && slot.receiver.borrow().continue_immediately() {
				return TimeVal::ZERO;
			}
		}
		if min.is_negative() {
			TimeVal::ZERO
		} else {
			min
		}
	}

	fn dispatch_fired(
		&mut self,
		events: &[MuxEvent],
		ctl: &mut ReactorCtl,
		dispatched: &mut HashSet<ReceiverId>,
	) {
		for event in events {
			let id = match self.publisher_ref(event.direction).front(event.handle) {
				Some(id) => id,
				None => continue,
			};
			let receiver = match self.receivers.get(&id) {
				Some(slot)
					if slot.core.enabled
						&& !slot.core.suspended && !dispatched.contains(&id) =>
				{
					slot.receiver.clone()
				}
				_ => continue,
			};
			trace!("dispatch handle {} ({:?}) -> {}", event.handle, event.direction, id);
			receiver.borrow_mut().dispatch(ctl);
			dispatched.insert(id);
			if let Some(slot) = self.receivers.get_mut(&id) {
				slot.core.last_triggered = ctl.now();
			}
		}
	}

	/// Receivers that can make progress without readiness get one dispatch
	/// per tick, whether or not they are suspended; suspension only
	/// controls the arming bit in the multiplexer.
	fn dispatch_spanning(&mut self, ctl: &mut ReactorCtl, dispatched: &mut HashSet<ReceiverId>) {
		let ids: Vec<ReceiverId> = self
			.receivers
			.iter()
			.filter(|(id, slot)| {
				slot.core.enabled
					&& !dispatched.contains(id)
					&& slot.receiver.borrow().continue_immediately()
			})
			.map(|(id, _)| *id)
			.collect();
		for id in ids {
			let receiver = match self.receivers.get(&id) {
				Some(slot) => slot.receiver.clone(),
				None => continue,
			};
			trace!("span dispatch -> {}", id);
			receiver.borrow_mut().dispatch(ctl);
			dispatched.insert(id);
			if let Some(slot) = self.receivers.get_mut(&id) {
				slot.core.last_triggered = ctl.now();
			}
		}
	}

	fn dispatch_expired(&mut self, ctl: &mut ReactorCtl, dispatched: &HashSet<ReceiverId>) {
		let now = ctl.now();
		let mut expired = vec![];
		for publisher in [&self.read_publisher, &self.write_publisher] {
			for (_, id) in publisher.fronts() {
				if dispatched.contains(&id) {
					continue;
				}
				if let Some(slot) = self.receivers.get(&id) {
					if slot.core.enabled && slot.core.expired(now) {
						expired.push(id);
					}
				}
			}
		}
		for id in expired {
			let receiver = match self.receivers.get(&id) {
				Some(slot) => slot.receiver.clone(),
				None => continue,
			};
			debug!("inactivity deadline expired for {}", id);
			receiver.borrow_mut().dispatch_timeout(ctl);
			if let Some(slot) = self.receivers.get_mut(&id) {
				slot.core.last_triggered = now;
			}
		}
	}
}

#[cfg(test)]
pub(crate) mod test_util {
	use super::*;

	impl Reactor {
		pub(crate) fn receiver_enabled(&self, id: ReceiverId) -> bool {
			self.receivers.get(&id).map(|s| s.core.enabled).unwrap_or(false)
		}

		pub(crate) fn receiver_known(&self, id: ReceiverId) -> bool {
			self.receivers.contains_key(&id)
		}

		pub(crate) fn next_timeout_for_test(&self, now: Instant) -> TimeVal {
			self.next_timeout(now)
		}
	}
}
