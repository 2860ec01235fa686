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

use crate::event::ReceiverId;
use crate::socket::Handle;
use std::collections::{HashMap, VecDeque};

/// Ordered receiver lists per descriptor for one readiness direction. Only
/// the front receiver of a descriptor's list is armed with the multiplexer
/// and dispatched; the others wait until the front is disabled. A newly
/// enabled receiver goes to the front, which is how a handshake receiver
/// hands a descriptor over to a connection receiver without a gap.
#[derive(Default)]
pub(crate) struct EventPublisher {
	observed: HashMap<Handle, VecDeque<ReceiverId>>,
}

pub(crate) enum Removal {
	NotFound,
	/// The descriptor still has receivers; `new_front` leads now.
	Remaining {
		new_front: ReceiverId,
		front_changed: bool,
	},
	/// The descriptor has no receivers left.
	Empty,
}

impl EventPublisher {
	pub(crate) fn add(&mut self, handle: Handle, id: ReceiverId) -> bool {
		let list = self.observed.entry(handle).or_default();
		let was_empty = list.is_empty();
		list.push_front(id);
		was_empty
	}

	pub(crate) fn remove(&mut self, handle: Handle, id: ReceiverId) -> Removal {
		let list = match self.observed.get_mut(&handle) {
			Some(list) => list,
			None => return Removal::NotFound,
		};
		let pos = match list.iter().position(|other| *other == id) {
			Some(pos) => pos,
			None => return Removal::NotFound,
		};
		list.remove(pos);
		match list.front() {
			Some(front) => Removal::Remaining {
				new_front: *front,
				front_changed: pos == 0,
			},
			None => {
				self.observed.remove(&handle);
				Removal::Empty
			}
		}
	}

	pub(crate) fn front(&self, handle: Handle) -> Option<ReceiverId> {
		self.observed.get(&handle).and_then(|list| list.front()).copied()
	}

	pub(crate) fn is_front(&self, handle: Handle, id: ReceiverId) -> bool {
		self.front(handle) == Some(id)
	}

	pub(crate) fn fronts(&self) -> impl Iterator<Item = (Handle, ReceiverId)> + '_ {
		self.observed
			.iter()
			.filter_map(|(handle, list)| list.front().map(|id| (*handle, *id)))
	}

	#[cfg(test)]
	pub(crate) fn contains(&self, handle: Handle) -> bool {
		self.observed.contains_key(&handle)
	}
}
