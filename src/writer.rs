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

use crate::constants::SNET_BUFFER_SHRINK_FACTOR;
use crate::stream::{Transport, WriteStatus};
use log::warn;

/// The send-side byte engine. A FIFO buffer drained in block-bounded
/// writes; a requested shutdown is staged until the queue is empty.
pub(crate) struct SocketWriter {
	buf: Vec<u8>,
	block_size: usize,
	shutdown_requested: bool,
}

impl SocketWriter {
	pub(crate) fn new(block_size: usize) -> Self {
		Self {
			buf: vec![],
			block_size,
			shutdown_requested: false,
		}
	}

	#[cfg(test)]
	pub(crate) fn len(&self) -> usize {
		self.buf.len()
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.buf.is_empty()
	}

	/// Queue bytes for delivery. Refused once a shutdown has been
	/// requested; returns whether the bytes were accepted.
	pub(crate) fn send(&mut self, data: &[u8]) -> bool {
		if self.shutdown_requested {
			warn!("send of {} bytes after write shutdown, dropped", data.len());
			return false;
		}
		self.buf.extend_from_slice(data);
		true
	}

	/// Write at most one block from the front of the queue.
	pub(crate) fn flush_once(&mut self, transport: &mut dyn Transport) -> WriteStatus {
		let n = self.buf.len().min(self.block_size);
		let status = transport.write(&self.buf[0..n]);
		if let WriteStatus::Written(written) = status {
			self.buf.drain(0..written);
			if self.buf.capacity() > SNET_BUFFER_SHRINK_FACTOR * self.buf.len() {
				self.buf.shrink_to_fit();
			}
		}
		status
	}

	pub(crate) fn request_shutdown(&mut self) {
		self.shutdown_requested = true;
	}

	pub(crate) fn shutdown_requested(&self) -> bool {
		self.shutdown_requested
	}

	pub(crate) fn clear(&mut self) {
		self.buf.clear();
		self.buf.shrink_to_fit();
	}
}
