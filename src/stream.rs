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

use crate::socket::{
	close_fd, read_fd, shutdown_fd, would_block, write_fd, Handle, ShutdownHow,
};

/// Outcome of one transport read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadStatus {
	/// `n` bytes were placed in the buffer.
	Data(usize),
	/// Nothing available; wait for readiness.
	WouldBlock,
	/// End of stream. For tls this is a raw FIN without close_notify.
	Eof,
	/// The peer shut down the tls layer with a close_notify alert.
	CloseNotify,
	/// A hard error, by errno.
	Err(i32),
}

/// Outcome of one transport write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteStatus {
	Written(usize),
	WouldBlock,
	Err(i32),
}

/// Outcome of one step of a staged write-side shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownStep {
	/// Shutdown complete; the errno of the final half-close (0 = clean).
	Done(i32),
	/// Pending records need the socket to become writable again.
	NeedWrite,
	Err(i32),
}

/// The seam between the byte engines and the wire. The plain variant maps
/// straight to socket syscalls; the tls variant runs the record layer in
/// between and uses the direction hints to get the opposite side re-armed
/// when the protocol needs it.
pub(crate) trait Transport {
	fn read(&mut self, buf: &mut [u8]) -> ReadStatus;

	fn write(&mut self, buf: &[u8]) -> WriteStatus;

	/// Flush protocol data that is pending independent of application
	/// writes. A no-op for plain sockets.
	fn flush(&mut self) -> WriteStatus {
		WriteStatus::Written(0)
	}

	/// One step of the write-side shutdown sequence. Called repeatedly
	/// until it stops returning `NeedWrite`.
	fn shutdown_write_step(&mut self) -> ShutdownStep;

	fn shutdown_read(&mut self);

	/// The protocol needs the socket readable to make write progress.
	fn wants_read(&self) -> bool {
		false
	}

	/// Whether a received close_notify counts as end of stream for the
	/// context. Plain sockets never see one.
	fn close_notify_is_eof(&self) -> bool {
		true
	}

	/// Plaintext is buffered inside the protocol layer and readable
	/// without socket readiness.
	fn has_buffered_input(&self) -> bool {
		false
	}

	/// The protocol has pending records to flush to the socket.
	fn wants_write(&self) -> bool {
		false
	}

	fn handle(&self) -> Handle;

	fn close(&mut self);
}

/// A raw non-blocking stream socket.
pub(crate) struct PlainTransport {
	handle: Handle,
	closed: bool,
}

impl PlainTransport {
	pub(crate) fn new(handle: Handle) -> Self {
		Self {
			handle,
			closed: false,
		}
	}
}

impl Transport for PlainTransport {
	fn read(&mut self, buf: &mut [u8]) -> ReadStatus {
		match read_fd(self.handle, buf) {
			Ok(0) => ReadStatus::Eof,
			Ok(n) => ReadStatus::Data(n),
			Err(e) if would_block(e) => ReadStatus::WouldBlock,
			Err(e) => ReadStatus::Err(e),
		}
	}

	fn write(&mut self, buf: &[u8]) -> WriteStatus {
		match write_fd(self.handle, buf) {
			Ok(n) => WriteStatus::Written(n),
			Err(e) if would_block(e) => WriteStatus::WouldBlock,
			Err(e) => WriteStatus::Err(e),
		}
	}

	fn shutdown_write_step(&mut self) -> ShutdownStep {
		ShutdownStep::Done(shutdown_fd(self.handle, ShutdownHow::Write))
	}

	fn shutdown_read(&mut self) {
		shutdown_fd(self.handle, ShutdownHow::Read);
	}

	fn handle(&self) -> Handle {
		self.handle
	}

	fn close(&mut self) {
		if !self.closed {
			self.closed = true;
			close_fd(self.handle);
		}
	}
}
