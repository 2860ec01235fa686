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
use crate::stream::{ReadStatus, Transport};

/// The receive-side byte engine. At most one block-bounded physical read
/// per fill, and never while unconsumed bytes remain; that is what turns
/// a slow consumer into backpressure on the peer.
pub(crate) struct SocketReader {
	buf: Vec<u8>,
	cursor: usize,
	block_size: usize,
}

impl SocketReader {
	pub(crate) fn new(block_size: usize) -> Self {
		Self {
			buf: vec![],
			cursor: 0,
			block_size,
		}
	}

	pub(crate) fn available(&self) -> usize {
		self.buf.len() - self.cursor
	}

	/// One physical read of at most one block, appended to the buffer.
	pub(crate) fn fill(&mut self, transport: &mut dyn Transport) -> ReadStatus {
		let old = self.buf.len();
		self.buf.resize(old + self.block_size, 0);
		let status = transport.read(&mut self.buf[old..]);
		match status {
			ReadStatus::Data(n) => self.buf.truncate(old + n),
			_ => self.buf.truncate(old),
		}
		status
	}

	/// Copy buffered bytes into `dst`, advancing the cursor. Returns the
	/// number copied. The buffer is reset and, when oversized, shrunk once
	/// everything is consumed.
	pub(crate) fn read(&mut self, dst: &mut [u8]) -> usize {
		let n = dst.len().min(self.available());
		dst[0..n].copy_from_slice(&self.buf[self.cursor..self.cursor + n]);
		self.cursor += n;
		if self.cursor == self.buf.len() {
			self.buf.clear();
			self.cursor = 0;
			if self.buf.capacity() > SNET_BUFFER_SHRINK_FACTOR * self.block_size {
				self.buf.shrink_to(self.block_size);
			}
		}
		n
	}

	pub(crate) fn clear(&mut self) {
		self.buf.clear();
		self.cursor = 0;
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::socket::{close_fd, pipe_pair, write_fd};
	use crate::stream::PlainTransport;
	use crate::{err, ErrKind, Error};

	#[test]
	fn test_block_bounded_fill_and_drain() -> Result<(), Error> {
		let (rd, wr) = pipe_pair()?;
		let mut transport = PlainTransport::new(rd);
		let mut reader = SocketReader::new(4);

		write_fd(wr, b"abcdefgh").map_err(|e| err!(ErrKind::IO, "write errno {}", e))?;

		// one fill reads at most one block
		assert_eq!(reader.fill(&mut transport), ReadStatus::Data(4));
		assert_eq!(reader.available(), 4);

		let mut dst = [0u8; 2];
		assert_eq!(reader.read(&mut dst), 2);
		assert_eq!(&dst, b"ab");
		assert_eq!(reader.available(), 2);

		// remaining bytes drain in order, then the next block follows
		let mut dst = [0u8; 8];
		assert_eq!(reader.read(&mut dst), 2);
		assert_eq!(&dst[0..2], b"cd");
		assert_eq!(reader.fill(&mut transport), ReadStatus::Data(4));
		assert_eq!(reader.read(&mut dst), 4);
		assert_eq!(&dst[0..4], b"efgh");

		assert_eq!(reader.fill(&mut transport), ReadStatus::WouldBlock);

		close_fd(wr);
		assert_eq!(reader.fill(&mut transport), ReadStatus::Eof);
		transport.close();
		Ok(())
	}

	#[test]
	fn test_shrink_after_full_drain() -> Result<(), Error> {
		let (rd, wr) = pipe_pair()?;
		let mut transport = PlainTransport::new(rd);
		let mut reader = SocketReader::new(8);

		for _ in 0..8 {
			write_fd(wr, b"01234567").map_err(|e| err!(ErrKind::IO, "write errno {}", e))?;
			reader.fill(&mut transport);
		}
		assert_eq!(reader.available(), 64);

		let mut dst = [0u8; 64];
		assert_eq!(reader.read(&mut dst), 64);
		assert_eq!(reader.available(), 0);
		assert!(reader.buf.capacity() <= SNET_BUFFER_SHRINK_FACTOR * reader.block_size);

		close_fd(wr);
		transport.close();
		Ok(())
	}
}
