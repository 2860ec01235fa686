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

use crate::connection::{establish, ConnTuning, DisconnectCallback};
use crate::context::{SocketContextFactory, SocketState, StatusCallback};
use crate::event::{Direction, EventReceiver, ReactorCtl, ReceiverId};
use crate::socket::SocketAddress;
use crate::stream::{ReadStatus, Transport, WriteStatus};
use crate::timeval::TimeVal;
use crate::tls::TlsTransport;
use log::{debug, warn};
use std::cell::RefCell;
use std::rc::Rc;

/// Everything needed to turn a finished handshake into a live connection,
/// or to report why it never finished.
pub(crate) struct HandshakeSettle {
	pub(crate) factory: Rc<RefCell<dyn SocketContextFactory>>,
	pub(crate) tuning: ConnTuning,
	pub(crate) disconnect: Option<DisconnectCallback>,
	pub(crate) status: Option<StatusCallback>,
	pub(crate) local: SocketAddress,
	pub(crate) remote: SocketAddress,
	pub(crate) name: String,
}

/// A transient entity driving one tls handshake: two receivers over the
/// same descriptor, armed one direction at a time as the record layer
/// demands, bounded by a deadline. On success the transport moves into a
/// freshly established connection and both receivers retire through the
/// unobserved path.
struct HandshakeInner {
	transport: Option<TlsTransport>,
	settle: Option<HandshakeSettle>,
	rid: ReceiverId,
	wid: ReceiverId,
	read_suspended: bool,
	write_suspended: bool,
	finished: bool,
}

impl HandshakeInner {
	fn arm_read(&mut self, ctl: &mut ReactorCtl) {
		if self.read_suspended {
			self.read_suspended = false;
			ctl.resume(self.rid);
		}
		if !self.write_suspended {
			self.write_suspended = true;
			ctl.suspend(self.wid);
		}
	}

	fn arm_write(&mut self, ctl: &mut ReactorCtl) {
		if self.write_suspended {
			self.write_suspended = false;
			ctl.resume(self.wid);
		}
		if !self.read_suspended {
			self.read_suspended = true;
			ctl.suspend(self.rid);
		}
	}

	fn drive(&mut self, ctl: &mut ReactorCtl) {
		if self.finished {
			return;
		}
		loop {
			let transport = match self.transport.as_mut() {
				Some(transport) => transport,
				None => return,
			};
			if transport.wants_write() {
				match transport.flush_records() {
					WriteStatus::WouldBlock => {
						self.arm_write(ctl);
						return;
					}
					WriteStatus::Err(e) => {
						self.fail(ctl, &format!("record flush failed: errno {}", e));
						return;
					}
					WriteStatus::Written(_) => {}
				}
			}
			if !transport.is_handshaking() {
				self.complete(ctl);
				return;
			}
			match transport.pump_records() {
				ReadStatus::Data(_) => {}
				ReadStatus::WouldBlock => {
					self.arm_read(ctl);
					return;
				}
				ReadStatus::Eof | ReadStatus::CloseNotify => {
					self.fail(ctl, "peer closed during handshake");
					return;
				}
				ReadStatus::Err(e) => {
					self.fail(ctl, &format!("handshake failed: errno {}", e));
					return;
				}
			}
		}
	}

	fn complete(&mut self, ctl: &mut ReactorCtl) {
		self.finished = true;
		ctl.disable(self.rid);
		ctl.disable(self.wid);
		let mut transport = match self.transport.take() {
			Some(transport) => transport,
			None => return,
		};
		let settle = match self.settle.take() {
			Some(settle) => settle,
			None => return,
		};
		let context = match settle.factory.borrow_mut().create() {
			Ok(context) => context,
			Err(e) => {
				warn!("{}: context creation failed: {}", settle.name, e);
				transport.close();
				if let Some(status) = settle.status {
					(status.borrow_mut())(SocketState::Error(format!("{}", e)), &settle.remote);
				}
				return;
			}
		};
		debug!("{}: handshake complete with {}", settle.name, settle.remote);
		establish(
			ctl,
			Box::new(transport),
			context,
			settle.local,
			settle.remote.clone(),
			settle.tuning,
			settle.disconnect,
			&settle.name,
		);
		if let Some(status) = settle.status {
			(status.borrow_mut())(SocketState::Ok, &settle.remote);
		}
	}

	fn fail(&mut self, ctl: &mut ReactorCtl, why: &str) {
		if self.finished {
			return;
		}
		self.finished = true;
		ctl.disable(self.rid);
		ctl.disable(self.wid);
		if let Some(mut transport) = self.transport.take() {
			transport.close();
		}
		if let Some(settle) = self.settle.take() {
			warn!("{}: {} (peer {})", settle.name, why, settle.remote);
			if let Some(status) = settle.status {
				(status.borrow_mut())(SocketState::Error(why.to_string()), &settle.remote);
			}
		}
	}
}

struct HandshakeHalf {
	inner: Rc<RefCell<HandshakeInner>>,
	name: &'static str,
}

impl EventReceiver for HandshakeHalf {
	fn dispatch(&mut self, ctl: &mut ReactorCtl) {
		self.inner.borrow_mut().drive(ctl);
	}

	fn dispatch_timeout(&mut self, ctl: &mut ReactorCtl) {
		self.inner.borrow_mut().fail(ctl, "handshake deadline expired");
	}

	fn terminate(&mut self, ctl: &mut ReactorCtl) {
		self.inner.borrow_mut().fail(ctl, "terminated during handshake");
	}

	fn name(&self) -> &str {
		self.name
	}
}

/// Register the two handshake receivers and kick the first drive so a
/// client hello goes out without waiting for readiness.
pub(crate) fn start_handshake(
	ctl: &mut ReactorCtl,
	transport: TlsTransport,
	settle: HandshakeSettle,
	timeout: TimeVal,
) {
	let handle = transport.handle();
	let rid = ReceiverId::generate();
	let wid = ReceiverId::generate();
	let name = settle.name.clone();
	let inner = Rc::new(RefCell::new(HandshakeInner {
		transport: Some(transport),
		settle: Some(settle),
		rid,
		wid,
		read_suspended: false,
		write_suspended: false,
		finished: false,
	}));
	ctl.register(
		rid,
		handle,
		Direction::Read,
		&format!("{}-handshake-read", name),
		Some(timeout),
		false,
		Rc::new(RefCell::new(HandshakeHalf {
			inner: inner.clone(),
			name: "handshake-read",
		})),
	);
	ctl.register(
		wid,
		handle,
		Direction::Write,
		&format!("{}-handshake-write", name),
		Some(timeout),
		false,
		Rc::new(RefCell::new(HandshakeHalf {
			inner: inner.clone(),
			name: "handshake-write",
		})),
	);
	inner.borrow_mut().drive(ctl);
}
