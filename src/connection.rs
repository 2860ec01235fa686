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
use crate::context::SocketContext;
use crate::event::{Direction, EventReceiver, ReactorCtl, ReceiverId};
use crate::reader::SocketReader;
use crate::socket::SocketAddress;
use crate::stream::{ReadStatus, ShutdownStep, Transport, WriteStatus};
use crate::timeval::TimeVal;
use crate::writer::SocketWriter;
use log::{debug, warn};
use rand::random;
use std::cell::RefCell;
use std::rc::Rc;

/// Callback fired once per connection after it is fully torn down.
pub type DisconnectCallback = Rc<RefCell<dyn FnMut(u128)>>;

/// The wire-facing surface a [`SocketContext`] sees. One connection, full
/// duplex, backed by two independently scheduled receiver halves.
pub trait SocketConnection {
	/// Stable connection id, for correlation in callbacks and logs.
	fn id(&self) -> u128;

	/// Copy buffered receive bytes into `buf`; returns the number copied.
	fn read_from_peer(&mut self, buf: &mut [u8]) -> usize;

	/// Bytes buffered and not yet consumed.
	fn available(&self) -> usize;

	/// Queue bytes for delivery. Accepted before a write shutdown; later
	/// sends are dropped with a warning.
	fn send_to_peer(&mut self, data: &[u8]);

	/// Begin a graceful close: pending writes flush, the write side shuts
	/// down in order, and the teardown is bounded by the terminate grace
	/// window.
	fn close(&mut self);

	/// Stop receiving. Buffered bytes are discarded.
	fn shutdown_read(&mut self);

	/// Shut the write side down once pending data drained. With
	/// `force_close` the receive side is torn down as well.
	fn shutdown_write(&mut self, force_close: bool);

	/// Replace the inactivity timeout of both halves.
	fn set_timeout(&mut self, timeout: Option<TimeVal>);

	/// Swap in a new protocol state machine. Applied after the current
	/// callback returns; the old context sees `on_disconnected`, the new
	/// one `on_connected`.
	fn switch_context(&mut self, context: Box<dyn SocketContext>);

	fn local_address(&self) -> &SocketAddress;

	fn remote_address(&self) -> &SocketAddress;
}

/// Per-connection knobs copied out of the listen/connect configuration.
#[derive(Clone)]
pub struct ConnTuning {
	pub read_timeout: Option<TimeVal>,
	pub write_timeout: Option<TimeVal>,
	pub terminate_timeout: TimeVal,
	pub read_block_size: usize,
	pub write_block_size: usize,
}

impl Default for ConnTuning {
	fn default() -> Self {
		Self {
			read_timeout: Some(TimeVal::from_secs(SNET_DEFAULT_READ_TIMEOUT_SECS)),
			write_timeout: Some(TimeVal::from_secs(SNET_DEFAULT_WRITE_TIMEOUT_SECS)),
			terminate_timeout: TimeVal::from_secs(SNET_DEFAULT_TERMINATE_TIMEOUT_SECS),
			read_block_size: SNET_DEFAULT_READ_BLOCK_SIZE,
			write_block_size: SNET_DEFAULT_WRITE_BLOCK_SIZE,
		}
	}
}

/// Scheduling requests accumulated while the connection state is borrowed,
/// translated into reactor commands after the borrow ends.
enum Intent {
	SuspendRead,
	ResumeRead,
	SuspendWrite,
	ResumeWrite,
	DisableRead,
	DisableWrite,
	SetReadTimeout(Option<TimeVal>),
	SetWriteTimeout(Option<TimeVal>),
}

pub(crate) struct ConnInner {
	id: u128,
	transport: Box<dyn Transport>,
	reader: SocketReader,
	writer: SocketWriter,
	context: Option<Box<dyn SocketContext>>,
	new_context: Option<Box<dyn SocketContext>>,
	rid: ReceiverId,
	wid: ReceiverId,
	local: SocketAddress,
	remote: SocketAddress,
	tuning: ConnTuning,
	disconnect: Option<DisconnectCallback>,
	intents: Vec<Intent>,
	// mirrors of the reactor-side state, kept so toggles are only emitted
	// on real transitions
	r_enabled: bool,
	w_enabled: bool,
	r_suspended: bool,
	w_suspended: bool,
	/// the writer can make progress without fresh readiness
	writer_span: bool,
	read_eof: bool,
	closing: bool,
	close_on_shutdown: bool,
	exit_fired: bool,
	halves_unobserved: u32,
	torn_down: bool,
}

impl ConnInner {
	fn want_suspend_read(&mut self) {
		if self.r_enabled && !self.r_suspended {
			self.r_suspended = true;
			self.intents.push(Intent::SuspendRead);
		}
	}

	fn want_resume_read(&mut self) {
		if self.r_enabled && self.r_suspended {
			self.r_suspended = false;
			self.intents.push(Intent::ResumeRead);
		}
	}

	fn want_suspend_write(&mut self) {
		if self.w_enabled && !self.w_suspended {
			self.w_suspended = true;
			self.intents.push(Intent::SuspendWrite);
		}
	}

	fn want_resume_write(&mut self) {
		if self.w_enabled && self.w_suspended {
			self.w_suspended = false;
			self.intents.push(Intent::ResumeWrite);
		}
	}

	fn want_disable_read(&mut self) {
		if self.r_enabled {
			self.r_enabled = false;
			self.intents.push(Intent::DisableRead);
		}
	}

	fn want_disable_write(&mut self) {
		if self.w_enabled {
			self.w_enabled = false;
			self.intents.push(Intent::DisableWrite);
		}
	}

	/// Deliver buffered bytes to the context. A context that consumes
	/// nothing while bytes are available cannot make progress; that closes
	/// the connection.
	fn deliver(&mut self) {
		let mut ctx = match self.context.take() {
			Some(ctx) => ctx,
			None => return,
		};
		let before = self.reader.available();
		let res = ctx.on_received_from_peer(self);
		self.context = Some(ctx);
		self.apply_context_switch();
		match res {
			Ok(consumed) => {
				if consumed == 0 && before > 0 {
					warn!("connection {:032x}: context stalled with {} bytes buffered, closing", self.id, before);
					self.close_graceful();
				}
			}
			Err(e) => {
				warn!("connection {:032x}: context failed: {}", self.id, e);
				self.close_graceful();
			}
		}
	}

	fn apply_context_switch(&mut self) {
		if let Some(mut next) = self.new_context.take() {
			if let Some(mut old) = self.context.take() {
				old.on_disconnected();
			}
			next.on_connected(self);
			self.context = Some(next);
		}
	}

	fn read_tick(&mut self) {
		if !self.r_enabled || self.read_eof {
			return;
		}
		if self.reader.available() == 0 {
			match self.reader.fill(&mut *self.transport) {
				ReadStatus::Data(_) => {
					// consume via span passes; no read ahead of the context
					self.want_suspend_read();
				}
				ReadStatus::WouldBlock => {
					self.want_resume_read();
					self.check_protocol_write();
					return;
				}
				ReadStatus::Eof => {
					self.handle_read_end(0);
					return;
				}
				ReadStatus::CloseNotify => {
					self.check_protocol_write();
					if self.transport.close_notify_is_eof() {
						self.handle_read_end(0);
					} else {
						debug!("connection {:032x}: close_notify received, read side done", self.id);
						self.read_eof = true;
						self.want_disable_read();
					}
					return;
				}
				ReadStatus::Err(e) => {
					if let Some(ctx) = self.context.as_mut() {
						ctx.on_read_error(e);
					}
					self.teardown_abort();
					return;
				}
			}
		}
		if self.reader.available() > 0 {
			self.deliver();
		}
		if !self.r_enabled || self.read_eof {
			return;
		}
		if self.reader.available() == 0 {
			self.want_resume_read();
		} else {
			self.want_suspend_read();
		}
		self.check_protocol_write();
	}

	/// Reading can produce records that must go out (handshake or
	/// close_notify replies); the write side has to wake up for them.
	fn check_protocol_write(&mut self) {
		if self.transport.wants_write() {
			self.writer_span = true;
			self.want_resume_write();
		}
	}

	fn handle_read_end(&mut self, errnum: i32) {
		self.read_eof = true;
		if let Some(ctx) = self.context.as_mut() {
			ctx.on_read_error(errnum);
		}
		self.want_disable_read();
		self.begin_write_shutdown();
	}

	fn begin_write_shutdown(&mut self) {
		self.writer.request_shutdown();
		self.writer_span = true;
		self.want_resume_write();
		self.intents
			.push(Intent::SetWriteTimeout(Some(self.tuning.terminate_timeout)));
	}

	fn write_tick(&mut self) {
		if !self.w_enabled {
			return;
		}
		if !self.writer.is_empty() {
			match self.writer.flush_once(&mut *self.transport) {
				WriteStatus::Written(_) => {
					if !self.writer.is_empty() {
						// keep draining without fresh readiness
						self.writer_span = true;
						self.want_suspend_write();
						return;
					}
				}
				WriteStatus::WouldBlock => {
					self.writer_span = false;
					self.want_resume_write();
					return;
				}
				WriteStatus::Err(e) => {
					if let Some(ctx) = self.context.as_mut() {
						ctx.on_write_error(e);
					}
					self.teardown_abort();
					return;
				}
			}
		}
		if self.transport.wants_write() {
			match self.transport.flush() {
				WriteStatus::WouldBlock => {
					self.writer_span = false;
					self.want_resume_write();
					return;
				}
				WriteStatus::Err(e) => {
					if let Some(ctx) = self.context.as_mut() {
						ctx.on_write_error(e);
					}
					self.teardown_abort();
					return;
				}
				WriteStatus::Written(_) => {}
			}
		}
		if self.writer.shutdown_requested() {
			match self.transport.shutdown_write_step() {
				ShutdownStep::Done(0) => {
					self.writer_span = false;
					self.want_disable_write();
					if self.read_eof || self.close_on_shutdown || self.closing {
						self.want_disable_read();
					}
				}
				ShutdownStep::Done(e) => {
					debug!("connection {:032x}: write shutdown ended with errno {}", self.id, e);
					self.writer_span = false;
					self.want_disable_write();
					self.want_disable_read();
				}
				ShutdownStep::NeedWrite => {
					self.writer_span = false;
					self.want_resume_write();
				}
				ShutdownStep::Err(e) => {
					if let Some(ctx) = self.context.as_mut() {
						ctx.on_write_error(e);
					}
					self.teardown_abort();
				}
			}
			return;
		}
		self.writer_span = false;
		self.want_suspend_write();
		// a handshake in progress mid-write needs the socket readable
		if self.transport.wants_read() && self.r_suspended && self.reader.available() == 0 {
			self.want_resume_read();
		}
	}

	fn close_graceful(&mut self) {
		if self.closing {
			return;
		}
		self.closing = true;
		self.reader.clear();
		self.want_disable_read();
		self.begin_write_shutdown();
	}

	fn teardown_abort(&mut self) {
		self.closing = true;
		self.writer.clear();
		self.writer_span = false;
		self.want_disable_read();
		self.want_disable_write();
	}

	fn timeout_tick(&mut self) {
		if self.closing {
			debug!("connection {:032x}: grace window expired, forcing teardown", self.id);
			self.teardown_abort();
		} else {
			debug!("connection {:032x}: inactivity timeout", self.id);
			self.close_graceful();
		}
	}

	fn terminate_tick(&mut self) {
		if !self.exit_fired {
			self.exit_fired = true;
			if let Some(ctx) = self.context.as_mut() {
				ctx.on_exit();
			}
		}
		self.close_graceful();
	}

	fn half_unobserved(&mut self) {
		self.halves_unobserved += 1;
		if self.halves_unobserved == 2 {
			self.teardown_final();
		}
	}

	fn teardown_final(&mut self) {
		if self.torn_down {
			return;
		}
		self.torn_down = true;
		if let Some(mut ctx) = self.context.take() {
			ctx.on_disconnected();
		}
		let id = self.id;
		if let Some(cb) = self.disconnect.take() {
			(cb.borrow_mut())(id);
		}
		self.transport.close();
	}
}

impl SocketConnection for ConnInner {
	fn id(&self) -> u128 {
		self.id
	}

	fn read_from_peer(&mut self, buf: &mut [u8]) -> usize {
		self.reader.read(buf)
	}

	fn available(&self) -> usize {
		self.reader.available()
	}

	fn send_to_peer(&mut self, data: &[u8]) {
		let was_empty = self.writer.is_empty();
		if self.writer.send(data) && was_empty {
			self.writer_span = true;
			self.want_resume_write();
		}
	}

	fn close(&mut self) {
		self.close_graceful();
	}

	fn shutdown_read(&mut self) {
		self.read_eof = true;
		self.reader.clear();
		self.transport.shutdown_read();
		self.want_disable_read();
	}

	fn shutdown_write(&mut self, force_close: bool) {
		if force_close {
			self.close_on_shutdown = true;
		}
		self.begin_write_shutdown();
	}

	fn set_timeout(&mut self, timeout: Option<TimeVal>) {
		self.tuning.read_timeout = timeout;
		self.tuning.write_timeout = timeout;
		self.intents.push(Intent::SetReadTimeout(timeout));
		self.intents.push(Intent::SetWriteTimeout(timeout));
	}

	fn switch_context(&mut self, context: Box<dyn SocketContext>) {
		self.new_context = Some(context);
	}

	fn local_address(&self) -> &SocketAddress {
		&self.local
	}

	fn remote_address(&self) -> &SocketAddress {
		&self.remote
	}
}

fn flush_intents(inner: &Rc<RefCell<ConnInner>>, ctl: &mut ReactorCtl) {
	let (rid, wid, intents) = {
		let mut inner = inner.borrow_mut();
		(inner.rid, inner.wid, std::mem::take(&mut inner.intents))
	};
	for intent in intents {
		match intent {
			Intent::SuspendRead => ctl.suspend(rid),
			Intent::ResumeRead => ctl.resume(rid),
			Intent::SuspendWrite => ctl.suspend(wid),
			Intent::ResumeWrite => ctl.resume(wid),
			Intent::DisableRead => ctl.disable(rid),
			Intent::DisableWrite => ctl.disable(wid),
			Intent::SetReadTimeout(tv) => ctl.set_timeout(rid, tv),
			Intent::SetWriteTimeout(tv) => ctl.set_timeout(wid, tv),
		}
	}
}

pub(crate) struct ReadHalf {
	inner: Rc<RefCell<ConnInner>>,
}

impl EventReceiver for ReadHalf {
	fn dispatch(&mut self, ctl: &mut ReactorCtl) {
		self.inner.borrow_mut().read_tick();
		flush_intents(&self.inner, ctl);
	}

	fn dispatch_timeout(&mut self, ctl: &mut ReactorCtl) {
		self.inner.borrow_mut().timeout_tick();
		flush_intents(&self.inner, ctl);
	}

	fn continue_immediately(&self) -> bool {
		let inner = self.inner.borrow();
		inner.r_enabled
			&& !inner.read_eof
			&& (inner.reader.available() > 0 || inner.transport.has_buffered_input())
	}

	fn terminate(&mut self, ctl: &mut ReactorCtl) {
		self.inner.borrow_mut().terminate_tick();
		flush_intents(&self.inner, ctl);
	}

	fn unobserved(&mut self, ctl: &mut ReactorCtl) {
		self.inner.borrow_mut().half_unobserved();
		flush_intents(&self.inner, ctl);
	}

	fn name(&self) -> &str {
		"connection-read"
	}
}

pub(crate) struct WriteHalf {
	inner: Rc<RefCell<ConnInner>>,
}

impl EventReceiver for WriteHalf {
	fn dispatch(&mut self, ctl: &mut ReactorCtl) {
		self.inner.borrow_mut().write_tick();
		flush_intents(&self.inner, ctl);
	}

	fn dispatch_timeout(&mut self, ctl: &mut ReactorCtl) {
		self.inner.borrow_mut().timeout_tick();
		flush_intents(&self.inner, ctl);
	}

	fn continue_immediately(&self) -> bool {
		let inner = self.inner.borrow();
		inner.w_enabled && inner.writer_span
	}

	fn terminate(&mut self, ctl: &mut ReactorCtl) {
		self.inner.borrow_mut().terminate_tick();
		flush_intents(&self.inner, ctl);
	}

	fn unobserved(&mut self, ctl: &mut ReactorCtl) {
		self.inner.borrow_mut().half_unobserved();
		flush_intents(&self.inner, ctl);
	}

	fn name(&self) -> &str {
		"connection-write"
	}
}

/// Wire up an established transport: create the shared connection state,
/// register both halves (the write half suspended until there is data) and
/// run the context's `on_connected`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn establish(
	ctl: &mut ReactorCtl,
	transport: Box<dyn Transport>,
	context: Box<dyn SocketContext>,
	local: SocketAddress,
	remote: SocketAddress,
	tuning: ConnTuning,
	disconnect: Option<DisconnectCallback>,
	name: &str,
) -> u128 {
	let handle = transport.handle();
	let id: u128 = random();
	let rid = ReceiverId::generate();
	let wid = ReceiverId::generate();
	let read_timeout = tuning.read_timeout;
	let write_timeout = tuning.write_timeout;
	let read_block = tuning.read_block_size;
	let write_block = tuning.write_block_size;

	let inner = Rc::new(RefCell::new(ConnInner {
		id,
		transport,
		reader: SocketReader::new(read_block),
		writer: SocketWriter::new(write_block),
		context: Some(context),
		new_context: None,
		rid,
		wid,
		local,
		remote,
		tuning,
		disconnect,
		intents: vec![],
		r_enabled: true,
		w_enabled: true,
		r_suspended: false,
		w_suspended: true,
		writer_span: false,
		read_eof: false,
		closing: false,
		close_on_shutdown: false,
		exit_fired: false,
		halves_unobserved: 0,
		torn_down: false,
	}));

	ctl.register(
		rid,
		handle,
		Direction::Read,
		&format!("{}-read", name),
		read_timeout,
		false,
		Rc::new(RefCell::new(ReadHalf {
			inner: inner.clone(),
		})),
	);
	ctl.register(
		wid,
		handle,
		Direction::Write,
		&format!("{}-write", name),
		write_timeout,
		true,
		Rc::new(RefCell::new(WriteHalf {
			inner: inner.clone(),
		})),
	);

	{
		let mut guard = inner.borrow_mut();
		let mut ctx = match guard.context.take() {
			Some(ctx) => ctx,
			None => return id,
		};
		ctx.on_connected(&mut *guard);
		guard.context = Some(ctx);
		guard.apply_context_switch();
		guard.check_protocol_write();
	}
	flush_intents(&inner, ctl);
	id
}
