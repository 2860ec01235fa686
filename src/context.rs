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

use crate::connection::SocketConnection;
use crate::error::Error;
use crate::socket::SocketAddress;
use std::cell::RefCell;
use std::rc::Rc;

/// Lifecycle state of a listener or connector, reported through its status
/// callback together with the address it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketState {
	/// Bound / connected (for tls, handshake included) and operating.
	Ok,
	/// Configured as disabled; nothing was bound or connected.
	Disabled,
	/// A recoverable failure affecting only this unit.
	Error(String),
	/// A setup failure this unit cannot recover from.
	Fatal(String),
}

/// Reports listener and connector state changes with the attempted address.
pub type StatusCallback = Rc<RefCell<dyn FnMut(SocketState, &SocketAddress)>>;

/// Fired when a physical connection is established, before any context
/// exists; local address first, then remote.
pub type ConnectCallback = Rc<RefCell<dyn FnMut(&SocketAddress, &SocketAddress)>>;

/// The application protocol state machine attached to one connection. All
/// interaction with the wire goes through the [`SocketConnection`] handed
/// into the callbacks; a context never owns the socket.
pub trait SocketContext {
	/// The connection is established (for tls, the handshake is done).
	fn on_connected(&mut self, conn: &mut dyn SocketConnection) {
		let _ = conn;
	}

	/// Bytes are buffered. Consume them with
	/// [`SocketConnection::read_from_peer`] and return how many were
	/// consumed in total. Returning 0 while bytes remain means the
	/// protocol cannot make progress; the connection is closed.
	fn on_received_from_peer(&mut self, conn: &mut dyn SocketConnection)
		-> Result<usize, Error>;

	/// The receive side failed or ended. `errnum` 0 is a clean end of
	/// stream.
	fn on_read_error(&mut self, errnum: i32) {
		let _ = errnum;
	}

	/// The send side failed.
	fn on_write_error(&mut self, errnum: i32) {
		let _ = errnum;
	}

	/// The connection is fully torn down. Fired exactly once, after both
	/// halves stopped being observed.
	fn on_disconnected(&mut self) {}

	/// The reactor is shutting down while this connection is still alive.
	/// Fired at most once, before the graceful close begins.
	fn on_exit(&mut self) {}
}

/// Produces one context per accepted or established connection.
pub trait SocketContextFactory {
	fn create(&mut self) -> Result<Box<dyn SocketContext>, Error>;
}

impl<F> SocketContextFactory for F
where
	F: FnMut() -> Result<Box<dyn SocketContext>, Error>,
{
	fn create(&mut self) -> Result<Box<dyn SocketContext>, Error> {
		self()
	}
}
