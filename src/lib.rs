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

//! This crate implements a single-threaded, readiness-driven networking
//! runtime built around the [`crate::Reactor`]. A reactor multiplexes any
//! number of file descriptors through poll(2) or select(2) and dispatches
//! readiness to [`crate::EventReceiver`] implementations. On top of the
//! reactor sit buffered stream connections with per-direction flow
//! control, optional tls (including sni-based certificate dispatch for
//! servers), inactivity timeouts, and graceful two-phase shutdown.
//!
//! Applications provide a [`crate::SocketContext`], the protocol state
//! machine attached to each connection, and start server or client units
//! with [`crate::listen`] and [`crate::connect`]. Everything runs on the
//! thread that calls [`crate::Reactor::run`]; receivers may therefore hold
//! non-`Send` state freely.
//!
//! # Examples
//!
//!```no_run
//! // Echo server
//! use snet::*;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! struct Echo;
//!
//! impl SocketContext for Echo {
//!     fn on_received_from_peer(
//!         &mut self,
//!         conn: &mut dyn SocketConnection,
//!     ) -> Result<usize, Error> {
//!         let mut buf = vec![0u8; conn.available()];
//!         let n = conn.read_from_peer(&mut buf);
//!         conn.send_to_peer(&buf[0..n]);
//!         Ok(n)
//!     }
//! }
//!
//! fn main() -> Result<(), Error> {
//!     let mut reactor = Reactor::new(MuxKind::Poll);
//!     let factory = Rc::new(RefCell::new(|| {
//!         Ok(Box::new(Echo) as Box<dyn SocketContext>)
//!     }));
//!     let config = ListenConfig::new(
//!         "echo",
//!         SocketAddress::from("127.0.0.1:8080".parse::<std::net::SocketAddr>()?),
//!         factory,
//!     );
//!     listen(&mut reactor, config)?;
//!     reactor.run()?;
//!     Ok(())
//! }
//!```

mod acceptor;
mod connection;
mod connector;
mod constants;
mod context;
mod error;
mod event;
mod handshake;
mod mux;
mod mux_poll;
mod mux_select;
mod publisher;
mod reactor;
mod reader;
mod sni;
mod socket;
mod stream;
mod test;
mod timeval;
mod tls;
mod writer;

pub use crate::acceptor::{listen, ListenConfig};
pub use crate::connection::{ConnTuning, DisconnectCallback, SocketConnection};
pub use crate::connector::{connect, ConnectConfig};
pub use crate::constants::{
	SNET_DEFAULT_BACKLOG, SNET_DEFAULT_CONNECT_TIMEOUT_SECS,
	SNET_DEFAULT_HANDSHAKE_TIMEOUT_SECS, SNET_DEFAULT_READ_BLOCK_SIZE,
	SNET_DEFAULT_READ_TIMEOUT_SECS, SNET_DEFAULT_TERMINATE_TIMEOUT_SECS,
	SNET_DEFAULT_WRITE_BLOCK_SIZE, SNET_DEFAULT_WRITE_TIMEOUT_SECS,
};
pub use crate::context::{
	ConnectCallback, SocketContext, SocketContextFactory, SocketState, StatusCallback,
};
pub use crate::error::{ErrKind, Error, ErrorKind};
pub use crate::event::{Direction, EventReceiver, ReactorCtl, ReceiverId, ReceiverRef};
pub use crate::mux::MuxKind;
pub use crate::reactor::Reactor;
pub use crate::socket::{Handle, SocketAddress};
pub use crate::timeval::TimeVal;
pub use crate::tls::{
	certs_from_pem, load_certs, load_private_key, private_key_from_pem, SniEntry, TlsConnectConfig,
	TlsListenConfig,
};
