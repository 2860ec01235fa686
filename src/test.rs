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

#[cfg(test)]
mod test {
	use crate::event::{Direction, EventReceiver, ReactorCtl, ReceiverId};
	use crate::socket::{close_fd, pipe_pair, write_fd};
	use crate::{
		connect, listen, ConnectConfig, Error, ListenConfig, MuxKind, Reactor, SniEntry,
		SocketAddress, SocketConnection, SocketContext, SocketState, TimeVal, TlsConnectConfig,
		TlsListenConfig,
	};
	use std::cell::RefCell;
	use std::io::{Read, Write};
	use std::net::{SocketAddr, TcpStream};
	use std::rc::Rc;
	use std::sync::{Arc, Mutex};
	use std::thread;
	use std::time::{Duration, Instant};

	fn init_log() {
		let _ = env_logger::builder().is_test(true).try_init();
	}

	/// A receiver parked on an always-readable pipe so ticks in tests
	/// never block waiting for external readiness.
	struct Keeper;

	impl EventReceiver for Keeper {
		fn dispatch(&mut self, _ctl: &mut ReactorCtl) {}
		fn dispatch_timeout(&mut self, _ctl: &mut ReactorCtl) {}
		fn terminate(&mut self, _ctl: &mut ReactorCtl) {}
		fn name(&self) -> &str {
			"keeper"
		}
	}

	fn add_keeper(reactor: &mut Reactor) -> Result<(), Error> {
		let (r, w) = pipe_pair()?;
		write_fd(w, b"k").map_err(|e| crate::err!(crate::ErrKind::IO, "pipe write: {}", e))?;
		let id = ReceiverId::generate();
		reactor.with_ctl(|ctl| {
			ctl.register(
				id,
				r,
				Direction::Read,
				"keeper",
				None,
				false,
				Rc::new(RefCell::new(Keeper)),
			);
		});
		Ok(())
	}

	fn run_until<F: FnMut() -> bool>(
		reactor: &mut Reactor,
		secs: u64,
		mut cond: F,
	) -> Result<bool, Error> {
		let deadline = Instant::now() + Duration::from_secs(secs);
		loop {
			if cond() {
				return Ok(true);
			}
			if Instant::now() >= deadline {
				return Ok(false);
			}
			reactor.tick()?;
		}
	}

	fn local_address(port: u16) -> SocketAddress {
		SocketAddress::from(SocketAddr::from(([127, 0, 0, 1], port)))
	}

	struct Probe {
		id: ReceiverId,
		fired: Rc<RefCell<usize>>,
		timeouts: Rc<RefCell<usize>>,
		unobserved: Rc<RefCell<usize>>,
	}

	impl EventReceiver for Probe {
		fn dispatch(&mut self, _ctl: &mut ReactorCtl) {
			*self.fired.borrow_mut() += 1;
		}
		fn dispatch_timeout(&mut self, ctl: &mut ReactorCtl) {
			*self.timeouts.borrow_mut() += 1;
			ctl.disable(self.id);
		}
		fn terminate(&mut self, ctl: &mut ReactorCtl) {
			ctl.disable(self.id);
		}
		fn unobserved(&mut self, _ctl: &mut ReactorCtl) {
			*self.unobserved.borrow_mut() += 1;
		}
		fn name(&self) -> &str {
			"probe"
		}
	}

	fn probe(id: ReceiverId) -> (Probe, Rc<RefCell<usize>>, Rc<RefCell<usize>>, Rc<RefCell<usize>>)
	{
		let fired = Rc::new(RefCell::new(0));
		let timeouts = Rc::new(RefCell::new(0));
		let unobserved = Rc::new(RefCell::new(0));
		(
			Probe {
				id,
				fired: fired.clone(),
				timeouts: timeouts.clone(),
				unobserved: unobserved.clone(),
			},
			fired,
			timeouts,
			unobserved,
		)
	}

	#[test]
	fn test_register_then_disable_same_tick() -> Result<(), Error> {
		init_log();
		let mut reactor = Reactor::new(MuxKind::Poll);
		add_keeper(&mut reactor)?;

		let (r, w) = pipe_pair()?;
		write_fd(w, b"x").map_err(|e| crate::err!(crate::ErrKind::IO, "pipe write: {}", e))?;

		let id = ReceiverId::generate();
		let (p, fired, _timeouts, unobserved) = probe(id);
		reactor.with_ctl(|ctl| {
			ctl.register(id, r, Direction::Read, "probe", None, false, Rc::new(RefCell::new(p)));
			ctl.disable(id);
		});
		reactor.tick()?;

		// cancelled before it was ever observed: destroyed without firing
		assert_eq!(*fired.borrow(), 0);
		assert_eq!(*unobserved.borrow(), 1);
		assert!(!reactor.receiver_known(id));
		Ok(())
	}

	#[test]
	fn test_dispatch_and_unobserved_once() -> Result<(), Error> {
		init_log();
		let mut reactor = Reactor::new(MuxKind::Poll);
		add_keeper(&mut reactor)?;

		let (r, w) = pipe_pair()?;
		write_fd(w, b"x").map_err(|e| crate::err!(crate::ErrKind::IO, "pipe write: {}", e))?;

		let id = ReceiverId::generate();
		let (p, fired, _timeouts, unobserved) = probe(id);
		reactor.with_ctl(|ctl| {
			ctl.register(id, r, Direction::Read, "probe", None, false, Rc::new(RefCell::new(p)));
		});
		reactor.tick()?;
		reactor.tick()?;
		assert!(*fired.borrow() >= 1);
		assert!(reactor.receiver_enabled(id));

		reactor.with_ctl(|ctl| ctl.disable(id));
		reactor.tick()?;
		assert_eq!(*unobserved.borrow(), 1);
		assert!(!reactor.receiver_known(id));

		// a later tick must not deliver unobserved again
		reactor.tick()?;
		assert_eq!(*unobserved.borrow(), 1);
		Ok(())
	}

	#[test]
	fn test_inactivity_timeout_fires() -> Result<(), Error> {
		init_log();
		let mut reactor = Reactor::new(MuxKind::Select);
		add_keeper(&mut reactor)?;

		// never readable
		let (r, _w) = pipe_pair()?;
		let id = ReceiverId::generate();
		let (p, fired, timeouts, unobserved) = probe(id);
		reactor.with_ctl(|ctl| {
			ctl.register(
				id,
				r,
				Direction::Read,
				"probe",
				Some(TimeVal::from_millis(50)),
				false,
				Rc::new(RefCell::new(p)),
			);
		});
		let hit = run_until(&mut reactor, 5, || *timeouts.borrow() >= 1)?;
		assert!(hit);
		assert_eq!(*fired.borrow(), 0);

		// the probe disables itself from dispatch_timeout
		let gone = run_until(&mut reactor, 5, || *unobserved.borrow() == 1)?;
		assert!(gone);
		assert!(!reactor.receiver_known(id));
		Ok(())
	}

	#[test]
	fn test_next_timeout_zero_with_pending_commands() -> Result<(), Error> {
		init_log();
		let mut reactor = Reactor::new(MuxKind::Poll);
		let (r, _w) = pipe_pair()?;
		let id = ReceiverId::generate();
		let (p, _fired, _timeouts, _unobserved) = probe(id);
		reactor.with_ctl(|ctl| {
			ctl.register(id, r, Direction::Read, "probe", None, false, Rc::new(RefCell::new(p)));
		});
		assert_eq!(reactor.next_timeout_for_test(Instant::now()), TimeVal::ZERO);
		Ok(())
	}

	#[test]
	fn test_tick_returns_immediately_when_drained() -> Result<(), Error> {
		init_log();
		let mut reactor = Reactor::new(MuxKind::Select);
		let (r, _w) = pipe_pair()?;
		let id = ReceiverId::generate();
		let (p, _fired, _timeouts, unobserved) = probe(id);
		reactor.with_ctl(|ctl| {
			ctl.register(id, r, Direction::Read, "probe", None, false, Rc::new(RefCell::new(p)));
			ctl.disable(id);
		});

		// once the last receiver is gone a tick must not block waiting
		// on an empty descriptor set
		let begun = Instant::now();
		reactor.tick()?;
		reactor.tick()?;
		assert!(begun.elapsed() < Duration::from_secs(1));
		assert_eq!(*unobserved.borrow(), 1);
		assert_eq!(reactor.receiver_count(), 0);
		Ok(())
	}

	#[test]
	fn test_tick_survives_multiplexer_failure() -> Result<(), Error> {
		init_log();
		let mut reactor = Reactor::new(MuxKind::Select);
		let (r, w) = pipe_pair()?;
		write_fd(w, b"x").map_err(|e| crate::err!(crate::ErrKind::IO, "pipe write: {}", e))?;

		let id = ReceiverId::generate();
		let (p, fired, _timeouts, unobserved) = probe(id);
		reactor.with_ctl(|ctl| {
			ctl.register(id, r, Direction::Read, "probe", None, false, Rc::new(RefCell::new(p)));
		});
		reactor.tick()?;
		reactor.tick()?;
		assert!(*fired.borrow() >= 1);

		// a stale descriptor makes the multiplexer fail with EBADF; the
		// loop logs it and keeps going instead of aborting
		close_fd(r);
		reactor.tick()?;
		reactor.tick()?;
		assert!(reactor.receiver_known(id));

		reactor.with_ctl(|ctl| ctl.disable(id));
		reactor.tick()?;
		assert_eq!(*unobserved.borrow(), 1);
		close_fd(w);
		Ok(())
	}

	/// A receiver that always has deferred work pending.
	struct Spanner {
		id: ReceiverId,
		spans: Rc<RefCell<usize>>,
	}

	impl EventReceiver for Spanner {
		fn dispatch(&mut self, _ctl: &mut ReactorCtl) {
			*self.spans.borrow_mut() += 1;
		}
		fn dispatch_timeout(&mut self, _ctl: &mut ReactorCtl) {}
		fn continue_immediately(&self) -> bool {
			true
		}
		fn terminate(&mut self, ctl: &mut ReactorCtl) {
			ctl.disable(self.id);
		}
		fn name(&self) -> &str {
			"spanner"
		}
	}

	#[test]
	fn test_spanning_receiver_keeps_timeout_zero() -> Result<(), Error> {
		init_log();
		let mut reactor = Reactor::new(MuxKind::Poll);

		// quiet pipe: never readable, so only the span pass can reach it
		let (r, _w) = pipe_pair()?;
		let id = ReceiverId::generate();
		let spans = Rc::new(RefCell::new(0));
		let spanner = Spanner {
			id,
			spans: spans.clone(),
		};
		reactor.with_ctl(|ctl| {
			ctl.register(
				id,
				r,
				Direction::Read,
				"spanner",
				None,
				false,
				Rc::new(RefCell::new(spanner)),
			);
		});
		reactor.tick()?;
		reactor.tick()?;
		assert!(*spans.borrow() >= 1);
		// as long as it is enabled the reactor must not block
		assert_eq!(reactor.next_timeout_for_test(Instant::now()), TimeVal::ZERO);
		Ok(())
	}

	#[derive(Default)]
	struct Tally {
		connected: usize,
		got: Vec<u8>,
		read_errors: Vec<i32>,
		write_errors: Vec<i32>,
		disconnected: usize,
		exits: usize,
	}

	/// A protocol context for tests: optionally greets on connect, echoes,
	/// and closes once a byte budget arrived. Everything observable lands
	/// in the shared tally.
	struct TestContext {
		tally: Rc<RefCell<Tally>>,
		send_on_connect: Vec<u8>,
		echo: bool,
		close_after: Option<usize>,
	}

	impl SocketContext for TestContext {
		fn on_connected(&mut self, conn: &mut dyn SocketConnection) {
			self.tally.borrow_mut().connected += 1;
			if !self.send_on_connect.is_empty() {
				conn.send_to_peer(&self.send_on_connect);
			}
		}

		fn on_received_from_peer(
			&mut self,
			conn: &mut dyn SocketConnection,
		) -> Result<usize, Error> {
			let mut buf = vec![0u8; conn.available()];
			let n = conn.read_from_peer(&mut buf);
			if self.echo {
				conn.send_to_peer(&buf[0..n]);
			}
			let total = {
				let mut tally = self.tally.borrow_mut();
				tally.got.extend_from_slice(&buf[0..n]);
				tally.got.len()
			};
			if let Some(limit) = self.close_after {
				if total >= limit {
					conn.close();
				}
			}
			Ok(n)
		}

		fn on_read_error(&mut self, errnum: i32) {
			self.tally.borrow_mut().read_errors.push(errnum);
		}

		fn on_write_error(&mut self, errnum: i32) {
			self.tally.borrow_mut().write_errors.push(errnum);
		}

		fn on_disconnected(&mut self) {
			self.tally.borrow_mut().disconnected += 1;
		}

		fn on_exit(&mut self) {
			self.tally.borrow_mut().exits += 1;
		}
	}

	struct ContextSpec {
		send_on_connect: Vec<u8>,
		echo: bool,
		close_after: Option<usize>,
	}

	impl ContextSpec {
		fn quiet() -> Self {
			Self {
				send_on_connect: vec![],
				echo: false,
				close_after: None,
			}
		}

		fn echo() -> Self {
			Self {
				send_on_connect: vec![],
				echo: true,
				close_after: None,
			}
		}

		fn factory(
			self,
		) -> (
			Rc<RefCell<dyn crate::SocketContextFactory>>,
			Rc<RefCell<Tally>>,
		) {
			let tally: Rc<RefCell<Tally>> = Rc::new(RefCell::new(Tally::default()));
			let t = tally.clone();
			let factory = Rc::new(RefCell::new(move || {
				Ok(Box::new(TestContext {
					tally: t.clone(),
					send_on_connect: self.send_on_connect.clone(),
					echo: self.echo,
					close_after: self.close_after,
				}) as Box<dyn SocketContext>)
			}));
			(factory, tally)
		}
	}

	fn status_recorder() -> (crate::StatusCallback, Rc<RefCell<Vec<SocketState>>>) {
		let states: Rc<RefCell<Vec<SocketState>>> = Rc::new(RefCell::new(vec![]));
		let s = states.clone();
		let cb: crate::StatusCallback = Rc::new(RefCell::new(
			move |state: SocketState, _address: &SocketAddress| {
				s.borrow_mut().push(state);
			},
		));
		(cb, states)
	}

	#[test]
	fn test_plain_echo_roundtrip() -> Result<(), Error> {
		init_log();
		let mut reactor = Reactor::new(MuxKind::Poll);
		add_keeper(&mut reactor)?;
		let port = portpicker::pick_unused_port().unwrap();
		let address = local_address(port);

		let (server_factory, server_tally) = ContextSpec::echo().factory();
		let (server_status, server_states) = status_recorder();
		let mut listen_config = ListenConfig::new("echo", address.clone(), server_factory);
		listen_config.on_status = Some(server_status);
		listen(&mut reactor, listen_config)?;
		assert_eq!(server_states.borrow().as_slice(), &[SocketState::Ok]);

		let message = b"hello snet";
		let (client_factory, client_tally) = ContextSpec {
			send_on_connect: message.to_vec(),
			echo: false,
			close_after: Some(message.len()),
		}
		.factory();
		let (client_status, client_states) = status_recorder();
		let mut connect_config = ConnectConfig::new("echo-client", address, client_factory);
		connect_config.on_status = Some(client_status);
		connect(&mut reactor, connect_config)?;

		let done = run_until(&mut reactor, 10, || {
			client_tally.borrow().got.len() >= message.len()
		})?;
		assert!(done);
		assert_eq!(client_tally.borrow().got, message);
		assert_eq!(client_tally.borrow().connected, 1);
		assert_eq!(server_tally.borrow().got, message);
		assert!(client_states.borrow().contains(&SocketState::Ok));

		// the client closed after the echo; both sides tear down
		let closed = run_until(&mut reactor, 10, || {
			client_tally.borrow().disconnected == 1 && server_tally.borrow().disconnected == 1
		})?;
		assert!(closed);
		assert_eq!(server_tally.borrow().read_errors, vec![0]);
		Ok(())
	}

	#[test]
	fn test_server_greets_before_writability() -> Result<(), Error> {
		init_log();
		let mut reactor = Reactor::new(MuxKind::Select);
		add_keeper(&mut reactor)?;
		let port = portpicker::pick_unused_port().unwrap();
		let address = local_address(port);

		// the greeting is queued from on_connected, before the write half
		// ever saw writability
		let (server_factory, _server_tally) = ContextSpec {
			send_on_connect: b"HELLO".to_vec(),
			echo: false,
			close_after: None,
		}
		.factory();
		listen(
			&mut reactor,
			ListenConfig::new("greeter", address.clone(), server_factory),
		)?;

		let (client_factory, client_tally) = ContextSpec::quiet().factory();
		connect(
			&mut reactor,
			ConnectConfig::new("greeter-client", address, client_factory),
		)?;

		let done = run_until(&mut reactor, 10, || client_tally.borrow().got.len() >= 5)?;
		assert!(done);
		assert_eq!(client_tally.borrow().got, b"HELLO");
		Ok(())
	}

	#[test]
	fn test_stop_terminates_connections() -> Result<(), Error> {
		init_log();
		let mut reactor = Reactor::new(MuxKind::Poll);
		add_keeper(&mut reactor)?;
		let port = portpicker::pick_unused_port().unwrap();
		let address = local_address(port);

		let (server_factory, server_tally) = ContextSpec::quiet().factory();
		listen(
			&mut reactor,
			ListenConfig::new("idle", address.clone(), server_factory),
		)?;
		let (client_factory, client_tally) = ContextSpec::quiet().factory();
		connect(
			&mut reactor,
			ConnectConfig::new("idle-client", address, client_factory),
		)?;

		let up = run_until(&mut reactor, 10, || {
			server_tally.borrow().connected == 1 && client_tally.borrow().connected == 1
		})?;
		assert!(up);

		reactor.stop();
		let down = run_until(&mut reactor, 10, || {
			server_tally.borrow().disconnected == 1 && client_tally.borrow().disconnected == 1
		})?;
		assert!(down);
		assert_eq!(server_tally.borrow().exits, 1);
		assert_eq!(client_tally.borrow().exits, 1);

		// only the keeper remains once the listener released its socket
		let deadline = Instant::now() + Duration::from_secs(10);
		while reactor.receiver_count() > 1 && Instant::now() < deadline {
			reactor.tick()?;
		}
		assert_eq!(reactor.receiver_count(), 1);
		Ok(())
	}

	#[test]
	fn test_stop_bounded_with_unresponsive_peer() -> Result<(), Error> {
		init_log();
		let mut reactor = Reactor::new(MuxKind::Poll);
		add_keeper(&mut reactor)?;
		let port = portpicker::pick_unused_port().unwrap();
		let address = local_address(port);

		// the server floods the peer on connect; the raw client never
		// reads, so the kernel buffers fill and the write half jams
		let (server_factory, server_tally) = ContextSpec {
			send_on_connect: vec![0u8; 4 * 1024 * 1024],
			echo: false,
			close_after: None,
		}
		.factory();
		listen(
			&mut reactor,
			ListenConfig::new("flood", address.clone(), server_factory),
		)?;

		let client = TcpStream::connect(("127.0.0.1", port))
			.map_err(|e| crate::err!(crate::ErrKind::IO, "connect: {}", e))?;

		let up = run_until(&mut reactor, 10, || server_tally.borrow().connected == 1)?;
		assert!(up);

		// teardown of the jammed connection must be bounded by the
		// terminate grace window, not the write timeout or the tick cap
		reactor.stop();
		let begun = Instant::now();
		let down = run_until(&mut reactor, 10, || server_tally.borrow().disconnected == 1)?;
		assert!(down);
		assert!(begun.elapsed() < Duration::from_secs(5));
		assert_eq!(server_tally.borrow().exits, 1);

		// once drained, ticks return immediately instead of waiting
		let idle = Instant::now();
		while reactor.receiver_count() > 1 && idle.elapsed() < Duration::from_secs(10) {
			reactor.tick()?;
		}
		assert_eq!(reactor.receiver_count(), 1);
		drop(client);
		Ok(())
	}

	fn self_signed(names: &[&str]) -> (Vec<rustls::Certificate>, rustls::PrivateKey) {
		let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
		let cert = rcgen::generate_simple_self_signed(names).unwrap();
		(
			vec![rustls::Certificate(cert.serialize_der().unwrap())],
			rustls::PrivateKey(cert.serialize_private_key_der()),
		)
	}

	#[test]
	fn test_tls_echo_roundtrip() -> Result<(), Error> {
		init_log();
		let mut reactor = Reactor::new(MuxKind::Poll);
		add_keeper(&mut reactor)?;
		let port = portpicker::pick_unused_port().unwrap();
		let address = local_address(port);

		let (certs, key) = self_signed(&["localhost"]);
		let (server_factory, server_tally) = ContextSpec::echo().factory();
		let mut listen_config = ListenConfig::new("tls-echo", address.clone(), server_factory);
		listen_config.tls = Some(TlsListenConfig::new(certs, key));
		listen(&mut reactor, listen_config)?;

		let message = b"over tls";
		let (client_factory, client_tally) = ContextSpec {
			send_on_connect: message.to_vec(),
			echo: false,
			close_after: Some(message.len()),
		}
		.factory();
		let (client_status, client_states) = status_recorder();
		let mut connect_config = ConnectConfig::new("tls-client", address, client_factory);
		let mut tls = TlsConnectConfig::new("localhost");
		tls.accept_invalid_certs = true;
		connect_config.tls = Some(tls);
		connect_config.on_status = Some(client_status);
		connect(&mut reactor, connect_config)?;

		let done = run_until(&mut reactor, 10, || {
			client_tally.borrow().got.len() >= message.len()
		})?;
		assert!(done);
		assert_eq!(client_tally.borrow().got, message);
		// connected only reports once the handshake finished
		assert_eq!(client_tally.borrow().connected, 1);
		assert_eq!(server_tally.borrow().connected, 1);
		assert!(client_states.borrow().contains(&SocketState::Ok));

		let closed = run_until(&mut reactor, 10, || {
			client_tally.borrow().disconnected == 1 && server_tally.borrow().disconnected == 1
		})?;
		assert!(closed);
		Ok(())
	}

	struct AnyCert;

	impl rustls::client::ServerCertVerifier for AnyCert {
		fn verify_server_cert(
			&self,
			_end_entity: &rustls::Certificate,
			_intermediates: &[rustls::Certificate],
			_server_name: &rustls::ServerName,
			_scts: &mut dyn Iterator<Item = &[u8]>,
			_ocsp_response: &[u8],
			_now: std::time::SystemTime,
		) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
			Ok(rustls::client::ServerCertVerified::assertion())
		}
	}

	fn raw_client_config() -> Arc<rustls::ClientConfig> {
		let mut config = rustls::ClientConfig::builder()
			.with_safe_defaults()
			.with_root_certificates(rustls::RootCertStore::empty())
			.with_no_client_auth();
		config
			.dangerous()
			.set_certificate_verifier(Arc::new(AnyCert));
		Arc::new(config)
	}

	#[test]
	fn test_tls_fin_without_close_notify_is_clean_eof() -> Result<(), Error> {
		init_log();
		let mut reactor = Reactor::new(MuxKind::Poll);
		add_keeper(&mut reactor)?;
		let port = portpicker::pick_unused_port().unwrap();
		let address = local_address(port);

		let (certs, key) = self_signed(&["localhost"]);
		let (server_factory, server_tally) = ContextSpec::echo().factory();
		let mut listen_config = ListenConfig::new("tls-fin", address, server_factory);
		listen_config.tls = Some(TlsListenConfig::new(certs, key));
		listen(&mut reactor, listen_config)?;

		let config = raw_client_config();
		let handle = thread::spawn(move || {
			let mut sock = TcpStream::connect(("127.0.0.1", port)).unwrap();
			let mut conn =
				rustls::ClientConnection::new(config, "localhost".try_into().unwrap()).unwrap();
			while conn.is_handshaking() {
				conn.complete_io(&mut sock).unwrap();
			}
			let mut stream = rustls::Stream::new(&mut conn, &mut sock);
			stream.write_all(b"ping").unwrap();
			let mut buf = [0u8; 4];
			stream.read_exact(&mut buf).unwrap();
			assert_eq!(&buf, b"ping");
			// drop both without send_close_notify: the peer sees a bare FIN
		});

		let done = run_until(&mut reactor, 10, || {
			server_tally.borrow().disconnected == 1
		})?;
		handle.join().unwrap();
		assert!(done);
		assert_eq!(server_tally.borrow().got, b"ping");
		// a FIN with no close_notify still ends the stream cleanly
		assert_eq!(server_tally.borrow().read_errors, vec![0]);
		Ok(())
	}

	#[test]
	fn test_sni_wildcard_selects_certificate() -> Result<(), Error> {
		init_log();
		let mut reactor = Reactor::new(MuxKind::Poll);
		add_keeper(&mut reactor)?;
		let port = portpicker::pick_unused_port().unwrap();
		let address = local_address(port);

		let (default_certs, default_key) = self_signed(&["localhost"]);
		let (alt_certs, alt_key) = self_signed(&["svc.example.com"]);
		let alt_der = alt_certs[0].0.clone();

		let (server_factory, _server_tally) = ContextSpec::echo().factory();
		let mut listen_config = ListenConfig::new("sni", address, server_factory);
		let mut tls = TlsListenConfig::new(default_certs, default_key);
		tls.patterns = vec!["localhost".to_string()];
		tls.sni = vec![SniEntry {
			patterns: vec!["*.example.com".to_string()],
			certs: alt_certs,
			key: alt_key,
		}];
		listen_config.tls = Some(tls);
		listen(&mut reactor, listen_config)?;

		let config = raw_client_config();
		let seen: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
		let seen_in_thread = seen.clone();
		let handle = thread::spawn(move || {
			let mut sock = TcpStream::connect(("127.0.0.1", port)).unwrap();
			let mut conn =
				rustls::ClientConnection::new(config, "svc.example.com".try_into().unwrap())
					.unwrap();
			while conn.is_handshaking() {
				conn.complete_io(&mut sock).unwrap();
			}
			let served = conn.peer_certificates().unwrap()[0].0.clone();
			*seen_in_thread.lock().unwrap() = Some(served);
			conn.send_close_notify();
			let _ = conn.complete_io(&mut sock);
		});

		let done = run_until(&mut reactor, 10, || seen.lock().unwrap().is_some())?;
		handle.join().unwrap();
		assert!(done);
		assert_eq!(seen.lock().unwrap().as_deref(), Some(alt_der.as_slice()));
		Ok(())
	}

	#[test]
	fn test_force_sni_rejects_missing_name() -> Result<(), Error> {
		init_log();
		let mut reactor = Reactor::new(MuxKind::Poll);
		add_keeper(&mut reactor)?;
		let port = portpicker::pick_unused_port().unwrap();
		let address = local_address(port);

		let (certs, key) = self_signed(&["localhost"]);
		let (server_factory, server_tally) = ContextSpec::echo().factory();
		let mut listen_config = ListenConfig::new("force-sni", address.clone(), server_factory);
		let mut tls = TlsListenConfig::new(certs, key);
		tls.patterns = vec!["localhost".to_string()];
		tls.force_sni = true;
		listen_config.tls = Some(tls);
		listen(&mut reactor, listen_config)?;

		// connecting by ip address sends no server name at all
		let (client_factory, client_tally) = ContextSpec::quiet().factory();
		let (client_status, client_states) = status_recorder();
		let mut connect_config = ConnectConfig::new("no-sni", address, client_factory);
		let mut tls = TlsConnectConfig::new("127.0.0.1");
		tls.accept_invalid_certs = true;
		connect_config.tls = Some(tls);
		connect_config.on_status = Some(client_status);
		connect(&mut reactor, connect_config)?;

		let failed = run_until(&mut reactor, 10, || {
			client_states
				.borrow()
				.iter()
				.any(|s| matches!(s, SocketState::Error(_)))
		})?;
		assert!(failed);
		assert_eq!(client_tally.borrow().connected, 0);
		assert_eq!(server_tally.borrow().connected, 0);
		Ok(())
	}
}
