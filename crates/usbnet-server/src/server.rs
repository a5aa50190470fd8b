// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The accept loop (C6): one listening socket, many session sockets,
//! readiness-polled on a single thread. Grounded on
//! `neutronium::net::endpoint::Endpoint`'s token-indexed slot table with a
//! free-list, generalised here to one poll instance since sessions have no
//! handshake phase to separate out.

use std::io::{self};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Poll, PollOpt, Ready, Token};
use tracing::{debug, info, warn};

use usbnet_abi::UsbBackend;
use usbnet_transport::{recv_frame, send_frame, TransportError};

use crate::dispatch::dispatch;
use crate::session::{Session, SessionState};

const LISTENER_TOKEN: Token = Token(usize::max_value());
const READINESS_TIMEOUT: Duration = Duration::from_millis(250);

/// Toggle `O_NONBLOCK` on a raw fd. mio sockets are non-blocking by
/// construction; the server briefly clears the flag around a single
/// `recv_frame`/`send_frame` call so that transport's blocking,
/// length-delimited framing (C3) can be reused unmodified once a socket
/// has signalled readiness.
fn set_blocking(fd: RawFd, blocking: bool) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let new_flags = if blocking {
            flags & !libc::O_NONBLOCK
        } else {
            flags | libc::O_NONBLOCK
        };
        if libc::fcntl(fd, libc::F_SETFL, new_flags) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub struct Server {
    listener: TcpListener,
    poll: Poll,
    events: Events,
    sessions: Vec<Option<Session>>,
    free: Vec<usize>,
}

impl Server {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn bind(addr: SocketAddr) -> io::Result<Server> {
        let listener = TcpListener::bind(&addr)?;
        let poll = Poll::new()?;
        poll.register(&listener, LISTENER_TOKEN, Ready::readable(), PollOpt::edge())?;
        info!(%addr, "server listening");
        Ok(Server {
            listener,
            poll,
            events: Events::with_capacity(1024),
            sessions: Vec::new(),
            free: Vec::new(),
        })
    }

    /// Run the accept/dispatch loop until `should_stop` returns true. The
    /// check happens once per readiness cycle, matching spec §5's
    /// termination-signal contract ("the main loop observes the closed
    /// listener and drains per-session state before exiting").
    pub fn run(&mut self, backend: &mut dyn UsbBackend, mut should_stop: impl FnMut() -> bool) -> io::Result<()> {
        while !should_stop() {
            self.poll.poll(&mut self.events, Some(READINESS_TIMEOUT))?;

            let ready: Vec<Token> = self.events.iter().map(|e| e.token()).collect();
            for token in ready {
                if token == LISTENER_TOKEN {
                    self.accept_all()?;
                } else {
                    self.service(token.0, backend);
                }
            }
        }
        self.shutdown(backend);
        Ok(())
    }

    fn accept_all(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    self.insert(stream)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn insert(&mut self, stream: TcpStream) -> io::Result<()> {
        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                self.sessions.push(None);
                self.sessions.len() - 1
            }
        };
        self.poll.register(&stream, Token(index), Ready::readable(), PollOpt::edge())?;
        self.sessions[index] = Some(Session::new(stream));
        Ok(())
    }

    fn service(&mut self, index: usize, backend: &mut dyn UsbBackend) {
        let close = {
            let session = match self.sessions.get_mut(index).and_then(|s| s.as_mut()) {
                Some(s) => s,
                None => return,
            };
            session.state = SessionState::Dispatching;
            match Self::handle_one_frame(session, backend) {
                Ok(()) => {
                    session.state = SessionState::ListeningForFrame;
                    false
                }
                Err(e) => {
                    warn!(error = %e, "session closing");
                    true
                }
            }
        };
        if close {
            self.close_session(index, backend);
        }
    }

    fn handle_one_frame(session: &mut Session, backend: &mut dyn UsbBackend) -> Result<(), TransportError> {
        let fd = session.stream.as_raw_fd();
        set_blocking(fd, true)?;
        let result = (|| -> Result<(), TransportError> {
            let (opcode, payload) = recv_frame(&mut session.stream)?;
            match dispatch(opcode, &payload, backend, &mut session.registry) {
                Ok(Some(reply)) => send_frame(&mut session.stream, reply.opcode(), reply.payload()),
                Ok(None) => Ok(()),
                Err(e) => {
                    warn!(error = %e, "malformed request payload");
                    Err(TransportError::Wire(e))
                }
            }
        })();
        let _ = set_blocking(fd, false);
        result
    }

    fn close_session(&mut self, index: usize, backend: &mut dyn UsbBackend) {
        if let Some(mut session) = self.sessions[index].take() {
            session.state = SessionState::Closed;
            session.registry.close_all(backend);
            let _ = self.poll.deregister(&session.stream);
            self.free.push(index);
        }
    }

    fn shutdown(&mut self, backend: &mut dyn UsbBackend) {
        for index in 0..self.sessions.len() {
            self.close_session(index, backend);
        }
    }
}
