//! One mock member: a TCP listener with an ordered auto-responder chain.
//!
//! A member accepts connections on a background thread and decodes each
//! inbound message on a per-connection handler thread. Responders are
//! dispatched newest-installed-first; the first one to claim a request
//! stops the chain. The replica set installs its catch-all queue
//! forwarder before the handshake responder, so handshakes are answered
//! in place and only unclaimed traffic reaches the shared queue.

use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::constants::BIND_ADDR;
use crate::doc::Document;
use crate::error::{MockError, Result};
use crate::request::Request;
use crate::wire::{self, MessageBody};

/// An installed predicate+handler pair.
///
/// Returns `None` when it claimed (and answered or enqueued) the request,
/// or gives the request back so the next responder can try.
pub type AutoResponder = Box<dyn Fn(Request) -> Option<Request> + Send + Sync>;

/// Write side of one client connection, carried inside every [`Request`]
/// so a scripted reply can find its way back.
#[derive(Clone)]
pub struct ConnectionHandle {
    stream: Arc<Mutex<TcpStream>>,
    reply_id: Arc<AtomicI32>,
}

impl ConnectionHandle {
    pub(crate) fn new(stream: TcpStream) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
            reply_id: Arc::new(AtomicI32::new(1)),
        }
    }

    pub(crate) fn send_reply(
        &self,
        response_to: i32,
        flags: u32,
        cursor_id: i64,
        starting_from: i32,
        number_returned: i32,
        docs: &[Document],
    ) -> Result<()> {
        let request_id = self.reply_id.fetch_add(1, Ordering::Relaxed);
        let mut stream = self.stream.lock();
        wire::write_reply(
            &mut *stream,
            request_id,
            response_to,
            flags,
            cursor_id,
            starting_from,
            number_returned,
            docs,
        )
    }
}

struct ServerInner {
    responders: Mutex<Vec<AutoResponder>>,
    running: AtomicBool,
    verbose: AtomicBool,
    conn_streams: Mutex<Vec<TcpStream>>,
    conn_threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ServerInner {
    fn dispatch(&self, mut request: Request) {
        let responders = self.responders.lock();
        for responder in responders.iter().rev() {
            match responder(request) {
                None => return,
                Some(back) => request = back,
            }
        }
        warn!(request = %request.describe(), "no responder claimed request, dropping");
    }
}

/// One simulated node: listener, accept loop, responder chain.
pub struct MockServer {
    inner: Arc<ServerInner>,
    addr: Option<SocketAddr>,
    accept_thread: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Create a member. It does not listen until [`run`](MockServer::run).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServerInner {
                responders: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                verbose: AtomicBool::new(false),
                conn_streams: Mutex::new(Vec::new()),
                conn_threads: Mutex::new(Vec::new()),
            }),
            addr: None,
            accept_thread: None,
        }
    }

    /// Bind an unused localhost port and start the accept loop.
    ///
    /// A bind failure is fatal for the test; it is propagated, not
    /// retried. Calling `run` twice is a contract violation.
    pub fn run(&mut self) -> Result<()> {
        if self.accept_thread.is_some() {
            debug_assert!(false, "MockServer::run called twice");
            return Err(MockError::state("run called twice"));
        }
        let listener = TcpListener::bind(BIND_ADDR)
            .map_err(|e| MockError::socket(format!("bind failed: {}", e)))?;
        let addr = listener.local_addr()?;
        self.addr = Some(addr);
        self.inner.running.store(true, Ordering::Release);

        let inner = self.inner.clone();
        self.accept_thread = Some(thread::spawn(move || accept_loop(inner, listener, addr)));
        debug!(%addr, "mock server listening");
        Ok(())
    }

    /// "host:port" the member is listening on. Valid only after `run`.
    pub fn host_and_port(&self) -> String {
        self.addr
            .expect("host_and_port called before run")
            .to_string()
    }

    /// Toggle traffic logging for this member.
    pub fn set_verbose(&self, verbose: bool) {
        self.inner.verbose.store(verbose, Ordering::Relaxed);
    }

    /// Install a responder. Later installations are consulted first.
    pub fn autoresponds(&self, responder: AutoResponder) {
        self.inner.responders.lock().push(responder);
    }

    /// Install a canned topology-handshake responder answering any
    /// `ismaster`/`hello` command with `doc`. Installed on top of the
    /// chain so handshakes never fall through to the catch-all.
    pub fn auto_hello(&self, doc: Document) {
        self.autoresponds(Box::new(move |request: Request| {
            if !is_handshake(request.body()) {
                return Some(request);
            }
            if let Err(e) = request.replies(0, 0, 0, 1, std::slice::from_ref(&doc)) {
                warn!(error = %e, "failed to send handshake reply");
            }
            None
        }));
    }

    /// Close the listener, tear down live connections, and join every
    /// background thread. Idempotent; also runs on drop.
    pub fn stop(&mut self) {
        self.inner.running.store(false, Ordering::Release);

        if let Some(handle) = self.accept_thread.take() {
            // Unblock the accept call so the loop observes the flag.
            if let Some(addr) = self.addr {
                let _ = TcpStream::connect(addr);
            }
            let _ = handle.join();
        }

        for stream in self.inner.conn_streams.lock().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
        let threads: Vec<_> = self.inner.conn_threads.lock().drain(..).collect();
        for handle in threads {
            let _ = handle.join();
        }
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_handshake(body: &MessageBody) -> bool {
    match body {
        MessageBody::Query { ns, query, .. } => {
            ns.ends_with(".$cmd")
                && query.as_object().is_some_and(|q| {
                    q.keys()
                        .next()
                        .is_some_and(|k| k.eq_ignore_ascii_case("ismaster") || k == "hello")
                })
        }
        _ => false,
    }
}

fn accept_loop(inner: Arc<ServerInner>, listener: TcpListener, addr: SocketAddr) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                if !inner.running.load(Ordering::Acquire) {
                    break;
                }
                let clone_for_shutdown = match stream.try_clone() {
                    Ok(clone) => clone,
                    Err(e) => {
                        warn!(error = %e, "could not clone connection, dropping it");
                        continue;
                    }
                };
                inner.conn_streams.lock().push(clone_for_shutdown);

                let conn_inner = inner.clone();
                let handle = thread::spawn(move || {
                    connection_loop(conn_inner, stream, peer, addr.to_string());
                });
                inner.conn_threads.lock().push(handle);
            }
            Err(e) => {
                if !inner.running.load(Ordering::Acquire) {
                    break;
                }
                warn!(error = %e, "accept failed");
            }
        }
    }
}

fn connection_loop(
    inner: Arc<ServerInner>,
    stream: TcpStream,
    peer: SocketAddr,
    server_host: String,
) {
    let writer = match stream.try_clone() {
        Ok(clone) => ConnectionHandle::new(clone),
        Err(e) => {
            warn!(error = %e, "could not clone connection for replies");
            return;
        }
    };
    let mut reader = stream;

    loop {
        match wire::read_message(&mut reader) {
            Ok(Some(msg)) => {
                let request = Request::new(msg, peer, server_host.clone(), writer.clone());
                if inner.verbose.load(Ordering::Relaxed) {
                    debug!(server = %server_host, client = %peer, request = %request.describe(),
                        "request received");
                }
                inner.dispatch(request);
            }
            Ok(None) => break,
            Err(e) => {
                if inner.running.load(Ordering::Acquire) {
                    debug!(error = %e, client = %peer, "connection error");
                }
                break;
            }
        }
    }
}
