//! Socket-callback reactor (spec.md §4.B): a single cooperative thread that
//! multiplexes `(socket, proc, arg, when-mask)` registrations over `mio`.
//! Cross-thread registration is funneled through a queue plus a wakeup pipe
//! so `register`/`cancel` calls from any thread cause the reactor to
//! re-examine its set on its next loop iteration. Grounded on this crate's predecessor's
//! `mio::Poll`/`Events` usage in `src/server.rs`, generalized from "one
//! fixed accept+read loop" to an arbitrary registered-callback set.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct When: u8 {
        const READ      = 0b0001;
        const WRITE     = 0b0010;
        const EXCEPTION = 0b0100;
        const EXIT      = 0b1000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Readable,
    Writable,
    Exception,
    Cancel,
    Exit,
}

/// Returning `false` removes the registration (spec.md §4.B "When `proc`
/// returns false, the registration is removed").
pub type Callback = Arc<dyn Fn(Reason) -> bool + Send + Sync>;

struct Registration {
    source_fd: std::os::unix::io::RawFd,
    mask: When,
    proc: Callback,
}

enum Command {
    Register(Token, Registration),
    Cancel(Token),
}

/// Handle used by any thread to register or cancel interest. The actual
/// `mio::Poll` installation happens on the reactor's own thread at the top
/// of its next loop iteration.
pub struct ReactorHandle {
    commands: Mutex<Vec<Command>>,
    wakeup_writer: Mutex<std::fs::File>,
    next_token: AtomicUsize,
}

impl ReactorHandle {
    pub fn register(&self, fd: std::os::unix::io::RawFd, mask: When, proc: Callback) -> Token {
        let token = Token(self.next_token.fetch_add(1, Ordering::SeqCst));
        self.commands.lock().unwrap().push(Command::Register(
            token,
            Registration { source_fd: fd, mask, proc },
        ));
        self.wake();
        token
    }

    pub fn cancel(&self, token: Token) {
        self.commands.lock().unwrap().push(Command::Cancel(token));
        self.wake();
    }

    fn wake(&self) {
        let _ = self.wakeup_writer.lock().unwrap().write_all(&[0u8]);
    }
}

const WAKEUP_TOKEN: Token = Token(usize::MAX);

/// Single-threaded reactor loop. `run` takes ownership of the thread it is
/// called from; callers spawn it on a dedicated thread and talk to it via
/// the returned [`ReactorHandle`].
pub struct Reactor {
    poll: Poll,
    registrations: HashMap<Token, Registration>,
    handle: Arc<ReactorHandle>,
    wakeup_reader: std::fs::File,
    shutdown: Arc<AtomicBool>,
}

impl Reactor {
    pub fn new(shutdown: Arc<AtomicBool>) -> io::Result<(Self, Arc<ReactorHandle>)> {
        let poll = Poll::new()?;
        let (reader_fd, writer_fd) = make_pipe()?;
        let wakeup_reader: std::fs::File = unsafe { std::os::unix::io::FromRawFd::from_raw_fd(reader_fd) };
        poll.registry()
            .register(&mut SourceFd(&reader_fd), WAKEUP_TOKEN, Interest::READABLE)?;

        let handle = Arc::new(ReactorHandle {
            commands: Mutex::new(Vec::new()),
            wakeup_writer: Mutex::new(unsafe { std::os::unix::io::FromRawFd::from_raw_fd(writer_fd) }),
            next_token: AtomicUsize::new(0),
        });

        Ok((
            Self {
                poll,
                registrations: HashMap::new(),
                handle: Arc::clone(&handle),
                wakeup_reader,
                shutdown,
            },
            handle,
        ))
    }

    /// Runs until `shutdown` is observed, at which point every registration
    /// whose mask contains `EXIT` is invoked with `Reason::Exit` before the
    /// loop returns (spec.md §4.B).
    pub fn run(mut self) {
        let mut events = Events::with_capacity(256);
        info!("reactor started");
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            if let Err(e) = self.poll.poll(&mut events, Some(std::time::Duration::from_millis(200))) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                warn!(error = %e, "reactor poll failed");
                break;
            }

            let mut drained_wakeup = false;
            for event in events.iter() {
                if event.token() == WAKEUP_TOKEN {
                    drained_wakeup = true;
                    continue;
                }
                let Some(registration) = self.registrations.get(&event.token()) else {
                    continue;
                };
                let reason = if event.is_readable() {
                    Reason::Readable
                } else if event.is_writable() {
                    Reason::Writable
                } else {
                    Reason::Exception
                };
                let keep = (registration.proc)(reason);
                if !keep {
                    self.deregister(event.token());
                }
            }
            if drained_wakeup {
                let mut buf = [0u8; 64];
                while self.wakeup_reader.read(&mut buf).map(|n| n > 0).unwrap_or(false) {}
            }

            self.apply_commands();
        }
        self.run_exit_callbacks();
        info!("reactor stopped");
    }

    /// Installs queued registrations/cancellations. Runs at the top of each
    /// loop iteration per spec.md §4.B ("actual installation happens at top
    /// of the reactor loop").
    fn apply_commands(&mut self) {
        let commands = std::mem::take(&mut *self.handle.commands.lock().unwrap());
        for command in commands {
            match command {
                Command::Register(token, registration) => {
                    let mut interest = None;
                    if registration.mask.contains(When::READ) {
                        interest = Some(Interest::READABLE);
                    }
                    if registration.mask.contains(When::WRITE) {
                        interest = Some(interest.map(|i| i | Interest::WRITABLE).unwrap_or(Interest::WRITABLE));
                    }
                    if let Some(interest) = interest {
                        let fd = registration.source_fd;
                        if self
                            .poll
                            .registry()
                            .register(&mut SourceFd(&fd), token, interest)
                            .is_ok()
                        {
                            self.registrations.insert(token, registration);
                        }
                    } else {
                        self.registrations.insert(token, registration);
                    }
                }
                Command::Cancel(token) => {
                    if let Some(registration) = self.registrations.remove(&token) {
                        (registration.proc)(Reason::Cancel);
                        let fd = registration.source_fd;
                        let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
                    }
                }
            }
        }
    }

    fn deregister(&mut self, token: Token) {
        if let Some(registration) = self.registrations.remove(&token) {
            let fd = registration.source_fd;
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
        }
    }

    fn run_exit_callbacks(&mut self) {
        for (_, registration) in self.registrations.drain() {
            if registration.mask.contains(When::EXIT) {
                (registration.proc)(Reason::Exit);
            }
        }
        debug!("exit callbacks drained");
    }
}

fn make_pipe() -> io::Result<(std::os::unix::io::RawFd, std::os::unix::io::RawFd)> {
    let mut fds = [0i32; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::time::Duration;

    #[test]
    fn exit_callbacks_run_once_on_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (reactor, handle) = Reactor::new(Arc::clone(&shutdown)).unwrap();

        let (reader_fd, _writer) = make_pipe().unwrap();
        let calls = Arc::new(StdAtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        handle.register(
            reader_fd,
            When::EXIT,
            Arc::new(move |reason| {
                if reason == Reason::Exit {
                    calls2.fetch_add(1, Ordering::SeqCst);
                }
                true
            }),
        );

        let join = std::thread::spawn(move || reactor.run());
        std::thread::sleep(Duration::from_millis(50));
        shutdown.store(true, Ordering::SeqCst);
        join.join().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_invokes_callback_exactly_once() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (reactor, handle) = Reactor::new(Arc::clone(&shutdown)).unwrap();
        let (reader_fd, _writer) = make_pipe().unwrap();
        let calls = Arc::new(StdAtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let token = handle.register(
            reader_fd,
            When::READ,
            Arc::new(move |reason| {
                if reason == Reason::Cancel {
                    calls2.fetch_add(1, Ordering::SeqCst);
                }
                true
            }),
        );

        let join = std::thread::spawn(move || reactor.run());
        std::thread::sleep(Duration::from_millis(50));
        handle.cancel(token);
        std::thread::sleep(Duration::from_millis(50));
        shutdown.store(true, Ordering::SeqCst);
        join.join().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
