//! Terminal acquisition and lifecycle. The runtime refuses to start without
//! a controlling terminal: when stdin or stdout is not a TTY it falls back
//! to `/dev/tty` (`CONIN$`/`CONOUT$` on Windows) and reports `NoTty` if
//! that fails, leaving the process untouched.

use std::fs::File;
use std::io::Write;

use crossterm::cursor::Hide;
use crossterm::cursor::Show;
use crossterm::event::DisableBracketedPaste;
use crossterm::event::DisableMouseCapture;
use crossterm::event::EnableBracketedPaste;
use crossterm::event::EnableMouseCapture;
use crossterm::execute;
use crossterm::terminal::EnterAlternateScreen;
use crossterm::terminal::LeaveAlternateScreen;
use crossterm::terminal::disable_raw_mode;
use crossterm::terminal::enable_raw_mode;
use crossterm::tty::IsTty;

use crate::TuiError;

/// Where rendered frames go: process stdout when it is a terminal,
/// otherwise the controlling TTY.
pub(crate) enum TerminalWriter {
    Stdout(std::io::Stdout),
    Tty(File),
}

impl Write for TerminalWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            TerminalWriter::Stdout(w) => w.write(buf),
            TerminalWriter::Tty(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            TerminalWriter::Stdout(w) => w.flush(),
            TerminalWriter::Tty(w) => w.flush(),
        }
    }
}

/// Byte source for the input reader thread.
pub(crate) struct InputSource {
    #[cfg(unix)]
    fd: std::os::unix::io::RawFd,
    /// Keeps an opened `/dev/tty` (or `CONIN$`) alive for the fd above.
    #[cfg_attr(unix, allow(dead_code))]
    owned: Option<File>,
}

impl InputSource {
    /// Blocks for at most `timeout_ms` waiting for input. Returns 0 bytes
    /// on timeout so the reader can observe cancellation and pump the
    /// escape-disambiguation timer.
    #[cfg(unix)]
    pub(crate) fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: i32) -> std::io::Result<usize> {
        let mut pollfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        if ready == 0 {
            return Ok(0);
        }
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(n as usize)
    }

    #[cfg(windows)]
    pub(crate) fn read_timeout(&mut self, buf: &mut [u8], _timeout_ms: i32) -> std::io::Result<usize> {
        use std::io::Read;
        // The Windows console has no portable poll; the reader relies on
        // small blocking reads and exits when the channel closes.
        match &mut self.owned {
            Some(file) => file.read(buf),
            None => std::io::stdin().read(buf),
        }
    }
}

pub(crate) struct TerminalIo {
    pub(crate) input: InputSource,
    pub(crate) output: TerminalWriter,
}

/// Finds a usable terminal or fails with `NoTty` without side effects.
pub(crate) fn acquire() -> Result<TerminalIo, TuiError> {
    let input = acquire_input()?;
    let output = if std::io::stdout().is_tty() {
        TerminalWriter::Stdout(std::io::stdout())
    } else {
        TerminalWriter::Tty(open_tty(false)?)
    };
    Ok(TerminalIo { input, output })
}

#[cfg(unix)]
fn acquire_input() -> Result<InputSource, TuiError> {
    use std::os::unix::io::AsRawFd;

    if std::io::stdin().is_tty() {
        return Ok(InputSource {
            fd: std::io::stdin().as_raw_fd(),
            owned: None,
        });
    }
    let tty = open_tty(true)?;
    Ok(InputSource {
        fd: tty.as_raw_fd(),
        owned: Some(tty),
    })
}

#[cfg(windows)]
fn acquire_input() -> Result<InputSource, TuiError> {
    if std::io::stdin().is_tty() {
        return Ok(InputSource { owned: None });
    }
    Ok(InputSource {
        owned: Some(open_tty(true)?),
    })
}

fn open_tty(read: bool) -> Result<File, TuiError> {
    #[cfg(unix)]
    let path = "/dev/tty";
    #[cfg(windows)]
    let path = if read { "CONIN$" } else { "CONOUT$" };

    std::fs::OpenOptions::new()
        .read(read)
        .write(!read || cfg!(windows))
        .open(path)
        .map_err(|_| TuiError::NoTty)
}

/// One reversible step of terminal setup. Undone in LIFO order on exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    RawMode,
    AltScreen,
    HiddenCursor,
    BracketedPaste,
    MouseCapture,
}

#[derive(Debug, Default)]
pub(crate) struct RestoreStack {
    steps: Vec<Step>,
}

/// Enters the terminal: raw mode, alternate screen, hidden cursor,
/// bracketed paste, and (when requested) mouse capture, in that order.
/// On Windows, raw-mode entry also turns on virtual-terminal processing so
/// the ANSI sequences the renderer emits are interpreted.
pub(crate) fn enter(w: &mut impl Write, mouse: bool) -> std::io::Result<RestoreStack> {
    let mut stack = RestoreStack::default();
    enable_raw_mode()?;
    stack.steps.push(Step::RawMode);
    execute!(w, EnterAlternateScreen)?;
    stack.steps.push(Step::AltScreen);
    execute!(w, Hide)?;
    stack.steps.push(Step::HiddenCursor);
    execute!(w, EnableBracketedPaste)?;
    stack.steps.push(Step::BracketedPaste);
    if mouse {
        execute!(w, EnableMouseCapture)?;
        stack.steps.push(Step::MouseCapture);
    }
    Ok(stack)
}

/// Reverses every enable, last first. Errors are swallowed so a failing
/// step cannot leave earlier steps unrestored.
pub(crate) fn exit(w: &mut impl Write, stack: &mut RestoreStack) {
    while let Some(step) = stack.steps.pop() {
        let _ = match step {
            Step::MouseCapture => execute!(w, DisableMouseCapture),
            Step::BracketedPaste => execute!(w, DisableBracketedPaste),
            Step::HiddenCursor => execute!(w, Show),
            Step::AltScreen => execute!(w, LeaveAlternateScreen),
            Step::RawMode => disable_raw_mode(),
        };
    }
}

pub(crate) fn size() -> std::io::Result<(u16, u16)> {
    crossterm::terminal::size()
}

/// Best-effort cooked-mode restore for the panic hook: show the cursor,
/// leave the alternate screen, drop the input modes, and exit raw mode so
/// the crash report lands on a usable terminal.
pub(crate) fn emergency_restore() {
    let mut stdout = std::io::stdout();
    let _ = execute!(
        stdout,
        DisableMouseCapture,
        DisableBracketedPaste,
        Show,
        LeaveAlternateScreen
    );
    let _ = disable_raw_mode();
}

/// Exits the terminal, stops the process, and re-enters once continued.
/// Unix only; a no-op elsewhere.
#[cfg(unix)]
pub(crate) fn suspend(w: &mut impl Write, stack: &mut RestoreStack, mouse: bool) -> std::io::Result<()> {
    exit(w, stack);
    unsafe {
        libc::raise(libc::SIGTSTP);
    }
    // Execution resumes here after SIGCONT.
    *stack = enter(w, mouse)?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn suspend(_w: &mut impl Write, _stack: &mut RestoreStack, _mouse: bool) -> std::io::Result<()> {
    Ok(())
}
