//! IO handling for syscalls.
//!
//! The interface syscalls use to perform IO is defined with the [`SyscallIO`] trait.
//!
//! Besides this key item, this module also includes:
//! - [`EmptyIO`]: A `SyscallIO` holding the implementation for a lack of IO support.
//! - [`BufferedIO`]: A `SyscallIO` holding a buffered implementation for IO.
//! - [`ChannelIO`]: A `SyscallIO` holding a threaded/channel implementation for IO,
//!     whose blocking reads can be cancelled from other threads.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard};
use std::thread::JoinHandle;

use crossbeam_channel as cbc;

/// A logical stream a program can read from or write to.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum IOStream {
    /// Program input.
    Stdin,
    /// Program output.
    Stdout,
    /// Program error output.
    Stderr
}

/// Errors that can occur from reading input.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum ReadErr {
    /// The read was cancelled with [`SyscallIO::cancel_read`] before any input arrived.
    Cancelled,
    /// There is no more input.
    Closed,
    /// The input could not be interpreted as the requested type.
    Malformed(String)
}
impl std::fmt::Display for ReadErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadErr::Cancelled => f.write_str("read was cancelled"),
            ReadErr::Closed    => f.write_str("input is closed"),
            ReadErr::Malformed(s) => write!(f, "could not parse input {s:?}"),
        }
    }
}
impl std::error::Error for ReadErr {}

/// The IO capability used by the simulator to execute syscalls.
///
/// Writes should never block beyond handing off the data.
/// Reads may block until input is available,
/// but must return [`ReadErr::Cancelled`] promptly once [`SyscallIO::cancel_read`] is called.
pub trait SyscallIO: Send + Sync {
    /// Reads a line from the stream (not including the line terminator).
    ///
    /// This can block until a full line is available.
    fn read_line(&self, stream: IOStream) -> Result<String, ReadErr>;

    /// Reads a single byte from the stream.
    ///
    /// This can block until a byte is available.
    fn read_char(&self, stream: IOStream) -> Result<u8, ReadErr>;

    /// Writes bytes to the stream.
    fn write(&self, stream: IOStream, data: &[u8]);

    /// Aborts a currently blocked read, which then returns [`ReadErr::Cancelled`].
    ///
    /// This can be called from any thread.
    /// If no read is blocked, this does nothing.
    fn cancel_read(&self);

    /// Waits until all written output has been delivered.
    fn flush(&self) {}

    /// Reads a line and parses it as a decimal integer.
    fn read_int(&self, stream: IOStream) -> Result<i32, ReadErr> {
        let line = self.read_line(stream)?;
        line.trim().parse().map_err(|_| ReadErr::Malformed(line))
    }
    /// Writes an integer in decimal.
    fn print_int(&self, stream: IOStream, value: i32) {
        self.write(stream, value.to_string().as_bytes());
    }
    /// Writes a string.
    fn print_string(&self, stream: IOStream, value: &[u8]) {
        self.write(stream, value);
    }
    /// Writes a single character.
    fn print_char(&self, stream: IOStream, value: u8) {
        self.write(stream, &[value]);
    }
}
impl dyn SyscallIO {} // assert SyscallIO is dyn safe

/// No IO. All reads report closed input and all writes are discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyIO;
impl SyscallIO for EmptyIO {
    fn read_line(&self, _stream: IOStream) -> Result<String, ReadErr> {
        Err(ReadErr::Closed)
    }

    fn read_char(&self, _stream: IOStream) -> Result<u8, ReadErr> {
        Err(ReadErr::Closed)
    }

    fn write(&self, _stream: IOStream, _data: &[u8]) {}

    fn cancel_read(&self) {}
}

/// IO that reads from an input buffer and writes to output buffers.
///
/// The buffers can be accessed in code via [`BufferedIO::get_input`], [`BufferedIO::get_output`],
/// and [`BufferedIO::get_error`].
///
/// Reads never block. If the input buffer runs out, the read reports closed input.
///
/// ```
/// use mips_ensemble::sim::io::{BufferedIO, IOStream, SyscallIO};
///
/// let io = BufferedIO::with_input("12\nabc");
/// assert_eq!(io.read_int(IOStream::Stdin), Ok(12));
/// assert_eq!(io.read_line(IOStream::Stdin).as_deref(), Ok("abc"));
///
/// io.print_int(IOStream::Stdout, -5);
/// assert_eq!(io.output_string(), "-5");
/// ```
#[derive(Clone, Default)]
pub struct BufferedIO {
    input: Arc<RwLock<VecDeque<u8>>>,
    output: Arc<RwLock<Vec<u8>>>,
    error: Arc<RwLock<Vec<u8>>>
}
impl BufferedIO {
    /// Creates a new BufferedIO.
    pub fn new() -> Self {
        Default::default()
    }
    /// Creates a new BufferedIO with some initial input.
    pub fn with_input(input: impl AsRef<[u8]>) -> Self {
        let io = Self::new();
        io.push_input(input);
        io
    }

    fn lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
        lock.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends bytes to the input buffer.
    pub fn push_input(&self, input: impl AsRef<[u8]>) {
        Self::lock(&self.input).extend(input.as_ref());
    }
    /// Gets a reference to the input buffer.
    pub fn get_input(&self) -> &Arc<RwLock<VecDeque<u8>>> {
        &self.input
    }
    /// Gets a reference to the output buffer.
    pub fn get_output(&self) -> &Arc<RwLock<Vec<u8>>> {
        &self.output
    }
    /// Gets a reference to the error buffer.
    pub fn get_error(&self) -> &Arc<RwLock<Vec<u8>>> {
        &self.error
    }
    /// Copies the output buffer into a string.
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&Self::lock(&self.output)).into_owned()
    }
}
impl std::fmt::Debug for BufferedIO {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedIO").finish_non_exhaustive()
    }
}
impl SyscallIO for BufferedIO {
    fn read_line(&self, _stream: IOStream) -> Result<String, ReadErr> {
        let mut input = Self::lock(&self.input);
        if input.is_empty() { return Err(ReadErr::Closed) };

        let end = input.iter().position(|&b| b == b'\n');
        let len = end.unwrap_or(input.len());
        let line: Vec<_> = input.drain(..len).collect();
        if end.is_some() {
            input.pop_front();
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    fn read_char(&self, _stream: IOStream) -> Result<u8, ReadErr> {
        Self::lock(&self.input)
            .pop_front()
            .ok_or(ReadErr::Closed)
    }

    fn write(&self, stream: IOStream, data: &[u8]) {
        let buf = match stream {
            IOStream::Stderr => &self.error,
            _ => &self.output,
        };
        Self::lock(buf).extend_from_slice(data);
    }

    fn cancel_read(&self) {}
}

/// A helper struct for [`ChannelIO::new`],
/// indicating the channel is closed and no more reads/writes will come from it.
#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stop;

enum Output {
    Data(IOStream, Vec<u8>),
    Flush(cbc::Sender<()>)
}

/// An IO that reads from one channel and writes to another.
///
/// Input bytes are produced by a reader thread, and output is consumed by a writer thread,
/// so neither the simulator nor the user of this IO blocks the other.
///
/// A blocked read waits on both the input channel and a cancellation channel,
/// so [`SyscallIO::cancel_read`] wakes it immediately.
/// Any part of a line read before cancellation is kept for the next read.
pub struct ChannelIO {
    read_data: cbc::Receiver<u8>,
    #[allow(unused)]
    read_handler: JoinHandle<()>,

    write_data: cbc::Sender<Output>,
    write_handler: JoinHandle<()>,

    cancel_tx: cbc::Sender<()>,
    cancel_rx: cbc::Receiver<()>,
    /// Whether a read is currently blocked, alongside the partially read line.
    read_state: Mutex<ReadState>,
}
#[derive(Default)]
struct ReadState {
    reading: bool,
    pending: Vec<u8>
}

impl ChannelIO {
    /// Creates a new channel IO with the given reader and writer.
    ///
    /// This calls the reader function every time the IO input needs a byte.
    /// The reader function should block until a byte is ready, or return Stop
    /// if there are no more bytes to read.
    ///
    /// This calls the writer function every time bytes need to be written to the
    /// IO output.
    ///
    /// This uses threads to read and write from input and output.
    /// The reader thread reads ahead by at most one byte.
    pub fn new(
        mut reader: impl FnMut() -> Result<u8, Stop> + Send + 'static,
        mut writer: impl FnMut(IOStream, &[u8]) -> Result<(), Stop> + Send + 'static
    ) -> Self {
        let (read_tx, read_rx) = cbc::bounded(1);
        let (write_tx, write_rx) = cbc::unbounded();
        let (cancel_tx, cancel_rx) = cbc::bounded(1);

        // Reader thread:
        let read_handler = std::thread::spawn(move || loop {
            let Ok(byte) = reader() else { return };
            let Ok(()) = read_tx.send(byte) else { return };
        });

        // Writer thread:
        let write_handler = std::thread::spawn(move || {
            for msg in write_rx {
                match msg {
                    Output::Data(stream, data) => {
                        let Ok(()) = writer(stream, &data) else { return };
                    },
                    Output::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });

        Self {
            read_data: read_rx,
            read_handler,
            write_data: write_tx,
            write_handler,
            cancel_tx,
            cancel_rx,
            read_state: Default::default(),
        }
    }

    /// Creates a channel IO with stdin being the read data and stdout/stderr being the write data.
    ///
    /// Note that due to how stdin works in terminals, data is only sent once a new line is typed.
    /// Additionally, this flushes the output every time it is written.
    pub fn stdio() -> Self {
        use std::io::{self, BufRead, Write};

        Self::new(
            || {
                let mut stdin = io::stdin().lock();
                let byte = match stdin.fill_buf() {
                    Ok(&[byte, ..]) => byte,
                    _ => return Err(Stop),
                };

                stdin.consume(1);
                Ok(byte)
            },
            |stream, data| {
                let result = match stream {
                    IOStream::Stderr => io::stderr().write_all(data).and_then(|_| io::stderr().flush()),
                    _ => io::stdout().write_all(data).and_then(|_| io::stdout().flush()),
                };
                result.map_err(|_| Stop)
            }
        )
    }

    fn state(&self) -> MutexGuard<'_, ReadState> {
        self.read_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks on the next input byte, or until a cancellation.
    fn recv_byte(&self) -> Result<u8, ReadErr> {
        cbc::select! {
            recv(self.read_data) -> msg => msg.map_err(|_| ReadErr::Closed),
            recv(self.cancel_rx) -> _ => Err(ReadErr::Cancelled),
        }
    }

    /// Marks a read as in progress for the duration of `f`.
    fn reading<T>(&self, f: impl FnOnce(&Self) -> T) -> T {
        {
            let mut state = self.state();
            state.reading = true;
            // Cancels requested before this read started don't apply to it.
            while self.cancel_rx.try_recv().is_ok() {}
        }
        let result = f(self);
        self.state().reading = false;
        result
    }

    /// Closes the channels and waits for all output to be written.
    pub fn close(self) {
        let Self { write_data, write_handler, .. } = self;
        std::mem::drop(write_data);

        // We're not going to wait for the read handler,
        // because it can hang on reading.
        let _ = write_handler.join();
    }
}
impl std::fmt::Debug for ChannelIO {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelIO").finish_non_exhaustive()
    }
}
impl SyscallIO for ChannelIO {
    fn read_line(&self, _stream: IOStream) -> Result<String, ReadErr> {
        self.reading(|io| loop {
            match io.recv_byte() {
                Ok(b'\n') => {
                    let line = std::mem::take(&mut io.state().pending);
                    break Ok(String::from_utf8_lossy(&line).into_owned());
                },
                Ok(b) => io.state().pending.push(b),
                Err(ReadErr::Closed) => {
                    let line = std::mem::take(&mut io.state().pending);
                    break match line.is_empty() {
                        true  => Err(ReadErr::Closed),
                        false => Ok(String::from_utf8_lossy(&line).into_owned()),
                    };
                },
                Err(e) => break Err(e),
            }
        })
    }

    fn read_char(&self, _stream: IOStream) -> Result<u8, ReadErr> {
        {
            let mut state = self.state();
            if !state.pending.is_empty() {
                return Ok(state.pending.remove(0));
            }
        }
        self.reading(Self::recv_byte)
    }

    fn write(&self, stream: IOStream, data: &[u8]) {
        // If the writer stopped, there's nowhere for the output to go.
        let _ = self.write_data.send(Output::Data(stream, data.to_vec()));
    }

    fn cancel_read(&self) {
        if self.state().reading {
            let _ = self.cancel_tx.try_send(());
        }
    }

    fn flush(&self) {
        let (ack_tx, ack_rx) = cbc::bounded(1);
        if self.write_data.send(Output::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel as cbc;

    use super::*;

    fn channel_io() -> (ChannelIO, cbc::Sender<u8>, cbc::Receiver<(IOStream, Vec<u8>)>) {
        let (in_tx, in_rx) = cbc::unbounded::<u8>();
        let (out_tx, out_rx) = cbc::unbounded();
        let io = ChannelIO::new(
            move || in_rx.recv().map_err(|_| Stop),
            move |stream, data| out_tx.send((stream, data.to_vec())).map_err(|_| Stop)
        );
        (io, in_tx, out_rx)
    }

    #[test]
    fn test_empty() {
        assert_eq!(EmptyIO.read_int(IOStream::Stdin), Err(ReadErr::Closed));
        assert_eq!(EmptyIO.read_char(IOStream::Stdin), Err(ReadErr::Closed));
        EmptyIO.cancel_read();
    }

    #[test]
    fn test_buffered() {
        let io = BufferedIO::with_input("x\n 42 \nnope\nab");
        assert_eq!(io.read_char(IOStream::Stdin), Ok(b'x'));
        assert_eq!(io.read_line(IOStream::Stdin).as_deref(), Ok(""));
        assert_eq!(io.read_int(IOStream::Stdin), Ok(42));
        assert_eq!(io.read_int(IOStream::Stdin), Err(ReadErr::Malformed("nope".into())));
        assert_eq!(io.read_line(IOStream::Stdin).as_deref(), Ok("ab"));
        assert_eq!(io.read_line(IOStream::Stdin), Err(ReadErr::Closed));

        io.print_string(IOStream::Stdout, b"hello ");
        io.print_char(IOStream::Stdout, b'!');
        io.print_string(IOStream::Stderr, b"oops");
        assert_eq!(io.output_string(), "hello !");
        assert_eq!(*io.get_error().read().unwrap(), b"oops");
    }

    #[test]
    fn test_channel_read_write() {
        let (io, in_tx, out_rx) = channel_io();
        for &b in b"-17\nz" {
            in_tx.send(b).unwrap();
        }
        assert_eq!(io.read_int(IOStream::Stdin), Ok(-17));
        assert_eq!(io.read_char(IOStream::Stdin), Ok(b'z'));

        io.print_int(IOStream::Stdout, 5);
        io.flush();
        assert_eq!(out_rx.try_recv(), Ok((IOStream::Stdout, b"5".to_vec())));

        drop(in_tx);
        assert_eq!(io.read_line(IOStream::Stdin), Err(ReadErr::Closed));
        io.close();
    }

    #[test]
    fn test_channel_cancel() {
        let (io, in_tx, _out_rx) = channel_io();
        let io = Arc::new(io);

        let reader = std::thread::spawn({
            let io = Arc::clone(&io);
            move || io.read_int(IOStream::Stdin)
        });

        // Send part of a line, then cancel once the read is blocked.
        in_tx.send(b'1').unwrap();
        while io.state().pending.is_empty() {
            std::thread::sleep(Duration::from_millis(1));
        }
        io.cancel_read();
        assert_eq!(reader.join().unwrap(), Err(ReadErr::Cancelled));

        // Cancelling with no read in progress does nothing,
        // and the partial line is kept.
        io.cancel_read();
        in_tx.send(b'2').unwrap();
        in_tx.send(b'\n').unwrap();
        assert_eq!(io.read_int(IOStream::Stdin), Ok(12));
    }
}
