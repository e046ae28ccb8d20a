//! In-memory duplex connection for exercising the protocol engine without
//! a network.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex};

use crate::{Connection, TransportError};

#[derive(Default)]
struct Channel {
    buf: Mutex<VecDeque<u8>>,
    closed: Mutex<bool>,
    ready: Condvar,
}

impl Channel {
    fn push(&self, data: &[u8]) {
        let mut buf = self.buf.lock().unwrap();
        buf.extend(data);
        self.ready.notify_all();
    }

    fn pull(&self, out: &mut [u8]) -> usize {
        let mut buf = self.buf.lock().unwrap();
        loop {
            if !buf.is_empty() {
                let n = out.len().min(buf.len());
                for slot in out.iter_mut().take(n) {
                    *slot = buf.pop_front().expect("len checked");
                }
                return n;
            }
            if *self.closed.lock().unwrap() {
                return 0;
            }
            buf = self.ready.wait(buf).unwrap();
        }
    }

    fn close(&self) {
        *self.closed.lock().unwrap() = true;
        self.ready.notify_all();
    }
}

/// One endpoint of an in-memory pipe pair.
pub struct DuplexPipe {
    incoming: Arc<Channel>,
    outgoing: Arc<Channel>,
    reader: PipeReader,
    writer: PipeWriter,
}

pub struct PipeReader {
    channel: Arc<Channel>,
}

pub struct PipeWriter {
    channel: Arc<Channel>,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.channel.pull(buf))
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.channel.push(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DuplexPipe {
    /// Create a connected pair: bytes written to one side are read from the
    /// other.
    pub fn pair() -> (DuplexPipe, DuplexPipe) {
        let a_to_b = Arc::new(Channel::default());
        let b_to_a = Arc::new(Channel::default());
        let a = DuplexPipe {
            incoming: b_to_a.clone(),
            outgoing: a_to_b.clone(),
            reader: PipeReader { channel: b_to_a.clone() },
            writer: PipeWriter { channel: a_to_b.clone() },
        };
        let b = DuplexPipe {
            incoming: a_to_b.clone(),
            outgoing: b_to_a.clone(),
            reader: PipeReader { channel: a_to_b },
            writer: PipeWriter { channel: b_to_a },
        };
        (a, b)
    }
}

impl Connection for DuplexPipe {
    fn reader(&mut self) -> &mut dyn Read {
        &mut self.reader
    }

    fn writer(&mut self) -> &mut dyn Write {
        &mut self.writer
    }

    fn close(self: Box<Self>) -> Result<(), TransportError> {
        self.incoming.close();
        self.outgoing.close();
        Ok(())
    }
}
