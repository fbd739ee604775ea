//! The filehandle surface the core traffics in.
//!
//! A handle is a backend plus the layer stack applied at `open` time.
//! The byte-oriented layers (`:raw`, `:crlf`) change what `readline` and
//! `write` do; the encoding layers are carried as markers so `binmode`
//! introspection round-trips, with the stream itself operating on UTF-8
//! text.

use std::cell::RefCell;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

use camel_asm::ErrorKind;

/// Shared handle to a filehandle.
pub type IoRef = Rc<RefCell<FileHandle>>;

/// One element of the `open`-time layer stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layer {
    /// Pass bytes through untouched.
    Raw,
    /// Translate line endings on read and write.
    Crlf,
    /// Character semantics.
    Utf8,
    /// A named encoding, e.g. `encoding(iso-8859-1)`.
    Encoding(Rc<str>),
}

/// Where the bytes come from or go to.
pub enum IoBackend {
    /// Process standard input.
    Stdin,
    /// Process standard output.
    Stdout,
    /// Process standard error.
    Stderr,
    /// An open file.
    File(File),
    /// An in-memory stream, for `open` on a scalar and for tests.
    Memory(Cursor<Vec<u8>>),
    /// A closed handle; every operation fails.
    Closed,
}

impl std::fmt::Debug for IoBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stdin => "Stdin",
            Self::Stdout => "Stdout",
            Self::Stderr => "Stderr",
            Self::File(_) => "File",
            Self::Memory(_) => "Memory",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// A filehandle with its layer stack.
#[derive(Debug)]
pub struct FileHandle {
    backend: IoBackend,
    layers: Vec<Layer>,
    eof: bool,
}

impl FileHandle {
    /// Handle over a backend with an explicit layer stack.
    pub fn new(backend: IoBackend, layers: Vec<Layer>) -> Self {
        Self {
            backend,
            layers,
            eof: false,
        }
    }

    /// Shared handle.
    pub fn new_ref(backend: IoBackend, layers: Vec<Layer>) -> IoRef {
        Rc::new(RefCell::new(Self::new(backend, layers)))
    }

    /// In-memory handle over the given bytes.
    pub fn memory(bytes: Vec<u8>) -> IoRef {
        Self::new_ref(IoBackend::Memory(Cursor::new(bytes)), vec![Layer::Raw])
    }

    /// The layer stack as applied at open time.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// `true` once a read has hit end-of-stream.
    pub fn eof(&self) -> bool {
        self.eof
    }

    fn crlf(&self) -> bool {
        self.layers.contains(&Layer::Crlf)
    }

    /// Reads up to `len` bytes, returning what was read.
    pub fn read(&mut self, len: usize) -> Result<Vec<u8>, ErrorKind> {
        let mut buf = vec![0u8; len];
        let n = match &mut self.backend {
            IoBackend::Stdin => std::io::stdin().read(&mut buf),
            IoBackend::File(f) => f.read(&mut buf),
            IoBackend::Memory(m) => m.read(&mut buf),
            IoBackend::Stdout | IoBackend::Stderr => return Err(ErrorKind::IoError),
            IoBackend::Closed => return Err(ErrorKind::IoError),
        }
        .map_err(|_| ErrorKind::IoError)?;
        if n == 0 && len > 0 {
            self.eof = true;
        }
        buf.truncate(n);
        Ok(buf)
    }

    /// Reads one line including its terminator; `None` at end-of-stream.
    /// Under the `:crlf` layer a trailing `\r\n` is delivered as `\n`.
    pub fn readline(&mut self) -> Result<Option<String>, ErrorKind> {
        let mut line = Vec::new();
        loop {
            let byte = self.read(1)?;
            match byte.first() {
                None => break,
                Some(&b) => {
                    line.push(b);
                    if b == b'\n' {
                        break;
                    }
                }
            }
        }
        if line.is_empty() {
            self.eof = true;
            return Ok(None);
        }
        if self.crlf() && line.ends_with(b"\r\n") {
            let cut = line.len() - 2;
            line.truncate(cut);
            line.push(b'\n');
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    /// Writes a string through the layer stack.
    pub fn write(&mut self, text: &str) -> Result<(), ErrorKind> {
        let bytes: Vec<u8> = if self.crlf() {
            text.bytes()
                .flat_map(|b| {
                    if b == b'\n' {
                        vec![b'\r', b'\n']
                    } else {
                        vec![b]
                    }
                })
                .collect()
        } else {
            text.as_bytes().to_vec()
        };
        match &mut self.backend {
            IoBackend::Stdout => std::io::stdout().write_all(&bytes),
            IoBackend::Stderr => std::io::stderr().write_all(&bytes),
            IoBackend::File(f) => f.write_all(&bytes),
            IoBackend::Memory(m) => m.write_all(&bytes),
            IoBackend::Stdin | IoBackend::Closed => return Err(ErrorKind::IoError),
        }
        .map_err(|_| ErrorKind::IoError)
    }

    /// Flushes buffered output.
    pub fn flush(&mut self) -> Result<(), ErrorKind> {
        match &mut self.backend {
            IoBackend::Stdout => std::io::stdout().flush(),
            IoBackend::Stderr => std::io::stderr().flush(),
            IoBackend::File(f) => f.flush(),
            IoBackend::Memory(_) | IoBackend::Stdin => Ok(()),
            IoBackend::Closed => return Err(ErrorKind::IoError),
        }
        .map_err(|_| ErrorKind::IoError)
    }

    /// Repositions seekable backends.
    pub fn seek(&mut self, pos: i64, whence: u8) -> Result<u64, ErrorKind> {
        let from = match whence {
            1 => SeekFrom::Current(pos),
            2 => SeekFrom::End(pos),
            _ => SeekFrom::Start(pos.max(0) as u64),
        };
        let at = match &mut self.backend {
            IoBackend::File(f) => f.seek(from),
            IoBackend::Memory(m) => m.seek(from),
            _ => return Err(ErrorKind::IoError),
        }
        .map_err(|_| ErrorKind::IoError)?;
        self.eof = false;
        Ok(at)
    }

    /// Current position of seekable backends.
    pub fn tell(&mut self) -> Result<u64, ErrorKind> {
        match &mut self.backend {
            IoBackend::File(f) => f.stream_position(),
            IoBackend::Memory(m) => m.stream_position(),
            _ => return Err(ErrorKind::IoError),
        }
        .map_err(|_| ErrorKind::IoError)
    }

    /// Closes the handle; further operations fail.
    pub fn close(&mut self) -> Result<(), ErrorKind> {
        self.flush().ok();
        self.backend = IoBackend::Closed;
        Ok(())
    }

    /// Bytes written so far, for in-memory handles.
    pub fn memory_contents(&self) -> Option<Vec<u8>> {
        match &self.backend {
            IoBackend::Memory(m) => Some(m.get_ref().clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readline_splits_on_newline() {
        let fh = FileHandle::memory(b"one\ntwo\nthree".to_vec());
        let mut fh = fh.borrow_mut();
        assert_eq!(fh.readline().unwrap().as_deref(), Some("one\n"));
        assert_eq!(fh.readline().unwrap().as_deref(), Some("two\n"));
        assert_eq!(fh.readline().unwrap().as_deref(), Some("three"));
        assert_eq!(fh.readline().unwrap(), None);
        assert!(fh.eof());
    }

    #[test]
    fn crlf_layer_translates_both_ways() {
        let fh = FileHandle::new_ref(
            IoBackend::Memory(Cursor::new(b"a\r\nb\r\n".to_vec())),
            vec![Layer::Crlf],
        );
        {
            let mut fh = fh.borrow_mut();
            assert_eq!(fh.readline().unwrap().as_deref(), Some("a\n"));
        }
        {
            let mut fh = fh.borrow_mut();
            fh.seek(0, 0).unwrap();
            fh.write("x\n").unwrap();
        }
        let contents = fh.borrow().memory_contents().unwrap();
        assert!(contents.starts_with(b"x\r\n"));
    }

    #[test]
    fn closed_handles_fail() {
        let fh = FileHandle::memory(Vec::new());
        let mut fh = fh.borrow_mut();
        fh.close().unwrap();
        assert_eq!(fh.write("x"), Err(ErrorKind::IoError));
        assert_eq!(fh.read(1), Err(ErrorKind::IoError));
    }

    #[test]
    fn seek_and_tell_round_trip() {
        let fh = FileHandle::memory(b"abcdef".to_vec());
        let mut fh = fh.borrow_mut();
        fh.seek(4, 0).unwrap();
        assert_eq!(fh.tell().unwrap(), 4);
        assert_eq!(fh.read(2).unwrap(), b"ef".to_vec());
    }
}
