//! Input transport: presents any supported container as a blocking byte
//! stream.
//!
//! `.gz` files are inflated in-process; `.bz2` and `.xz` are piped through
//! the system decompressors as child processes, which is also how the
//! encoder's output side works -- the codec itself only ever sees a
//! sequential stream.

use crate::error::{Result, ZdwError};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};

pub struct InputStream {
    inner: BufReader<Box<dyn Read + Send>>,
    /// Decompressor child process, reaped on drop.
    child: Option<Child>,
    eof: bool,
}

impl InputStream {
    /// Open a `.zdw*` path, choosing the transport from its extension.
    pub fn open(path: &Path) -> Result<InputStream> {
        let name = path.to_string_lossy();
        if name.ends_with(".gz") {
            let file = File::open(path)
                .map_err(|_| ZdwError::FileOpenErr(name.into_owned()))?;
            return Ok(Self::from_reader(Box::new(MultiGzDecoder::new(file))));
        }
        if name.ends_with(".bz2") {
            return Self::from_command(
                Command::new("bzip2").arg("-d").arg("--stdout").arg(path),
                &name,
            );
        }
        if name.ends_with(".xz") {
            return Self::from_command(
                Command::new("xz").arg("-d").arg("--stdout").arg(path),
                &name,
            );
        }
        let file =
            File::open(path).map_err(|_| ZdwError::FileOpenErr(name.into_owned()))?;
        Ok(Self::from_reader(Box::new(file)))
    }

    /// Read raw ZDW bytes from standard input.
    pub fn from_stdin() -> InputStream {
        Self::from_reader(Box::new(io::stdin()))
    }

    pub fn from_reader(reader: Box<dyn Read + Send>) -> InputStream {
        InputStream {
            inner: BufReader::with_capacity(16 * 1024, reader),
            child: None,
            eof: false,
        }
    }

    fn from_command(command: &mut Command, name: &str) -> Result<InputStream> {
        let mut child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|_| ZdwError::FileOpenErr(name.to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ZdwError::FileOpenErr(name.to_string()))?;
        Ok(InputStream {
            inner: BufReader::with_capacity(16 * 1024, Box::new(stdout)),
            child: Some(child),
            eof: false,
        })
    }

    /// Fill `buf` exactly; a short read is a transport failure.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match io::Read::read_exact(&mut self.inner, buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.eof = true;
                Err(ZdwError::GzreadFailed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read a single byte; `None` at clean end of stream.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut b = [0u8; 1];
        loop {
            match io::Read::read(&mut self.inner, &mut b) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(None);
                }
                Ok(_) => return Ok(Some(b[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    /// Read `width` little-endian bytes into the low end of a `u64`.
    pub fn read_uint(&mut self, width: usize) -> Result<u64> {
        debug_assert!(width >= 1 && width <= 8);
        let mut b = [0u8; 8];
        self.read_exact(&mut b[..width])?;
        Ok(u64::from_le_bytes(b))
    }

    /// Skip `len` bytes.
    pub fn skip(&mut self, mut len: u64) -> Result<()> {
        let mut sink = [0u8; 4096];
        while len > 0 {
            let chunk = len.min(sink.len() as u64) as usize;
            self.read_exact(&mut sink[..chunk])?;
            len -= chunk as u64;
        }
        Ok(())
    }

    pub fn at_eof(&self) -> bool {
        self.eof
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
