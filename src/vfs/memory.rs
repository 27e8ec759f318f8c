//! In-memory backing store
//!
//! Simple, fast, ephemeral. Serves two roles: the test filesystem, and the
//! home of the `con:` console device that backs the standard streams.
//! Regular files live in a path-keyed map; open handles live in a slab.

use super::{CONSOLE, FileSystem, Metadata, OpenOptions, StoreHandle};
use slab::Slab;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;

/// A stored file or directory.
#[derive(Clone)]
enum Node {
    File(Vec<u8>),
    Directory,
}

/// What an open handle points at.
enum Target {
    Path(String),
    Console,
}

struct OpenHandle {
    target: Target,
    readable: bool,
    writable: bool,
}

pub struct MemoryFs {
    nodes: HashMap<String, Node>,
    handles: Slab<OpenHandle>,
    /// Keyboard bytes waiting to be read from the console.
    console_input: VecDeque<u8>,
    /// Everything written to the console.
    console_output: Vec<u8>,
}

impl MemoryFs {
    pub fn new() -> Self {
        let mut fs = Self {
            nodes: HashMap::new(),
            handles: Slab::new(),
            console_input: VecDeque::new(),
            console_output: Vec::new(),
        };
        // Root directory always exists
        fs.nodes.insert("/".to_string(), Node::Directory);
        fs
    }

    /// Normalize a path (ensure leading slash, no trailing slash except root).
    fn normalize(path: &str) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        if path.len() > 1 && path.ends_with('/') {
            path[..path.len() - 1].to_string()
        } else {
            path
        }
    }

    /// Create a directory (tests and embedders; no syscall goes here).
    pub fn create_dir(&mut self, path: &str) {
        self.nodes.insert(Self::normalize(path), Node::Directory);
    }

    /// Queue bytes as console input.
    pub fn push_input(&mut self, data: &[u8]) {
        self.console_input.extend(data);
    }

    /// Take everything written to the console so far.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.console_output)
    }

    fn entry(&self, handle: StoreHandle) -> io::Result<&OpenHandle> {
        self.handles
            .get(handle)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "bad store handle"))
    }
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemoryFs {
    fn open(&mut self, path: &str, options: OpenOptions) -> io::Result<StoreHandle> {
        if path == CONSOLE {
            return Ok(self.handles.insert(OpenHandle {
                target: Target::Console,
                readable: options.read,
                writable: options.write,
            }));
        }

        let path = Self::normalize(path);
        match self.nodes.get_mut(&path) {
            Some(Node::Directory) => {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "is a directory"));
            }
            Some(Node::File(data)) => {
                if options.truncate {
                    data.clear();
                }
            }
            None => {
                if !options.create {
                    return Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
                }
                self.nodes.insert(path.clone(), Node::File(Vec::new()));
            }
        }

        Ok(self.handles.insert(OpenHandle {
            target: Target::Path(path),
            readable: options.read,
            writable: options.write,
        }))
    }

    fn close(&mut self, handle: StoreHandle) -> io::Result<()> {
        if self.handles.try_remove(handle).is_none() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "bad store handle"));
        }
        Ok(())
    }

    fn read_at(&mut self, handle: StoreHandle, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let entry = self.entry(handle)?;
        if !entry.readable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "not opened for reading",
            ));
        }
        match &entry.target {
            Target::Console => {
                // Console ignores the offset; it drains queued input.
                if self.console_input.is_empty() {
                    return Err(io::Error::new(io::ErrorKind::WouldBlock, "no input available"));
                }
                let n = buf.len().min(self.console_input.len());
                for (i, byte) in self.console_input.drain(..n).enumerate() {
                    buf[i] = byte;
                }
                Ok(n)
            }
            Target::Path(path) => {
                let Some(Node::File(data)) = self.nodes.get(path) else {
                    return Err(io::Error::new(io::ErrorKind::NotFound, "file vanished"));
                };
                let offset = offset as usize;
                if offset >= data.len() {
                    return Ok(0); // EOF
                }
                let n = buf.len().min(data.len() - offset);
                buf[..n].copy_from_slice(&data[offset..offset + n]);
                Ok(n)
            }
        }
    }

    fn write_at(&mut self, handle: StoreHandle, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let entry = self.entry(handle)?;
        if !entry.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "not opened for writing",
            ));
        }
        match &entry.target {
            Target::Console => {
                self.console_output.extend_from_slice(buf);
                Ok(buf.len())
            }
            Target::Path(path) => {
                let path = path.clone();
                let Some(Node::File(data)) = self.nodes.get_mut(&path) else {
                    return Err(io::Error::new(io::ErrorKind::NotFound, "file vanished"));
                };
                let offset = offset as usize;
                // Writes past EOF zero-fill the gap.
                if offset + buf.len() > data.len() {
                    data.resize(offset + buf.len(), 0);
                }
                data[offset..offset + buf.len()].copy_from_slice(buf);
                Ok(buf.len())
            }
        }
    }

    fn size(&self, handle: StoreHandle) -> io::Result<u64> {
        let entry = self.entry(handle)?;
        match &entry.target {
            Target::Console => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "console has no size",
            )),
            Target::Path(path) => match self.nodes.get(path) {
                Some(Node::File(data)) => Ok(data.len() as u64),
                _ => Err(io::Error::new(io::ErrorKind::NotFound, "file vanished")),
            },
        }
    }

    fn is_seekable(&self, handle: StoreHandle) -> bool {
        matches!(
            self.handles.get(handle),
            Some(OpenHandle {
                target: Target::Path(_),
                ..
            })
        )
    }

    fn metadata(&self, path: &str) -> io::Result<Metadata> {
        let path = Self::normalize(path);
        match self.nodes.get(&path) {
            Some(Node::File(data)) => Ok(Metadata {
                size: data.len() as u64,
                is_dir: false,
                is_file: true,
            }),
            Some(Node::Directory) => Ok(Metadata {
                size: 0,
                is_dir: true,
                is_file: false,
            }),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "no such path")),
        }
    }
}

/// A `MemoryFs` behind a shared handle, so an embedder can keep feeding
/// console input and draining console output after handing the store to
/// the kernel.
#[derive(Clone, Default)]
pub struct SharedFs(Arc<spin::Mutex<MemoryFs>>);

impl SharedFs {
    pub fn new(fs: MemoryFs) -> Self {
        Self(Arc::new(spin::Mutex::new(fs)))
    }

    pub fn lock(&self) -> spin::MutexGuard<'_, MemoryFs> {
        self.0.lock()
    }
}

impl FileSystem for SharedFs {
    fn open(&mut self, path: &str, options: OpenOptions) -> io::Result<StoreHandle> {
        self.0.lock().open(path, options)
    }

    fn close(&mut self, handle: StoreHandle) -> io::Result<()> {
        self.0.lock().close(handle)
    }

    fn read_at(&mut self, handle: StoreHandle, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.0.lock().read_at(handle, offset, buf)
    }

    fn write_at(&mut self, handle: StoreHandle, offset: u64, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().write_at(handle, offset, buf)
    }

    fn size(&self, handle: StoreHandle) -> io::Result<u64> {
        self.0.lock().size(handle)
    }

    fn is_seekable(&self, handle: StoreHandle) -> bool {
        self.0.lock().is_seekable(handle)
    }

    fn metadata(&self, path: &str) -> io::Result<Metadata> {
        self.0.lock().metadata(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_write_read() {
        let mut fs = MemoryFs::new();
        let h = fs
            .open("/f.txt", OpenOptions::new().write(true).create(true))
            .unwrap();
        assert_eq!(fs.write_at(h, 0, b"hello").unwrap(), 5);
        fs.close(h).unwrap();

        let h = fs.open("/f.txt", OpenOptions::new()).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(fs.read_at(h, 0, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        // Read at EOF is a zero-byte read, not an error.
        assert_eq!(fs.read_at(h, 5, &mut buf).unwrap(), 0);
        fs.close(h).unwrap();
    }

    #[test]
    fn test_open_missing_without_create() {
        let mut fs = MemoryFs::new();
        let err = fs.open("/absent", OpenOptions::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_truncate() {
        let mut fs = MemoryFs::new();
        let h = fs
            .open("/t", OpenOptions::new().write(true).create(true))
            .unwrap();
        fs.write_at(h, 0, b"0123456789").unwrap();
        fs.close(h).unwrap();

        let h = fs
            .open("/t", OpenOptions::new().write(true).truncate(true))
            .unwrap();
        assert_eq!(fs.size(h).unwrap(), 0);
        fs.close(h).unwrap();
    }

    #[test]
    fn test_write_past_eof_zero_fills() {
        let mut fs = MemoryFs::new();
        let h = fs
            .open("/gap", OpenOptions::new().read(true).write(true).create(true))
            .unwrap();
        fs.write_at(h, 4, b"xy").unwrap();
        let mut buf = [0u8; 6];
        assert_eq!(fs.read_at(h, 0, &mut buf).unwrap(), 6);
        assert_eq!(&buf, b"\0\0\0\0xy");
        fs.close(h).unwrap();
    }

    #[test]
    fn test_console_round_trip() {
        let mut fs = MemoryFs::new();
        let h = fs
            .open(CONSOLE, OpenOptions::new().read(true).write(true))
            .unwrap();
        assert!(!fs.is_seekable(h));

        fs.write_at(h, 0, b"out").unwrap();
        assert_eq!(fs.take_output(), b"out");

        let mut buf = [0u8; 8];
        assert_eq!(
            fs.read_at(h, 0, &mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
        fs.push_input(b"in");
        assert_eq!(fs.read_at(h, 0, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"in");
        fs.close(h).unwrap();
    }

    #[test]
    fn test_metadata() {
        let mut fs = MemoryFs::new();
        fs.create_dir("/dir");
        let h = fs
            .open("/dir/file", OpenOptions::new().write(true).create(true))
            .unwrap();
        fs.write_at(h, 0, b"abc").unwrap();
        fs.close(h).unwrap();

        assert!(fs.metadata("/dir").unwrap().is_dir);
        let meta = fs.metadata("/dir/file").unwrap();
        assert!(meta.is_file);
        assert_eq!(meta.size, 3);
        assert_eq!(
            fs.metadata("/nope").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }
}
