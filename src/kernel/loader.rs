//! User address spaces and program images
//!
//! Real translation hardware is out of scope; what the rest of the kernel
//! needs is the seam. An `AddressSpace` is a flat user region
//! `[USER_BASE, USER_TOP)` backed by sparse pages, with checked copyin and
//! copyout. A `ProgramLoader` turns a path into a `LoadedImage`; the flat
//! test loader drops the file contents at `USER_BASE` and calls that the
//! entry point. Argument marshalling packs an argv vector onto the new
//! image's stack the way exec needs it: strings first, then a
//! null-terminated pointer array, everything word aligned.

use super::error::{KernelError, KernelResult};
use crate::vfs::{FileSystem, OpenOptions};
use std::collections::HashMap;
use std::io;

/// Bottom of the user region. Addresses below this (the "kernel" range,
/// plus null) are never valid for user transfers.
pub const USER_BASE: u64 = 0x0040_0000;

/// One past the top of the user region. The initial stack pointer starts
/// here and grows down.
pub const USER_TOP: u64 = 0x8000_0000;

/// Upper bound on the total marshalled size of an exec argument vector,
/// strings and pointer array included.
pub const ARG_MAX: usize = 64 * 1024;

const PAGE_SIZE: u64 = 4096;
const WORD: u64 = 8;

/// A flat user address space. Pages are materialized on first write; reads
/// from never-written memory see zeros.
#[derive(Debug, Clone, Default)]
pub struct AddressSpace {
    pages: HashMap<u64, Box<[u8; PAGE_SIZE as usize]>>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate that `[addr, addr + len)` lies entirely inside the user
    /// region. Null, kernel-range addresses, and arithmetic overflow all
    /// fail the same way.
    pub fn check_span(&self, addr: u64, len: usize) -> KernelResult<()> {
        if addr < USER_BASE {
            return Err(KernelError::BadAddress);
        }
        let end = addr
            .checked_add(len as u64)
            .ok_or(KernelError::BadAddress)?;
        if end > USER_TOP {
            return Err(KernelError::BadAddress);
        }
        Ok(())
    }

    /// Copy kernel bytes out to user memory.
    pub fn copyout(&mut self, addr: u64, data: &[u8]) -> KernelResult<()> {
        self.check_span(addr, data.len())?;
        for (i, &byte) in data.iter().enumerate() {
            let va = addr + i as u64;
            let page = self
                .pages
                .entry(va / PAGE_SIZE)
                .or_insert_with(|| Box::new([0; PAGE_SIZE as usize]));
            page[(va % PAGE_SIZE) as usize] = byte;
        }
        Ok(())
    }

    /// Copy user memory into a kernel buffer.
    pub fn copyin(&self, addr: u64, buf: &mut [u8]) -> KernelResult<()> {
        self.check_span(addr, buf.len())?;
        for (i, slot) in buf.iter_mut().enumerate() {
            let va = addr + i as u64;
            *slot = self
                .pages
                .get(&(va / PAGE_SIZE))
                .map(|p| p[(va % PAGE_SIZE) as usize])
                .unwrap_or(0);
        }
        Ok(())
    }

    /// Write one word (a marshalled argv pointer) to user memory.
    fn copyout_word(&mut self, addr: u64, word: u64) -> KernelResult<()> {
        self.copyout(addr, &word.to_le_bytes())
    }
}

/// A program image after loading, before entry.
#[derive(Debug)]
pub struct LoadedImage {
    pub space: AddressSpace,
    pub entry: u64,
}

/// What the trap-return layer would enter user mode with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecImage {
    pub entry: u64,
    pub stack_ptr: u64,
    pub argc: usize,
    /// User address of the argv pointer array.
    pub argv: u64,
}

/// Turns a path into a runnable image. Store and format errors propagate
/// unmodified; exec surfaces them to the caller.
pub trait ProgramLoader: Send + Sync {
    fn load(&self, fs: &mut dyn FileSystem, path: &str) -> io::Result<LoadedImage>;
}

/// Test loader: the whole file, verbatim, at the bottom of the user region.
pub struct FlatLoader;

impl ProgramLoader for FlatLoader {
    fn load(&self, fs: &mut dyn FileSystem, path: &str) -> io::Result<LoadedImage> {
        let handle = fs.open(path, OpenOptions::new())?;
        let size = fs.size(handle)?;
        let mut data = vec![0u8; size as usize];
        let mut read = 0;
        while read < data.len() {
            let n = fs.read_at(handle, read as u64, &mut data[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        fs.close(handle)?;
        data.truncate(read);

        let mut space = AddressSpace::new();
        space
            .copyout(USER_BASE, &data)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "image too large"))?;
        Ok(LoadedImage {
            space,
            entry: USER_BASE,
        })
    }
}

/// Total marshalled footprint of an argv vector: padded string bytes plus
/// the null-terminated pointer array. Fails when it exceeds `ARG_MAX`.
pub fn args_footprint(argv: &[String]) -> KernelResult<u64> {
    let mut strings = 0u64;
    for arg in argv {
        let padded = (arg.len() as u64 + 1).div_ceil(WORD) * WORD;
        strings = strings
            .checked_add(padded)
            .ok_or(KernelError::ArgListTooLong)?;
    }
    let pointers = (argv.len() as u64 + 1) * WORD;
    let total = strings
        .checked_add(pointers)
        .ok_or(KernelError::ArgListTooLong)?;
    if total > ARG_MAX as u64 {
        return Err(KernelError::ArgListTooLong);
    }
    Ok(total)
}

/// Marshal `argv` onto the stack of a fresh image: string bytes (each
/// NUL-terminated, padded to word size) below the stack top, then the
/// null-terminated pointer array below those. Returns the initial stack
/// pointer and the user address of the pointer array.
pub fn push_args(space: &mut AddressSpace, argv: &[String]) -> KernelResult<(u64, u64)> {
    args_footprint(argv)?;
    let pointers = (argv.len() as u64 + 1) * WORD;

    let mut cursor = USER_TOP;
    let mut addrs = Vec::with_capacity(argv.len());
    for arg in argv {
        let padded = (arg.len() as u64 + 1).div_ceil(WORD) * WORD;
        cursor -= padded;
        addrs.push(cursor);
        space.copyout(cursor, arg.as_bytes())?;
        space.copyout(cursor + arg.len() as u64, &[0])?;
    }

    let argv_base = cursor - pointers;
    for (i, &addr) in addrs.iter().enumerate() {
        space.copyout_word(argv_base + i as u64 * WORD, addr)?;
    }
    space.copyout_word(argv_base + argv.len() as u64 * WORD, 0)?;

    Ok((argv_base, argv_base))
}
