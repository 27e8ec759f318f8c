//! The syscall surface
//!
//! `Kernel` owns the system file table, the process registry, and the
//! program loader. There is no ambient "current process": every entry
//! point takes the calling process explicitly, which keeps the layer
//! testable and the trap plumbing out of scope.
//!
//! Locking discipline: descriptor-table and registry spinlocks are held
//! only for the lookup or slot update, never across a store call or a
//! blocking acquire. File I/O takes the per-file blocking lock for the
//! whole offset-read / transfer / offset-advance sequence. The lifecycle
//! calls (`fork`, `exit`, `waitpid`) speak through each process's
//! `running` and `wait_serial` locks as described in `kernel::process`.

use super::error::{KernelError, KernelResult};
use super::fd::Fd;
use super::file::{OpenFlags, SystemFileTable};
use super::loader::{self, ExecImage, ProgramLoader};
use super::process::{Pid, Process, ProcessTable};
use super::sync::Semaphore;
use crate::vfs::{CONSOLE, FileSystem};
use std::io::SeekFrom;
use std::sync::Arc;
use std::thread;

/// Whether waitpid blocks for a still-running child or returns `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFlags {
    Block,
    NoHang,
}

pub struct Kernel {
    files: SystemFileTable,
    procs: ProcessTable,
    loader: Box<dyn ProgramLoader>,
}

impl Kernel {
    /// Bring the kernel up: build the file table over the store, then
    /// create the root process with descriptors 0/1/2 bound to the console
    /// and its `running` lock held by the calling thread.
    pub fn bootstrap(
        fs: Box<dyn FileSystem>,
        loader: Box<dyn ProgramLoader>,
    ) -> KernelResult<(Arc<Kernel>, Arc<Process>)> {
        let kernel = Arc::new(Kernel {
            files: SystemFileTable::new(fs)?,
            procs: ProcessTable::new(),
            loader,
        });
        let root = Arc::new(Process::new(kernel.procs.alloc_pid(), "boot", None));
        kernel.bind_stdio(&root);
        root.running.acquire();
        kernel.procs.insert(Arc::clone(&root));
        log::info!("kernel up, root process {}", root.pid());
        Ok((kernel, root))
    }

    /// Tear the kernel down. Processes still registered at this point are
    /// an embedder ordering bug; their records are dropped and logged.
    pub fn shutdown(&self) {
        for proc in self.procs.drain() {
            if proc.exit_status().is_none() {
                log::warn!("{} ({}) still live at shutdown", proc.pid(), proc.name());
            }
            let drained = proc.fds.lock().drain();
            for id in drained {
                self.files.release(id);
            }
        }
        self.files.shutdown();
        log::info!("kernel down");
    }

    pub fn file_table(&self) -> &SystemFileTable {
        &self.files
    }

    pub fn process(&self, pid: Pid) -> Option<Arc<Process>> {
        self.procs.get(pid)
    }

    pub fn process_count(&self) -> usize {
        self.procs.len()
    }

    fn bind_stdio(&self, proc: &Process) {
        let streams = [self.files.stdin(), self.files.stdout(), self.files.stderr()];
        let mut fds = proc.fds.lock();
        for (i, id) in streams.into_iter().enumerate() {
            self.files.retain(id);
            fds.set(Fd(i as u32), id).expect("stdio descriptor in range");
        }
    }

    /// Absolute paths and the console device pass through; anything else
    /// resolves against the process's working directory.
    fn resolve_path(proc: &Process, path: &str) -> String {
        if path.starts_with('/') || path == CONSOLE {
            return path.to_string();
        }
        let cwd = proc.cwd.lock();
        if *cwd == "/" {
            format!("/{}", path)
        } else {
            format!("{}/{}", *cwd, path)
        }
    }

    // ------------------------------------------------------------------
    // File syscalls
    // ------------------------------------------------------------------

    pub fn sys_open(&self, proc: &Process, path: &str, flags: OpenFlags) -> KernelResult<Fd> {
        let path = Self::resolve_path(proc, path);
        let id = self.files.open(&path, flags)?;
        let allocated = proc.fds.lock().alloc(id);
        match allocated {
            Ok(fd) => Ok(fd),
            Err(e) => {
                // No slot for it; the object dies before the caller sees it.
                self.files.release(id);
                Err(e)
            }
        }
    }

    pub fn sys_close(&self, proc: &Process, fd: Fd) -> KernelResult<()> {
        let id = proc.fds.lock().clear(fd)?.ok_or(KernelError::BadFd)?;
        self.files.release(id);
        Ok(())
    }

    pub fn sys_read(&self, proc: &Process, fd: Fd, buf: &mut [u8]) -> KernelResult<usize> {
        let id = proc.fds.lock().get(fd)?;
        // Pin the object for the duration of the transfer: a concurrent
        // close dropping the last descriptor must not retire the store
        // handle under us.
        let file = self.files.get_retained(id).ok_or(KernelError::BadFd)?;
        let result = if !file.flags().read {
            Err(KernelError::BadFd)
        } else {
            file.lock.acquire();
            let result = (|| {
                let offset = file.offset();
                let n = self.files.fs().read_at(file.store_handle(), offset, buf)?;
                file.set_offset(offset + n as u64);
                Ok(n)
            })();
            file.lock.release();
            result
        };
        self.files.release(id);
        result
    }

    pub fn sys_write(&self, proc: &Process, fd: Fd, buf: &[u8]) -> KernelResult<usize> {
        let id = proc.fds.lock().get(fd)?;
        let file = self.files.get_retained(id).ok_or(KernelError::BadFd)?;
        let result = if !file.flags().write {
            Err(KernelError::BadFd)
        } else {
            file.lock.acquire();
            let result = (|| {
                let mut fs = self.files.fs();
                let offset = if file.flags().append {
                    fs.size(file.store_handle())?
                } else {
                    file.offset()
                };
                let n = fs.write_at(file.store_handle(), offset, buf)?;
                drop(fs);
                file.set_offset(offset + n as u64);
                Ok(n)
            })();
            file.lock.release();
            result
        };
        self.files.release(id);
        result
    }

    /// Read into user memory: the span is validated against the address
    /// space before any transfer happens.
    pub fn sys_read_user(
        &self,
        proc: &Process,
        fd: Fd,
        addr: u64,
        len: usize,
    ) -> KernelResult<usize> {
        proc.space.lock().check_span(addr, len)?;
        let mut buf = vec![0u8; len];
        let n = self.sys_read(proc, fd, &mut buf)?;
        proc.space.lock().copyout(addr, &buf[..n])?;
        Ok(n)
    }

    /// Write from user memory.
    pub fn sys_write_user(
        &self,
        proc: &Process,
        fd: Fd,
        addr: u64,
        len: usize,
    ) -> KernelResult<usize> {
        let mut buf = vec![0u8; len];
        proc.space.lock().copyin(addr, &mut buf)?;
        self.sys_write(proc, fd, &buf)
    }

    pub fn sys_lseek(&self, proc: &Process, fd: Fd, pos: SeekFrom) -> KernelResult<u64> {
        let id = proc.fds.lock().get(fd)?;
        let file = self.files.get_retained(id).ok_or(KernelError::BadFd)?;
        file.lock.acquire();
        let result = (|| {
            let fs = self.files.fs();
            if !fs.is_seekable(file.store_handle()) {
                return Err(KernelError::NotSeekable);
            }
            let target = match pos {
                SeekFrom::Start(n) => n as i128,
                SeekFrom::Current(delta) => file.offset() as i128 + delta as i128,
                SeekFrom::End(delta) => fs.size(file.store_handle())? as i128 + delta as i128,
            };
            // Past EOF is fine; before the start of the file is not.
            if target < 0 || target > u64::MAX as i128 {
                return Err(KernelError::InvalidArgument);
            }
            Ok(target as u64)
        })();
        let result = result.inspect(|&n| file.set_offset(n));
        file.lock.release();
        self.files.release(id);
        result
    }

    pub fn sys_dup2(&self, proc: &Process, old: Fd, new: Fd) -> KernelResult<Fd> {
        let previous = {
            let mut fds = proc.fds.lock();
            fds.check_range(new)?;
            let id = fds.get(old)?;
            if old == new {
                return Ok(new);
            }
            self.files.retain(id);
            fds.set(new, id)?
        };
        // Whatever `new` pointed at before closes now; this may be the
        // object's last reference.
        if let Some(prev) = previous {
            self.files.release(prev);
        }
        Ok(new)
    }

    // ------------------------------------------------------------------
    // Process syscalls
    // ------------------------------------------------------------------

    /// Duplicate the calling process and run `child_main` on a fresh
    /// thread as the child. Descriptor table, address space, and working
    /// directory are copied; open-file objects are shared, with one
    /// reference added per occupied slot.
    ///
    /// Fork does not return to the parent until the child has pinned its
    /// `running` lock, so a waitpid issued immediately after can never see
    /// a child that looks already-exited.
    pub fn sys_fork<F>(
        self: &Arc<Self>,
        proc: &Arc<Process>,
        child_main: F,
    ) -> KernelResult<Pid>
    where
        F: FnOnce(Arc<Kernel>, Arc<Process>) + Send + 'static,
    {
        let pid = self.procs.alloc_pid();
        let child = Arc::new(Process::new(pid, proc.name(), Some(proc.pid())));

        let fds = {
            // Retain under the parent's descriptor guard, so a concurrent
            // close on this process cannot drop a slot's last reference
            // between the snapshot and the bump.
            let parent_fds = proc.fds.lock();
            for (_, id) in parent_fds.iter() {
                self.files.retain(id);
            }
            parent_fds.clone()
        };
        *child.fds.lock() = fds;
        *child.space.lock() = proc.space.lock().clone();
        *child.cwd.lock() = proc.cwd.lock().clone();

        proc.add_child(pid);
        self.procs.insert(Arc::clone(&child));

        let started = Arc::new(Semaphore::new(format!("fork:{}", pid), 0));
        let spawned = {
            let kernel = Arc::clone(self);
            let child = Arc::clone(&child);
            let started = Arc::clone(&started);
            thread::Builder::new()
                .name(format!("{}", pid))
                .spawn(move || {
                    child.running.acquire();
                    started.release();
                    child_main(Arc::clone(&kernel), Arc::clone(&child));
                    // A child that returns without exiting exits cleanly.
                    if child.exit_status().is_none() {
                        kernel.sys_exit(&child, 0);
                    }
                })
        };
        if spawned.is_err() {
            // Unwind the half-made child.
            proc.remove_child(pid);
            self.procs.remove(pid);
            let drained = child.fds.lock().drain();
            for id in drained {
                self.files.release(id);
            }
            return Err(KernelError::OutOfResources);
        }

        started.acquire();
        log::debug!("{} forked {}", proc.pid(), pid);
        Ok(pid)
    }

    /// Replace the calling process's image. The descriptor table is
    /// untouched; the address space is swapped for the freshly loaded one
    /// with `argv` marshalled onto its stack. The returned `ExecImage` is
    /// what a trap-return layer would enter user mode with.
    pub fn sys_execv(
        &self,
        proc: &Process,
        path: &str,
        argv: &[String],
    ) -> KernelResult<ExecImage> {
        loader::args_footprint(argv)?;
        let path = Self::resolve_path(proc, path);
        let image = {
            let mut fs = self.files.fs();
            self.loader.load(&mut **fs, &path)?
        };
        let mut space = image.space;
        let (stack_ptr, argv_addr) = loader::push_args(&mut space, argv)?;
        *proc.space.lock() = space;
        log::debug!("{} exec {}", proc.pid(), path);
        Ok(ExecImage {
            entry: image.entry,
            stack_ptr,
            argc: argv.len(),
            argv: argv_addr,
        })
    }

    /// Terminate the calling process. The status is recorded exactly once
    /// (a second exit panics), children are disowned (dead ones reaped,
    /// live ones orphaned), and the descriptor table is torn down. The
    /// `running` lock is released at the very end, which is what unblocks
    /// a parent sleeping in waitpid.
    ///
    /// A process nobody can wait for retires its own record.
    pub fn sys_exit(&self, proc: &Process, status: i32) {
        proc.set_exit_status(status);

        for cpid in proc.children() {
            proc.remove_child(cpid);
            if let Some(child) = self.procs.get(cpid) {
                child.set_parent(None);
                if child.exit_status().is_some() {
                    // Dead child nobody will ever wait for.
                    self.procs.remove(cpid);
                }
            }
        }

        let drained = proc.fds.lock().drain();
        for id in drained {
            self.files.release(id);
        }

        let orphan = match proc.parent() {
            None => true,
            Some(parent) => self.procs.get(parent).is_none(),
        };
        if orphan {
            self.procs.remove(proc.pid());
        }

        log::debug!("{} exit with status {}", proc.pid(), status);
        proc.running.release();
    }

    /// Collect a child's exit status. The target must exist and be a
    /// direct child of the caller. Blocking mode sleeps on the child's
    /// `running` lock until it exits; `NoHang` returns `None` instead.
    /// Collecting reaps the record, so a second wait on the same pid
    /// fails with no-such-process.
    pub fn sys_waitpid(
        &self,
        proc: &Process,
        pid: Pid,
        flags: WaitFlags,
    ) -> KernelResult<Option<i32>> {
        let child = self.procs.get(pid).ok_or(KernelError::NoProcess)?;
        if !proc.has_child(pid) {
            return Err(KernelError::NotChild);
        }

        child.wait_serial.acquire();
        let collected = match flags {
            WaitFlags::Block => {
                child.running.acquire();
                true
            }
            WaitFlags::NoHang => child.running.try_acquire(),
        };
        if !collected {
            child.wait_serial.release();
            return Ok(None);
        }

        let status = child
            .exit_status()
            .expect("child released its running lock without exiting");
        child.running.release();
        self.procs.remove(pid);
        proc.remove_child(pid);
        child.wait_serial.release();

        log::debug!("{} reaped {} (status {})", proc.pid(), pid, status);
        Ok(Some(status))
    }

    pub fn sys_getpid(&self, proc: &Process) -> Pid {
        proc.pid()
    }

    pub fn sys_getppid(&self, proc: &Process) -> Option<Pid> {
        proc.parent()
    }

    pub fn sys_getcwd(&self, proc: &Process) -> String {
        proc.cwd.lock().clone()
    }

    pub fn sys_chdir(&self, proc: &Process, path: &str) -> KernelResult<()> {
        let path = Self::resolve_path(proc, path);
        let meta = self.files.fs().metadata(&path)?;
        if !meta.is_dir {
            return Err(KernelError::NotADirectory);
        }
        *proc.cwd.lock() = path;
        Ok(())
    }
}
