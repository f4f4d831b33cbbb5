//! Blocking file primitives behind the dispatch gate.
//!
//! Data-moving operations (read, pread, readv, write, pwrite, writev, force,
//! truncate) consult the [`IoDispatchGate`] and may be offloaded. Metadata
//! and control operations (seek, position, size, lock, release, close) always
//! run on the calling unit: they are fast, or must act on the caller's own
//! descriptor state.
//!
//! All primitives retry on `EINTR` and report other `errno` values verbatim
//! as `io::Error`s.

use nix::errno::Errno;
use std::io::{self, IoSlice, IoSliceMut};
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use tracing::debug;

use super::adapter::IoOp;
use super::gate::IoDispatchGate;

/// Upper bound on buffers per vectored call.
const MAX_IOV: usize = 1024;

/// Outcome of [`FileDispatcher::lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Acquired,
    /// Non-blocking request and another process holds a conflicting lock.
    Contended,
}

/// Issues file syscalls, routing the blocking ones through a gate.
///
/// ```rust,no_run
/// # fn main() -> std::io::Result<()> {
/// use std::os::fd::AsFd;
/// use rescon_core::io::dispatcher::FileDispatcher;
///
/// let file = std::fs::File::open("/etc/hostname")?;
/// let dispatcher = FileDispatcher::new();
/// let mut buf = [0u8; 256];
/// let n = dispatcher.read(file.as_fd(), &mut buf)?;
/// # let _ = n;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FileDispatcher {
    gate: Arc<IoDispatchGate>,
}

impl FileDispatcher {
    /// A dispatcher bound to the process-wide gate.
    pub fn new() -> Self {
        Self::with_gate(IoDispatchGate::global())
    }

    pub fn with_gate(gate: Arc<IoDispatchGate>) -> Self {
        Self { gate }
    }

    pub fn gate(&self) -> &Arc<IoDispatchGate> {
        &self.gate
    }

    // -----------------------------------------------------------------
    // Gated operations
    // -----------------------------------------------------------------

    /// Read into `buf` at the current position. `Ok(0)` at end of file.
    pub fn read(&self, fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
        let fd = fd.as_raw_fd();
        self.gate.dispatch(IoOp::Read, move || sys::read(fd, buf))
    }

    /// Read into `buf` at `offset` without moving the file position.
    pub fn pread(&self, fd: BorrowedFd<'_>, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let fd = fd.as_raw_fd();
        let offset = to_off(offset)?;
        self.gate
            .dispatch(IoOp::PositionalRead, move || sys::pread(fd, buf, offset))
    }

    /// Scatter-read into `bufs`. At most 1024 buffers are used per call.
    pub fn readv(&self, fd: BorrowedFd<'_>, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        let fd = fd.as_raw_fd();
        self.gate
            .dispatch(IoOp::VectoredRead, move || sys::readv(fd, bufs))
    }

    /// Write `buf` at the current position.
    pub fn write(&self, fd: BorrowedFd<'_>, buf: &[u8]) -> io::Result<usize> {
        let fd = fd.as_raw_fd();
        self.gate.dispatch(IoOp::Write, move || sys::write(fd, buf))
    }

    /// Write `buf` at `offset` without moving the file position.
    pub fn pwrite(&self, fd: BorrowedFd<'_>, buf: &[u8], offset: u64) -> io::Result<usize> {
        let fd = fd.as_raw_fd();
        let offset = to_off(offset)?;
        self.gate
            .dispatch(IoOp::PositionalWrite, move || sys::pwrite(fd, buf, offset))
    }

    /// Gather-write `bufs`. At most 1024 buffers are used per call.
    pub fn writev(&self, fd: BorrowedFd<'_>, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let fd = fd.as_raw_fd();
        self.gate
            .dispatch(IoOp::VectoredWrite, move || sys::writev(fd, bufs))
    }

    /// Flush to storage; file metadata too when `metadata` is set.
    pub fn force(&self, fd: BorrowedFd<'_>, metadata: bool) -> io::Result<()> {
        let fd = fd.as_raw_fd();
        self.gate
            .dispatch(IoOp::Force, move || sys::force(fd, metadata))
    }

    /// Truncate or extend the file to `size` bytes.
    pub fn truncate(&self, fd: BorrowedFd<'_>, size: u64) -> io::Result<()> {
        let fd = fd.as_raw_fd();
        let size = to_off(size)?;
        self.gate
            .dispatch(IoOp::Truncate, move || sys::truncate(fd, size))
    }

    // -----------------------------------------------------------------
    // Direct operations
    // -----------------------------------------------------------------

    /// Move the file position to `offset`; returns the new position.
    pub fn seek(&self, fd: BorrowedFd<'_>, offset: u64) -> io::Result<u64> {
        sys::seek(fd.as_raw_fd(), to_off(offset)?, libc::SEEK_SET)
    }

    /// The current file position.
    pub fn position(&self, fd: BorrowedFd<'_>) -> io::Result<u64> {
        sys::seek(fd.as_raw_fd(), 0, libc::SEEK_CUR)
    }

    /// File size in bytes.
    pub fn size(&self, fd: BorrowedFd<'_>) -> io::Result<u64> {
        sys::size(fd.as_raw_fd())
    }

    /// Take a POSIX record lock on `len` bytes from `pos`; `u64::MAX` means
    /// through end of file, however far it grows.
    pub fn lock(
        &self,
        fd: BorrowedFd<'_>,
        blocking: bool,
        pos: u64,
        len: u64,
        shared: bool,
    ) -> io::Result<LockStatus> {
        let kind = (if shared { libc::F_RDLCK } else { libc::F_WRLCK }) as libc::c_short;
        let command = if blocking { libc::F_SETLKW } else { libc::F_SETLK };
        match sys::record_lock(fd.as_raw_fd(), command, kind, pos, len) {
            Ok(()) => Ok(LockStatus::Acquired),
            Err(Errno::EAGAIN | Errno::EACCES) if !blocking => Ok(LockStatus::Contended),
            Err(errno) => Err(errno.into()),
        }
    }

    /// Release a lock taken with [`lock`](Self::lock).
    pub fn release(&self, fd: BorrowedFd<'_>, pos: u64, len: u64) -> io::Result<()> {
        let kind = libc::F_UNLCK as libc::c_short;
        sys::record_lock(fd.as_raw_fd(), libc::F_SETLK, kind, pos, len)
            .map_err(io::Error::from)
    }

    /// Close `fd`, reporting the error that dropping an `OwnedFd` would
    /// swallow.
    pub fn close(&self, fd: OwnedFd) -> io::Result<()> {
        let fd = fd.into_raw_fd();
        debug!(fd, "Closing descriptor");
        sys::close(fd)
    }
}

impl Default for FileDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn to_off(value: u64) -> io::Result<libc::off_t> {
    libc::off_t::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("offset {value} exceeds the platform file offset range"),
        )
    })
}

/// The raw syscalls.
mod sys {
    use super::*;

    fn retry<T>(mut call: impl FnMut() -> nix::Result<T>) -> nix::Result<T> {
        loop {
            match call() {
                Err(Errno::EINTR) => continue,
                other => return other,
            }
        }
    }

    pub(super) fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
        let n = retry(|| {
            // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
            Errno::result(unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) })
        })?;
        Ok(n as usize)
    }

    pub(super) fn pread(fd: RawFd, buf: &mut [u8], offset: libc::off_t) -> io::Result<usize> {
        let n = retry(|| {
            // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
            Errno::result(unsafe { libc::pread(fd, buf.as_mut_ptr().cast(), buf.len(), offset) })
        })?;
        Ok(n as usize)
    }

    pub(super) fn readv(fd: RawFd, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        let count = bufs.len().min(MAX_IOV) as libc::c_int;
        let n = retry(|| {
            // SAFETY: `IoSliceMut` is ABI-compatible with `iovec` on unix and
            // every slice is valid for writes.
            Errno::result(unsafe { libc::readv(fd, bufs.as_mut_ptr().cast(), count) })
        })?;
        Ok(n as usize)
    }

    pub(super) fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
        let n = retry(|| {
            // SAFETY: `buf` is valid for reads of `buf.len()` bytes.
            Errno::result(unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) })
        })?;
        Ok(n as usize)
    }

    pub(super) fn pwrite(fd: RawFd, buf: &[u8], offset: libc::off_t) -> io::Result<usize> {
        let n = retry(|| {
            // SAFETY: `buf` is valid for reads of `buf.len()` bytes.
            Errno::result(unsafe { libc::pwrite(fd, buf.as_ptr().cast(), buf.len(), offset) })
        })?;
        Ok(n as usize)
    }

    pub(super) fn writev(fd: RawFd, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let count = bufs.len().min(MAX_IOV) as libc::c_int;
        let n = retry(|| {
            // SAFETY: `IoSlice` is ABI-compatible with `iovec` on unix.
            Errno::result(unsafe { libc::writev(fd, bufs.as_ptr().cast(), count) })
        })?;
        Ok(n as usize)
    }

    pub(super) fn force(fd: RawFd, metadata: bool) -> io::Result<()> {
        retry(|| {
            // SAFETY: plain syscalls on a descriptor number.
            let res = unsafe {
                if metadata {
                    libc::fsync(fd)
                } else {
                    fdatasync(fd)
                }
            };
            Errno::result(res)
        })?;
        Ok(())
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    unsafe fn fdatasync(fd: RawFd) -> libc::c_int {
        libc::fdatasync(fd)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    unsafe fn fdatasync(fd: RawFd) -> libc::c_int {
        libc::fsync(fd)
    }

    pub(super) fn truncate(fd: RawFd, size: libc::off_t) -> io::Result<()> {
        // SAFETY: plain syscall on a descriptor number.
        retry(|| Errno::result(unsafe { libc::ftruncate(fd, size) }))?;
        Ok(())
    }

    pub(super) fn seek(fd: RawFd, offset: libc::off_t, whence: libc::c_int) -> io::Result<u64> {
        // SAFETY: plain syscall on a descriptor number.
        let pos = Errno::result(unsafe { libc::lseek(fd, offset, whence) })?;
        Ok(pos as u64)
    }

    pub(super) fn size(fd: RawFd) -> io::Result<u64> {
        let mut stat = MaybeUninit::<libc::stat>::uninit();
        // SAFETY: fstat fully initializes `stat` on success.
        Errno::result(unsafe { libc::fstat(fd, stat.as_mut_ptr()) })?;
        let stat = unsafe { stat.assume_init() };
        Ok(stat.st_size as u64)
    }

    pub(super) fn record_lock(
        fd: RawFd,
        command: libc::c_int,
        kind: libc::c_short,
        pos: u64,
        len: u64,
    ) -> nix::Result<()> {
        // SAFETY: all-zero is a valid `flock`.
        let mut lock: libc::flock = unsafe { std::mem::zeroed() };
        lock.l_type = kind;
        lock.l_whence = libc::SEEK_SET as libc::c_short;
        lock.l_start = libc::off_t::try_from(pos).map_err(|_| Errno::EINVAL)?;
        lock.l_len = if len == u64::MAX {
            0
        } else {
            libc::off_t::try_from(len).map_err(|_| Errno::EINVAL)?
        };
        let blocking = command == libc::F_SETLKW;
        let attempt = || {
            // SAFETY: `lock` outlives the call.
            Errno::result(unsafe { libc::fcntl(fd, command, &lock as *const libc::flock) })
        };
        if blocking {
            retry(attempt)?;
        } else {
            attempt()?;
        }
        Ok(())
    }

    pub(super) fn close(fd: RawFd) -> io::Result<()> {
        // SAFETY: the caller gave up ownership of `fd`.
        // Not retried on EINTR: the descriptor is released either way.
        Errno::result(unsafe { libc::close(fd) })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::adapter::AsyncIoAdapter;
    use std::fs::File;
    use std::io::Write as _;
    use std::os::fd::AsFd;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct ThreadAdapter {
        active: AtomicBool,
        submissions: AtomicUsize,
    }

    impl ThreadAdapter {
        fn new(active: bool) -> Arc<Self> {
            Arc::new(Self {
                active: AtomicBool::new(active),
                submissions: AtomicUsize::new(0),
            })
        }
    }

    impl AsyncIoAdapter for ThreadAdapter {
        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }

        fn execute(&self, _op: IoOp, work: &mut (dyn FnMut() + Send)) -> io::Result<()> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            std::thread::scope(|scope| scope.spawn(|| work()).join())
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "worker panicked"))
        }
    }

    fn file_with(contents: &[u8]) -> File {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    fn offloading() -> (FileDispatcher, Arc<ThreadAdapter>) {
        let gate = IoDispatchGate::new();
        let adapter = ThreadAdapter::new(true);
        gate.install(adapter.clone());
        (FileDispatcher::with_gate(gate), adapter)
    }

    fn direct() -> FileDispatcher {
        FileDispatcher::with_gate(IoDispatchGate::new())
    }

    #[test]
    fn test_read_write_seek_direct() {
        let dispatcher = direct();
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_fd();

        assert_eq!(dispatcher.write(fd, b"hello world").unwrap(), 11);
        assert_eq!(dispatcher.position(fd).unwrap(), 11);
        assert_eq!(dispatcher.seek(fd, 6).unwrap(), 6);

        let mut buf = [0u8; 16];
        let n = dispatcher.read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");
        // End of file.
        assert_eq!(dispatcher.read(fd, &mut buf).unwrap(), 0);
        assert_eq!(dispatcher.gate().metrics().snapshot().direct_ops, 3);
    }

    #[test]
    fn test_positional_ops_keep_position() {
        let (dispatcher, adapter) = offloading();
        let file = file_with(b"0123456789");
        let fd = file.as_fd();
        dispatcher.seek(fd, 2).unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(dispatcher.pread(fd, &mut buf, 5).unwrap(), 3);
        assert_eq!(&buf, b"567");
        assert_eq!(dispatcher.pwrite(fd, b"ab", 0).unwrap(), 2);
        assert_eq!(dispatcher.position(fd).unwrap(), 2);

        let mut all = [0u8; 10];
        dispatcher.pread(fd, &mut all, 0).unwrap();
        assert_eq!(&all, b"ab23456789");
        assert_eq!(adapter.submissions.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_vectored_ops_offloaded() {
        let (dispatcher, adapter) = offloading();
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_fd();

        let written = dispatcher
            .writev(fd, &[IoSlice::new(b"abc"), IoSlice::new(b"defg")])
            .unwrap();
        assert_eq!(written, 7);

        dispatcher.seek(fd, 0).unwrap();
        let (mut head, mut tail) = ([0u8; 2], [0u8; 8]);
        let read = dispatcher
            .readv(fd, &mut [IoSliceMut::new(&mut head), IoSliceMut::new(&mut tail)])
            .unwrap();
        assert_eq!(read, 7);
        assert_eq!(&head, b"ab");
        assert_eq!(&tail[..5], b"cdefg");
        assert_eq!(adapter.submissions.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_truncate_force_size() {
        let (dispatcher, adapter) = offloading();
        let file = file_with(b"some bytes");
        let fd = file.as_fd();

        assert_eq!(dispatcher.size(fd).unwrap(), 10);
        dispatcher.truncate(fd, 4).unwrap();
        assert_eq!(dispatcher.size(fd).unwrap(), 4);
        dispatcher.truncate(fd, 64).unwrap();
        assert_eq!(dispatcher.size(fd).unwrap(), 64);
        dispatcher.force(fd, true).unwrap();
        dispatcher.force(fd, false).unwrap();
        // size() is never offloaded.
        assert_eq!(adapter.submissions.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_same_results_direct_and_offloaded() {
        let contents = b"identical either way";
        let direct_file = file_with(contents);
        let offload_file = file_with(contents);
        let (offloading, _adapter) = offloading();
        let direct = direct();

        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        let ra = direct.pread(direct_file.as_fd(), &mut a, 10).unwrap();
        let rb = offloading.pread(offload_file.as_fd(), &mut b, 10).unwrap();
        assert_eq!((ra, a), (rb, b));

        let past_end_a = direct.pread(direct_file.as_fd(), &mut a, 1000).unwrap();
        let past_end_b = offloading.pread(offload_file.as_fd(), &mut b, 1000).unwrap();
        assert_eq!(past_end_a, 0);
        assert_eq!(past_end_b, 0);
    }

    #[test]
    fn test_errors_identical_direct_and_offloaded() {
        // A read-only descriptor rejects writes with EBADF.
        let path = tempfile::NamedTempFile::new().unwrap();
        let read_only = File::open(path.path()).unwrap();
        let (offloading, adapter) = offloading();

        let direct_err = direct().write(read_only.as_fd(), b"x").unwrap_err();
        let offload_err = offloading.write(read_only.as_fd(), b"x").unwrap_err();
        assert_eq!(direct_err.raw_os_error(), Some(libc::EBADF));
        assert_eq!(offload_err.raw_os_error(), direct_err.raw_os_error());
        assert_eq!(adapter.submissions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inactive_adapter_same_as_none() {
        let gate = IoDispatchGate::new();
        let adapter = ThreadAdapter::new(false);
        gate.install(adapter.clone());
        let with_inactive = FileDispatcher::with_gate(gate);
        let without = direct();

        let file = file_with(b"abc");
        let mut a = [0u8; 3];
        let mut b = [0u8; 3];
        assert_eq!(
            with_inactive.pread(file.as_fd(), &mut a, 0).unwrap(),
            without.pread(file.as_fd(), &mut b, 0).unwrap()
        );
        assert_eq!(a, b);
        assert_eq!(adapter.submissions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_lock_and_release() {
        let dispatcher = direct();
        let file = file_with(b"locked region");
        let fd = file.as_fd();

        assert_eq!(dispatcher.lock(fd, false, 0, 4, false).unwrap(), LockStatus::Acquired);
        dispatcher.release(fd, 0, 4).unwrap();
        assert_eq!(
            dispatcher.lock(fd, true, 0, u64::MAX, false).unwrap(),
            LockStatus::Acquired
        );
        dispatcher.release(fd, 0, u64::MAX).unwrap();
    }

    #[test]
    fn test_shared_lock_needs_readable_fd() {
        let path = tempfile::NamedTempFile::new().unwrap();
        let write_only = std::fs::OpenOptions::new()
            .write(true)
            .open(path.path())
            .unwrap();
        let err = direct().lock(write_only.as_fd(), false, 0, 1, true).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn test_close() {
        let file = tempfile::tempfile().unwrap();
        direct().close(OwnedFd::from(file)).unwrap();
    }

    #[test]
    fn test_offset_out_of_range() {
        let file = tempfile::tempfile().unwrap();
        let err = direct().seek(file.as_fd(), u64::MAX).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
