//! The gateway to the kernel device node: opens `/dev/binder` (or
//! `/dev/hwbinder`, `/dev/vndbinder`), mmaps its receive window, and turns
//! `BINDER_WRITE_READ` ioctls into typed [`BrEvent`]s. Every other module
//! reaches the driver only through this type - nothing else calls
//! `ioctl`/`mmap` directly.

use std::{
    convert::TryFrom,
    ffi::c_void,
    os::unix::io::RawFd,
    ptr,
    sync::{Arc, Mutex, Weak},
};

use nix::{
    fcntl::{open, OFlag},
    ioctl_readwrite, ioctl_write_int, ioctl_write_ptr,
    sys::{
        mman::{mmap, MapFlags, ProtFlags},
        stat::Mode,
    },
    unistd::close,
};

use crate::{
    buffer::Buffer,
    config,
    io::{native_io, BcCommand, BrCode, Io},
    protocol::RpcProtocol,
    Error, Parcel,
};

const PAGE_SIZE: usize = 0x1000;
const BINDER_VM_SIZE: usize = (1024 * 1024) - PAGE_SIZE * 2;
const READ_BUFFER_SIZE: usize = 32 * 1024;
const DEFAULT_MAX_THREADS: u32 = 15;

#[repr(C)]
struct BinderVersion {
    protocol_version: i32,
}

#[repr(C)]
struct BinderWriteRead {
    write_size: usize,
    write_consumed: usize,
    write_buffer: usize,
    read_size: usize,
    read_consumed: usize,
    read_buffer: usize,
}

ioctl_readwrite!(binder_write_read, b'b', 1, BinderWriteRead);
ioctl_write_ptr!(binder_set_max_threads, b'b', 5, u32);
ioctl_write_int!(binder_thread_exit, b'b', 8);
ioctl_readwrite!(binder_version, b'b', 9, BinderVersion);

/// Everything the kernel can hand back on a `BINDER_WRITE_READ` read,
/// decoded from its `BR_*` tag. One driver `read` can (and usually does)
/// yield several of these in sequence.
#[derive(Debug)]
pub enum BrEvent {
    Noop,
    TransactionComplete,
    SpawnLooper,
    Finished,
    AcquireResult(bool),
    Error(i32),
    FailedReply,
    DeadReply,
    IncRefs { cookie: u64 },
    Acquire { cookie: u64 },
    Release { cookie: u64 },
    DecRefs { cookie: u64 },
    AttemptAcquire { cookie: u64 },
    DeadBinder { cookie: u64 },
    ClearDeathNotificationDone { cookie: u64 },
    Transaction {
        target_cookie: u64,
        code: u32,
        flags: u32,
        sender_pid: u32,
        sender_euid: u32,
        data: Buffer,
    },
    Reply {
        flags: u32,
        data: Buffer,
    },
}

#[repr(C)]
#[derive(Clone, Copy)]
struct TransactionDataHeader {
    target: u64,
    cookie: u64,
    code: u32,
    flags: u32,
    sender_pid: i32,
    sender_euid: i32,
    data_size: usize,
    offsets_size: usize,
    /// Outgoing: a plain userspace pointer the kernel copies from.
    /// Incoming: a pointer into this driver's mmap'd receive window.
    data: usize,
    offsets: usize,
}

/// An open binder device node: fd, mmap'd receive window, resolved ABI and
/// RPC dialect. One `Driver` per device path per process (see
/// `Ipc::get_or_open`, which enforces that).
pub struct Driver {
    fd: RawFd,
    mem: *mut c_void,
    io: &'static dyn Io,
    protocol: &'static dyn RpcProtocol,
    // Serializes ioctl(BINDER_WRITE_READ) so concurrent callers don't race
    // on the single read buffer; matches one-fd-per-process, not
    // one-fd-per-thread.
    write_read_lock: Mutex<()>,
    // Lets decode_events hand out an `Arc<Driver>` to the `Buffer`s it
    // constructs, without every caller of `transact`/`poll` needing to hold
    // one itself.
    self_weak: Weak<Driver>,
}

unsafe impl Send for Driver {}
unsafe impl Sync for Driver {}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver").field("fd", &self.fd).field("protocol", &self.protocol.name()).finish()
    }
}

impl Driver {
    pub fn open(path: &str) -> Result<Arc<Self>, Error> {
        let flags = OFlag::O_RDWR | OFlag::O_CLOEXEC;
        let fd = open(path, flags, Mode::empty())?;

        let mut version = BinderVersion { protocol_version: 0 };
        unsafe { binder_version(fd, &mut version)? };
        debug!("{}: binder protocol version {}", path, version.protocol_version);

        let map_flags = MapFlags::MAP_PRIVATE | MapFlags::MAP_NORESERVE;
        let mem = unsafe { mmap(ptr::null_mut(), BINDER_VM_SIZE, ProtFlags::PROT_READ, map_flags, fd, 0) }?;

        unsafe { binder_set_max_threads(fd, &DEFAULT_MAX_THREADS)? };

        let protocol = config::resolve_protocol(path)?;
        Ok(Arc::new_cyclic(|weak| Self {
            fd,
            mem,
            io: native_io(),
            protocol,
            write_read_lock: Mutex::new(()),
            self_weak: weak.clone(),
        }))
    }

    pub fn fd(&self) -> RawFd { self.fd }
    /// Base address of the mmap'd receive window; kept alive for the
    /// lifetime of the driver since incoming `BR_TRANSACTION`/`BR_REPLY`
    /// pointers are addresses within it.
    pub fn mem_base(&self) -> *const c_void { self.mem }
    pub fn io(&self) -> &'static dyn Io { self.io }
    pub fn protocol(&self) -> &'static dyn RpcProtocol { self.protocol }

    pub fn enter_looper(&self) -> Result<(), Error> {
        let mut out = Parcel::with_io(self.io);
        out.write_u32(u32::from(BcCommand::EnterLooper))?;
        self.write_read(&out, false)?;
        Ok(())
    }

    pub fn exit_looper(&self) -> Result<(), Error> {
        let mut out = Parcel::with_io(self.io);
        out.write_u32(u32::from(BcCommand::ExitLooper))?;
        self.write_read(&out, false)?;
        Ok(())
    }

    fn simple_cookie_command(&self, command: BcCommand, cookie: u64) -> Result<(), Error> {
        let mut out = Parcel::with_io(self.io);
        out.write_u32(u32::from(command))?;
        out.write_usize(cookie as usize)?;
        self.write_read(&out, false)?;
        Ok(())
    }

    pub fn increfs(&self, handle: u32) -> Result<(), Error> {
        let mut out = Parcel::with_io(self.io);
        out.write_u32(u32::from(BcCommand::IncRefs))?;
        out.write_u32(handle)?;
        self.write_read(&out, false)?;
        Ok(())
    }

    pub fn decrefs(&self, handle: u32) -> Result<(), Error> {
        let mut out = Parcel::with_io(self.io);
        out.write_u32(u32::from(BcCommand::DecRefs))?;
        out.write_u32(handle)?;
        self.write_read(&out, false)?;
        Ok(())
    }

    pub fn acquire(&self, handle: u32) -> Result<(), Error> {
        let mut out = Parcel::with_io(self.io);
        out.write_u32(u32::from(BcCommand::Acquire))?;
        out.write_u32(handle)?;
        self.write_read(&out, false)?;
        Ok(())
    }

    pub fn release(&self, handle: u32) -> Result<(), Error> {
        let mut out = Parcel::with_io(self.io);
        out.write_u32(u32::from(BcCommand::Release))?;
        out.write_u32(handle)?;
        self.write_read(&out, false)?;
        Ok(())
    }

    pub fn request_death_notification(&self, handle: u32, cookie: u64) -> Result<(), Error> {
        let mut out = Parcel::with_io(self.io);
        out.write_u32(u32::from(BcCommand::RequestDeathNotification))?;
        out.write_u32(handle)?;
        out.write_usize(cookie as usize)?;
        self.write_read(&out, false)?;
        Ok(())
    }

    pub fn clear_death_notification(&self, handle: u32, cookie: u64) -> Result<(), Error> {
        let mut out = Parcel::with_io(self.io);
        out.write_u32(u32::from(BcCommand::ClearDeathNotification))?;
        out.write_u32(handle)?;
        out.write_usize(cookie as usize)?;
        self.write_read(&out, false)?;
        Ok(())
    }

    pub fn dead_binder_done(&self, cookie: u64) -> Result<(), Error> {
        self.simple_cookie_command(BcCommand::DeadBinderDone, cookie)
    }

    pub fn acquire_done(&self, cookie: u64) -> Result<(), Error> {
        self.simple_cookie_command(BcCommand::AcquireDone, cookie)
    }

    pub fn increfs_done(&self, cookie: u64) -> Result<(), Error> {
        self.simple_cookie_command(BcCommand::IncRefsDone, cookie)
    }

    pub fn free_buffer(&self, data_ptr: u64) -> Result<(), Error> {
        let mut out = Parcel::with_io(self.io);
        out.write_u32(u32::from(BcCommand::FreeBuffer))?;
        out.write_usize(data_ptr as usize)?;
        self.write_read(&out, false)?;
        Ok(())
    }

    /// Submit a `BC_TRANSACTION`/`BC_REPLY` and drain every `BR_*` entry the
    /// kernel returns in response, in order. `data` must stay alive for the
    /// duration of the call: its backing bytes are referenced by raw
    /// userspace pointer, not copied into the command stream.
    pub fn transact(&self, command: BcCommand, target: u64, code: u32, flags: u32, data: &Parcel) -> Result<Vec<BrEvent>, Error> {
        let header = TransactionDataHeader {
            target,
            cookie: 0,
            code,
            flags,
            sender_pid: 0,
            sender_euid: 0,
            data_size: data.len(),
            offsets_size: data.offsets_len() * std::mem::size_of::<usize>(),
            data: data.to_slice().as_ptr() as usize,
            offsets: if data.offsets_len() != 0 { data.offsets().as_ptr() as usize } else { 0 },
        };

        let mut out = Parcel::with_io(self.io);
        out.write_u32(u32::from(command))?;
        out.write_pod(&header)?;

        self.read_events(&out, true)
    }

    /// Drain pending `BR_*` entries without submitting a transaction -
    /// what a looper thread does while idle.
    pub fn poll(&self) -> Result<Vec<BrEvent>, Error> {
        self.read_events(&Parcel::with_io(self.io), true)
    }

    fn read_events(&self, out: &Parcel, with_read: bool) -> Result<Vec<BrEvent>, Error> {
        let in_parcel = self.write_read(out, with_read)?;
        self.decode_events(in_parcel)
    }

    fn decode_events(&self, mut data: Parcel) -> Result<Vec<BrEvent>, Error> {
        let mut events = Vec::new();
        while data.has_unread_data() {
            let raw = data.read_u32()?;
            let code = BrCode::try_from(raw).map_err(|_| Error::BadEnumValue)?;
            events.push(match code {
                BrCode::Noop => BrEvent::Noop,
                BrCode::TransactionComplete => BrEvent::TransactionComplete,
                BrCode::SpawnLooper => BrEvent::SpawnLooper,
                BrCode::Finished => BrEvent::Finished,
                BrCode::Ok => continue,
                BrCode::AcquireResult => BrEvent::AcquireResult(data.read_i32()? != 0),
                BrCode::Error => BrEvent::Error(data.read_i32()?),
                BrCode::FailedReply => BrEvent::FailedReply,
                BrCode::DeadReply => BrEvent::DeadReply,
                BrCode::IncRefs => BrEvent::IncRefs { cookie: data.read_usize()? as u64 },
                BrCode::Acquire => BrEvent::Acquire { cookie: data.read_usize()? as u64 },
                BrCode::Release => BrEvent::Release { cookie: data.read_usize()? as u64 },
                BrCode::DecRefs => BrEvent::DecRefs { cookie: data.read_usize()? as u64 },
                BrCode::AttemptAcquire => BrEvent::AttemptAcquire { cookie: data.read_usize()? as u64 },
                BrCode::DeadBinder => BrEvent::DeadBinder { cookie: data.read_usize()? as u64 },
                BrCode::ClearDeathNotificationDone => {
                    BrEvent::ClearDeathNotificationDone { cookie: data.read_usize()? as u64 }
                }
                BrCode::Transaction | BrCode::Reply => {
                    let header: TransactionDataHeader = data.read_pod()?;
                    // `header.data`/`header.offsets` are pointers into this
                    // driver's mmap'd receive window, not inline bytes.
                    let payload = unsafe {
                        std::slice::from_raw_parts(header.data as *const u8, header.data_size)
                    };
                    let offset_words = unsafe {
                        std::slice::from_raw_parts(
                            header.offsets as *const usize,
                            header.offsets_size / std::mem::size_of::<usize>(),
                        )
                    };
                    let body = Parcel::from_buffer_parts(payload, offset_words, Vec::new(), self.io);
                    // Payload bytes are copied into `body`'s own Vec above,
                    // so the kernel's buffer can be released through the
                    // normal refcounted path (`Buffer`/`BufferContents`)
                    // instead of being held open until some later point.
                    let driver = self.self_weak.upgrade().expect("driver dropped while its own event loop runs");
                    let buffer = Buffer::new(driver, header.data as u64, body);
                    if code == BrCode::Transaction {
                        BrEvent::Transaction {
                            target_cookie: header.cookie,
                            code: header.code,
                            flags: header.flags,
                            sender_pid: header.sender_pid as u32,
                            sender_euid: header.sender_euid as u32,
                            data: buffer,
                        }
                    } else {
                        BrEvent::Reply { flags: header.flags, data: buffer }
                    }
                }
            });
        }
        Ok(events)
    }

    fn write_read(&self, data_out: &Parcel, with_read: bool) -> Result<Parcel, Error> {
        let _guard = self.write_read_lock.lock().unwrap();
        let mut in_buf = vec![0u8; if with_read { READ_BUFFER_SIZE } else { 0 }];

        let mut write_read_struct = BinderWriteRead {
            write_size: data_out.len(),
            write_consumed: 0,
            write_buffer: data_out.to_slice().as_ptr() as usize,
            read_size: in_buf.len(),
            read_consumed: 0,
            read_buffer: in_buf.as_mut_ptr() as usize,
        };

        unsafe { binder_write_read(self.fd, &mut write_read_struct)? };
        trace!(
            "write_read: wrote {}/{}, read {}",
            write_read_struct.write_consumed, data_out.len(), write_read_struct.read_consumed
        );

        Ok(Parcel::from_slice_with_io(&in_buf[..write_read_struct.read_consumed], self.io))
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if let Err(err) = self.exit_looper() {
            warn!("exit_looper failed during drop: {}", err);
        }
        unsafe {
            let _ = binder_thread_exit(self.fd, 0);
        }
        let _ = close(self.fd);
    }
}
