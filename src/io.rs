//! ABI descriptor: the `Io` trait captures everything that differs between
//! the 32-bit and 64-bit flat-binder-object / transaction-data layouts, so
//! the parcel codec and driver never cast the read buffer directly (see
//! "Mixed 32/64-bit ABI on one build" in the design notes).

use std::convert::{TryFrom, TryInto};

use num_enum::{IntoPrimitive, TryFromPrimitive};

macro_rules! pack_chars {
    ($c1:expr, $c2:expr, $c3:expr, $c4:expr) => {
        (($c1 as u32) << 24) | (($c2 as u32) << 16) | (($c3 as u32) << 8) | ($c4 as u32)
    };
}

const BINDER_TYPE_LARGE: u8 = 0x85;

/// `binder_type_t` - the tag on a flat binder object.
#[repr(u32)]
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum BinderType {
    Binder = pack_chars!(b's', b'b', b'*', BINDER_TYPE_LARGE),
    WeakBinder = pack_chars!(b'w', b'b', b'*', BINDER_TYPE_LARGE),
    Handle = pack_chars!(b's', b'h', b'*', BINDER_TYPE_LARGE),
    WeakHandle = pack_chars!(b'w', b'h', b'*', BINDER_TYPE_LARGE),
    Fd = pack_chars!(b'f', b'd', b'*', BINDER_TYPE_LARGE),
    Fda = pack_chars!(b'f', b'd', b'a', BINDER_TYPE_LARGE),
    Ptr = pack_chars!(b'p', b't', b'*', BINDER_TYPE_LARGE),
}

macro_rules! iow {
    ($c1:expr, $c2:expr, $c3:expr) => {
        (0x40u32 << 24) | (($c3 as u32) << 16) | (($c1 as u32) << 8) | ($c2 as u32)
    };
}

/// `BC_*` - commands written into the write buffer of `BINDER_WRITE_READ`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
pub enum BcCommand {
    Transaction = iow!(b'c', 0, 0x40),
    Reply = iow!(b'c', 1, 0x40),
    AcquireResult = iow!(b'c', 2, 0x4),
    FreeBuffer = iow!(b'c', 3, 0x8),
    IncRefs = iow!(b'c', 4, 0x4),
    Acquire = iow!(b'c', 5, 0x4),
    Release = iow!(b'c', 6, 0x4),
    DecRefs = iow!(b'c', 7, 0x4),
    IncRefsDone = iow!(b'c', 8, 0x8),
    AcquireDone = iow!(b'c', 9, 0x8),
    AttemptAcquire = iow!(b'c', 10, 0x10),
    RegisterLooper = 25355,
    EnterLooper = 25356,
    ExitLooper = 25357,
    RequestDeathNotification = iow!(b'c', 14, 0x10),
    ClearDeathNotification = iow!(b'c', 15, 0x10),
    DeadBinderDone = iow!(b'c', 16, 0x8),
}

/// `BR_*` - events the kernel places in the read buffer.
#[repr(u32)]
#[derive(Debug, IntoPrimitive, TryFromPrimitive, Hash, Clone, Copy, PartialEq, Eq)]
pub enum BrCode {
    Error = 2147774976,
    Ok = 0x7201,
    Transaction = 0x80407202,
    Reply = 0x80407203,
    AcquireResult = 2147774980,
    DeadReply = 29189,
    TransactionComplete = 29190,
    IncRefs = 0x80107207,
    Acquire = 2148037128,
    Release = 2148037129,
    DecRefs = 2148037130,
    AttemptAcquire = 2148299275,
    Noop = 29196,
    SpawnLooper = 29197,
    Finished = 29198,
    DeadBinder = 2147774991,
    ClearDeathNotificationDone = 2147774992,
    FailedReply = 29201,
}

/// A flat binder object as it appears inline in a parcel's payload.
///
/// `handle_or_binder` and `cookie` are carried as `u64` regardless of the
/// active ABI; the active [`Io`] narrows them to `u32` when writing a
/// 32-bit flat object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatBinderObject {
    pub kind: BinderType,
    pub flags: u32,
    pub handle_or_binder: u64,
    pub cookie: u64,
}

impl FlatBinderObject {
    pub fn local(pointer: u64, cookie: u64, flags: u32) -> Self {
        Self { kind: BinderType::Binder, flags, handle_or_binder: pointer, cookie }
    }

    pub fn handle(handle: u32, flags: u32) -> Self {
        Self { kind: BinderType::Handle, flags, handle_or_binder: handle as u64, cookie: 0 }
    }

    pub fn fd(fd: i32, take_ownership: bool) -> Self {
        Self {
            kind: BinderType::Fd,
            flags: if take_ownership { 1 } else { 0 } | 0x17f,
            handle_or_binder: fd as u32 as u64,
            cookie: 0,
        }
    }

    pub fn handle_value(&self) -> u32 {
        self.handle_or_binder as u32
    }
}

/// A `binder_buffer_object` (`BINDER_TYPE_PTR`): a reference to a
/// variable-length region in the parcel's auxiliary buffer area, optionally
/// anchored to a parent object (nested sub-buffers, e.g. `hidl_vec<T>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferObject {
    pub length: u64,
    pub parent: Option<(u32, u64)>,
}

const BINDER_BUFFER_FLAG_HAS_PARENT: u32 = 0x01;

/// ABI descriptor selected per `Driver`/device. Implementors encode/decode
/// the size-dependent portions of the wire format: flat binder objects,
/// buffer objects and `binder_transaction_data`.
pub trait Io: Send + Sync + std::fmt::Debug {
    /// Size in bytes of one pointer/handle field on this ABI.
    fn word_size(&self) -> usize;

    fn write_flat_object(&self, out: &mut Vec<u8>, obj: &FlatBinderObject);
    fn read_flat_object(&self, data: &[u8]) -> Option<FlatBinderObject>;
    fn flat_object_size(&self) -> usize;

    fn write_buffer_object(&self, out: &mut Vec<u8>, obj: &BufferObject);
    fn read_buffer_object(&self, data: &[u8]) -> Option<BufferObject>;
    fn buffer_object_size(&self) -> usize;

    /// `sizeof(struct binder_transaction_data)` on this ABI; folded into
    /// the `BC_TRANSACTION`/`BR_TRANSACTION` opcode by the real kernel UAPI.
    fn transaction_data_size(&self) -> usize;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Io64;

impl Io for Io64 {
    fn word_size(&self) -> usize { 8 }

    fn write_flat_object(&self, out: &mut Vec<u8>, obj: &FlatBinderObject) {
        out.extend_from_slice(&u32::from(obj.kind).to_le_bytes());
        out.extend_from_slice(&obj.flags.to_le_bytes());
        out.extend_from_slice(&obj.handle_or_binder.to_le_bytes());
        out.extend_from_slice(&obj.cookie.to_le_bytes());
    }

    fn read_flat_object(&self, data: &[u8]) -> Option<FlatBinderObject> {
        if data.len() < self.flat_object_size() { return None; }
        let kind = BinderType::try_from(u32::from_le_bytes(data[0..4].try_into().ok()?)).ok()?;
        let flags = u32::from_le_bytes(data[4..8].try_into().ok()?);
        let handle_or_binder = u64::from_le_bytes(data[8..16].try_into().ok()?);
        let cookie = u64::from_le_bytes(data[16..24].try_into().ok()?);
        Some(FlatBinderObject { kind, flags, handle_or_binder, cookie })
    }

    fn flat_object_size(&self) -> usize { 24 }

    fn write_buffer_object(&self, out: &mut Vec<u8>, obj: &BufferObject) {
        let flags = if obj.parent.is_some() { BINDER_BUFFER_FLAG_HAS_PARENT } else { 0 };
        out.extend_from_slice(&u32::from(BinderType::Ptr).to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // buffer pointer, filled by kernel/driver
        out.extend_from_slice(&obj.length.to_le_bytes());
        let (parent_index, parent_offset) = obj.parent.unwrap_or((0, 0));
        out.extend_from_slice(&parent_index.to_le_bytes());
        out.extend_from_slice(&parent_offset.to_le_bytes());
    }

    fn read_buffer_object(&self, data: &[u8]) -> Option<BufferObject> {
        if data.len() < self.buffer_object_size() { return None; }
        let flags = u32::from_le_bytes(data[4..8].try_into().ok()?);
        let length = u64::from_le_bytes(data[16..24].try_into().ok()?);
        let parent_index = u32::from_le_bytes(data[24..28].try_into().ok()?);
        let parent_offset = u64::from_le_bytes(data[28..36].try_into().ok()?);
        let parent = if flags & BINDER_BUFFER_FLAG_HAS_PARENT != 0 {
            Some((parent_index, parent_offset))
        } else {
            None
        };
        Some(BufferObject { length, parent })
    }

    fn buffer_object_size(&self) -> usize { 36 }

    fn transaction_data_size(&self) -> usize { 64 }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Io32;

impl Io for Io32 {
    fn word_size(&self) -> usize { 4 }

    fn write_flat_object(&self, out: &mut Vec<u8>, obj: &FlatBinderObject) {
        out.extend_from_slice(&u32::from(obj.kind).to_le_bytes());
        out.extend_from_slice(&obj.flags.to_le_bytes());
        out.extend_from_slice(&(obj.handle_or_binder as u32).to_le_bytes());
        out.extend_from_slice(&(obj.cookie as u32).to_le_bytes());
    }

    fn read_flat_object(&self, data: &[u8]) -> Option<FlatBinderObject> {
        if data.len() < self.flat_object_size() { return None; }
        let kind = BinderType::try_from(u32::from_le_bytes(data[0..4].try_into().ok()?)).ok()?;
        let flags = u32::from_le_bytes(data[4..8].try_into().ok()?);
        let handle_or_binder = u32::from_le_bytes(data[8..12].try_into().ok()?) as u64;
        let cookie = u32::from_le_bytes(data[12..16].try_into().ok()?) as u64;
        Some(FlatBinderObject { kind, flags, handle_or_binder, cookie })
    }

    fn flat_object_size(&self) -> usize { 16 }

    fn write_buffer_object(&self, out: &mut Vec<u8>, obj: &BufferObject) {
        let flags = if obj.parent.is_some() { BINDER_BUFFER_FLAG_HAS_PARENT } else { 0 };
        out.extend_from_slice(&u32::from(BinderType::Ptr).to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(obj.length as u32).to_le_bytes());
        let (parent_index, parent_offset) = obj.parent.unwrap_or((0, 0));
        out.extend_from_slice(&parent_index.to_le_bytes());
        out.extend_from_slice(&(parent_offset as u32).to_le_bytes());
    }

    fn read_buffer_object(&self, data: &[u8]) -> Option<BufferObject> {
        if data.len() < self.buffer_object_size() { return None; }
        let flags = u32::from_le_bytes(data[4..8].try_into().ok()?);
        let length = u32::from_le_bytes(data[12..16].try_into().ok()?) as u64;
        let parent_index = u32::from_le_bytes(data[16..20].try_into().ok()?);
        let parent_offset = u32::from_le_bytes(data[20..24].try_into().ok()?) as u64;
        let parent = if flags & BINDER_BUFFER_FLAG_HAS_PARENT != 0 {
            Some((parent_index, parent_offset))
        } else {
            None
        };
        Some(BufferObject { length, parent })
    }

    fn buffer_object_size(&self) -> usize { 24 }

    fn transaction_data_size(&self) -> usize { 48 }
}

/// The `Io` matching the process's native pointer width - what a real
/// device node speaks when the kernel and userspace share a bitness.
pub fn native_io() -> &'static dyn Io {
    #[cfg(target_pointer_width = "64")]
    { &Io64 }
    #[cfg(not(target_pointer_width = "64"))]
    { &Io32 }
}
