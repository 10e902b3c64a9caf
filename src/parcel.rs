//! The wire codec: a `Parcel` is a payload cursor plus the offsets of every
//! flat/buffer object embedded in it, exactly mirroring what the kernel's
//! `binder_transaction_data` carries alongside the raw bytes.

use std::{
    fmt,
    io::{Cursor, Read, Write},
    mem::size_of,
    os::unix::io::RawFd,
    slice,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    io::{native_io, BinderType, BufferObject, FlatBinderObject, Io},
    Error,
};

/// A reference to an object materialized out of a parcel's object table.
/// `Parcel` never touches the registry itself (it doesn't know the kernel
/// fd or the process's live object maps); callers resolve these against an
/// `ObjectRegistry`.
#[derive(Debug, Clone, Copy)]
pub enum RawObject {
    Binder { pointer: u64, cookie: u64, flags: u32 },
    WeakBinder { pointer: u64, cookie: u64, flags: u32 },
    Handle { handle: u32, flags: u32 },
    WeakHandle { handle: u32, flags: u32 },
    Fd(RawFd),
}

/// A serialized binder parcel: payload bytes, the ordered offsets of every
/// embedded flat/buffer object within those bytes, and an auxiliary region
/// backing variable-length sub-objects (HIDL strings and vectors).
///
/// Doubles as both the writer side (`LocalRequest`/`LocalReply`) and, once
/// filled from a `Buffer`, the reader side (`RemoteRequest`/`RemoteReply`).
pub struct Parcel {
    cursor: Cursor<Vec<u8>>,
    object_offsets: Vec<usize>,
    aux: Vec<u8>,
    aux_read_pos: usize,
    next_object_index: usize,
    io: &'static dyn Io,
}

impl fmt::Debug for Parcel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parcel")
            .field("data", &self.cursor.get_ref())
            .field("offsets", &self.object_offsets)
            .field("aux_len", &self.aux.len())
            .finish()
    }
}

impl Parcel {
    pub fn empty() -> Self {
        Self::with_io(native_io())
    }

    pub fn with_io(io: &'static dyn Io) -> Self {
        Self {
            cursor: Cursor::new(Vec::new()),
            object_offsets: Vec::new(),
            aux: Vec::new(),
            aux_read_pos: 0,
            next_object_index: 0,
            io,
        }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_slice_with_io(data, native_io())
    }

    pub fn from_slice_with_io(data: &[u8], io: &'static dyn Io) -> Self {
        Self {
            cursor: Cursor::new(data.to_vec()),
            object_offsets: Vec::new(),
            aux: Vec::new(),
            aux_read_pos: 0,
            next_object_index: 0,
            io,
        }
    }

    /// Reconstruct a parcel from a buffer the kernel filled in: the main
    /// payload, the offsets array it supplied alongside it, and the
    /// auxiliary-buffers region trailing the payload in the same mapping.
    pub fn from_buffer_parts(data: &[u8], offsets: &[usize], aux: Vec<u8>, io: &'static dyn Io) -> Self {
        Self {
            cursor: Cursor::new(data.to_vec()),
            object_offsets: offsets.to_vec(),
            aux,
            aux_read_pos: 0,
            next_object_index: 0,
            io,
        }
    }

    pub fn reset(&mut self) {
        self.cursor.set_position(0);
        self.cursor.get_mut().clear();
        self.object_offsets.clear();
        self.aux.clear();
        self.aux_read_pos = 0;
        self.next_object_index = 0;
    }

    pub fn io(&self) -> &'static dyn Io { self.io }
    pub fn position(&self) -> u64 { self.cursor.position() }
    pub fn set_position(&mut self, pos: u64) { self.cursor.set_position(pos) }
    pub fn to_slice(&self) -> &[u8] { self.cursor.get_ref() }
    pub fn len(&self) -> usize { self.cursor.get_ref().len() }
    pub fn is_empty(&self) -> bool { self.cursor.get_ref().is_empty() }
    pub fn offsets(&self) -> &[usize] { &self.object_offsets }
    pub fn offsets_len(&self) -> usize { self.object_offsets.len() }
    pub fn aux_len(&self) -> usize { self.aux.len() }
    pub fn has_unread_data(&self) -> bool { self.cursor.position() != self.len() as u64 }

    /// Append another parcel's bytes, object offsets and aux region, used
    /// by `Client::new_request` to glue a pre-rendered RPC header onto
    /// caller-supplied arguments.
    pub fn append_parcel(&mut self, other: &Parcel) -> Result<(), Error> {
        let base = self.cursor.position();
        self.cursor.write_all(other.to_slice())?;
        for offset in &other.object_offsets {
            self.object_offsets.push(offset + base as usize);
        }
        self.aux.extend_from_slice(&other.aux);
        Ok(())
    }

    pub fn write_i32(&mut self, data: i32) -> Result<(), Error> {
        self.cursor.write_i32::<LittleEndian>(data)?;
        Ok(())
    }

    pub fn write_u32(&mut self, data: u32) -> Result<(), Error> {
        self.cursor.write_u32::<LittleEndian>(data)?;
        Ok(())
    }

    pub fn write_u64(&mut self, data: u64) -> Result<(), Error> {
        self.cursor.write_u64::<LittleEndian>(data)?;
        Ok(())
    }

    pub fn write_i64(&mut self, data: i64) -> Result<(), Error> {
        self.cursor.write_i64::<LittleEndian>(data)?;
        Ok(())
    }

    pub fn write_u16(&mut self, data: u16) -> Result<(), Error> {
        self.cursor.write_u16::<LittleEndian>(data)?;
        Ok(())
    }

    pub fn write_bool(&mut self, data: bool) -> Result<(), Error> {
        self.write_i32(data as i32)
    }

    pub fn write_u8(&mut self, data: u8) -> Result<(), Error> {
        self.cursor.write_u8(data)?;
        Ok(())
    }

    pub fn write_usize(&mut self, data: usize) -> Result<(), Error> {
        if self.io.word_size() == 4 {
            self.write_u32(data as u32)
        } else {
            self.write_u64(data as u64)
        }
    }

    /// Raw bytes, zero-padded to a 4-byte multiple.
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        self.write_without_len_prefix(data)
    }

    pub fn pad_to_4(&mut self) -> Result<(), Error> {
        let pos = self.cursor.position() as usize;
        let pad = (4 - (pos % 4)) % 4;
        if pad > 0 {
            self.cursor.write_all(&vec![0u8; pad])?;
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> { Ok(self.cursor.read_u8()?) }
    pub fn read_u16(&mut self) -> Result<u16, Error> { Ok(self.cursor.read_u16::<LittleEndian>()?) }
    pub fn read_u32(&mut self) -> Result<u32, Error> { Ok(self.cursor.read_u32::<LittleEndian>()?) }
    pub fn read_u64(&mut self) -> Result<u64, Error> { Ok(self.cursor.read_u64::<LittleEndian>()?) }
    pub fn read_i32(&mut self) -> Result<i32, Error> { Ok(self.cursor.read_i32::<LittleEndian>()?) }
    pub fn read_i64(&mut self) -> Result<i64, Error> { Ok(self.cursor.read_i64::<LittleEndian>()?) }

    pub fn read_usize(&mut self) -> Result<usize, Error> {
        if self.io.word_size() == 4 {
            Ok(self.read_u32()? as usize)
        } else {
            Ok(self.read_u64()? as usize)
        }
    }

    /// Read `size` bytes, rounded up to a 4-byte multiple to match `write`.
    pub fn read(&mut self, size: usize) -> Result<Vec<u8>, Error> {
        let padded = (size + 3) & !3;
        let mut data = vec![0u8; padded];
        self.cursor.read_exact(&mut data)?;
        Ok(data)
    }

    fn write_without_len_prefix(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let padded_len = (bytes.len() + 3) & !3;
        let mut data = bytes.to_vec();
        data.resize(padded_len, 0);
        self.cursor.write_all(&data)?;
        Ok(())
    }

    pub fn write_str16(&mut self, string: &str) -> Result<(), Error> {
        self.write_i32(string.encode_utf16().count() as i32)?;
        for c in string.encode_utf16() {
            self.cursor.write_u16::<LittleEndian>(c)?;
        }
        self.cursor.write_u16::<LittleEndian>(0)?;
        self.pad_to_4()?;
        Ok(())
    }

    pub fn read_str16(&mut self) -> Result<String, Error> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(String::new());
        }
        let mut units = Vec::with_capacity(len as usize);
        for _ in 0..len {
            units.push(self.cursor.read_u16::<LittleEndian>()?);
        }
        self.cursor.read_u16::<LittleEndian>()?; // trailing NUL
        if !(len as usize + 1).is_multiple_of(2) {
            self.cursor.read_u16::<LittleEndian>()?;
        }
        Ok(String::from_utf16(&units)?)
    }

    pub fn write_str(&mut self, string: &str) -> Result<(), Error> {
        self.write_i32(string.len() as i32)?;
        let mut bytes = string.as_bytes().to_vec();
        bytes.push(0);
        self.write_without_len_prefix(&bytes)
    }

    pub fn read_str(&mut self) -> Result<String, Error> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(String::new());
        }
        let bytes = self.read(len as usize + 1)?;
        let mut s = String::from_utf8(bytes[..len as usize].to_vec())?;
        s.truncate(len as usize);
        Ok(s)
    }

    /// A bare NUL-terminated byte string, 4-byte padded - HIDL's RPC header.
    pub fn write_nul_terminated_str(&mut self, s: &str) -> Result<(), Error> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.write_without_len_prefix(&bytes)
    }

    pub fn read_nul_terminated_str(&mut self) -> Result<String, Error> {
        let start = self.cursor.position() as usize;
        let data = self.cursor.get_ref();
        let nul_pos = data[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::DeserializationError)?;
        let s = String::from_utf8(data[start..start + nul_pos].to_vec())?;
        self.cursor.set_position((start + nul_pos + 1) as u64);
        self.pad_to_4()?;
        Ok(s)
    }

    // -- object table --------------------------------------------------

    fn push_object_offset(&mut self) -> usize {
        let index = self.object_offsets.len();
        self.object_offsets.push(self.cursor.position() as usize);
        index
    }

    /// Confirms the reader's cursor lines up with the next recorded object
    /// offset, as the real driver's own parcel reader does before trusting
    /// a `BINDER_TYPE_*` tag at the current position.
    fn assert_next_object(&self) -> Result<(), Error> {
        match self.object_offsets.get(self.next_object_index) {
            Some(&off) if off as u64 == self.cursor.position() => Ok(()),
            _ => Err(Error::ObjectOffsetMismatch),
        }
    }

    pub fn write_raw_flat_object(&mut self, obj: FlatBinderObject) -> Result<usize, Error> {
        let index = self.push_object_offset();
        let mut bytes = Vec::with_capacity(self.io.flat_object_size());
        self.io.write_flat_object(&mut bytes, &obj);
        self.cursor.write_all(&bytes)?;
        Ok(index)
    }

    pub fn read_raw_flat_object(&mut self) -> Result<FlatBinderObject, Error> {
        self.assert_next_object()?;
        let pos = self.cursor.position() as usize;
        let size = self.io.flat_object_size();
        let data = self.cursor.get_ref();
        if pos + size > data.len() {
            return Err(Error::DeserializationError);
        }
        let obj = self.io.read_flat_object(&data[pos..pos + size]).ok_or(Error::DeserializationError)?;
        self.cursor.set_position((pos + size) as u64);
        self.next_object_index += 1;
        Ok(obj)
    }

    pub fn read_object(&mut self) -> Result<RawObject, Error> {
        let flat = self.read_raw_flat_object()?;
        Ok(match flat.kind {
            BinderType::Binder => RawObject::Binder {
                pointer: flat.handle_or_binder,
                cookie: flat.cookie,
                flags: flat.flags,
            },
            BinderType::WeakBinder => RawObject::WeakBinder {
                pointer: flat.handle_or_binder,
                cookie: flat.cookie,
                flags: flat.flags,
            },
            BinderType::Handle => RawObject::Handle { handle: flat.handle_value(), flags: flat.flags },
            BinderType::WeakHandle => RawObject::WeakHandle { handle: flat.handle_value(), flags: flat.flags },
            BinderType::Fd => RawObject::Fd(flat.handle_or_binder as RawFd),
            BinderType::Fda | BinderType::Ptr => return Err(Error::DeserializationError),
        })
    }

    pub fn write_local_object(&mut self, pointer: u64, cookie: u64, flags: u32) -> Result<usize, Error> {
        self.write_raw_flat_object(FlatBinderObject::local(pointer, cookie, flags))
    }

    pub fn write_remote_object(&mut self, handle: u32, flags: u32) -> Result<usize, Error> {
        self.write_raw_flat_object(FlatBinderObject::handle(handle, flags))
    }

    pub fn write_file_descriptor(&mut self, fd: RawFd, take_ownership: bool) -> Result<usize, Error> {
        self.write_raw_flat_object(FlatBinderObject::fd(fd, take_ownership))
    }

    pub fn read_file_descriptor(&mut self) -> Result<RawFd, Error> {
        match self.read_object()? {
            RawObject::Fd(fd) => Ok(fd),
            _ => Err(Error::DeserializationError),
        }
    }

    // -- auxiliary buffer region (HIDL strings/vectors) ------------------

    /// Append `data` to the auxiliary region as a `BINDER_TYPE_PTR` object,
    /// optionally anchored to an earlier object (nested sub-buffers).
    pub fn fixed_buffer(&mut self, parent: Option<(usize, u64)>, data: &[u8]) -> Result<usize, Error> {
        let index = self.push_object_offset();
        let mut bytes = Vec::with_capacity(self.io.buffer_object_size());
        let buffer_object = BufferObject {
            length: data.len() as u64,
            parent: parent.map(|(i, o)| (i as u32, o)),
        };
        self.io.write_buffer_object(&mut bytes, &buffer_object);
        self.cursor.write_all(&bytes)?;

        self.aux.extend_from_slice(data);
        let word = self.io.word_size();
        let pad = (word - (data.len() % word)) % word;
        self.aux.resize(self.aux.len() + pad, 0);
        Ok(index)
    }

    pub fn read_fixed_buffer(&mut self) -> Result<Vec<u8>, Error> {
        self.assert_next_object()?;
        let pos = self.cursor.position() as usize;
        let size = self.io.buffer_object_size();
        let data = self.cursor.get_ref();
        if pos + size > data.len() {
            return Err(Error::DeserializationError);
        }
        let obj = self.io.read_buffer_object(&data[pos..pos + size]).ok_or(Error::DeserializationError)?;
        self.cursor.set_position((pos + size) as u64);
        self.next_object_index += 1;

        let len = obj.length as usize;
        if self.aux_read_pos + len > self.aux.len() {
            return Err(Error::DeserializationError);
        }
        let bytes = self.aux[self.aux_read_pos..self.aux_read_pos + len].to_vec();
        let word = self.io.word_size();
        let pad = (word - (len % word)) % word;
        self.aux_read_pos += len + pad;
        Ok(bytes)
    }

    fn hidl_string_struct_size(&self) -> usize {
        self.io.word_size() * 3 // buffer ptr, length, owns_buffer (word-aligned)
    }

    /// Writes the inline `hidl_string` descriptor (a placeholder pointer,
    /// the length, and `owns_buffer`) and registers the backing bytes as a
    /// `BINDER_TYPE_PTR` auxiliary buffer.
    pub fn write_hidl_string(&mut self, s: &str) -> Result<(), Error> {
        self.write_usize(0)?; // buffer pointer, filled in by the kernel
        self.write_usize(s.len())?;
        self.write_usize(0)?; // owns_buffer
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.fixed_buffer(None, &bytes)?;
        Ok(())
    }

    pub fn read_hidl_string(&mut self) -> Result<String, Error> {
        self.read_usize()?; // buffer pointer
        let len = self.read_usize()?;
        self.read_usize()?; // owns_buffer
        let bytes = self.read_fixed_buffer()?;
        if bytes.len() < len {
            return Err(Error::DeserializationError);
        }
        Ok(String::from_utf8(bytes[..len].to_vec())?)
    }

    /// Writes a `hidl_vec<hidl_string>`: the vector's own backing storage
    /// is one auxiliary buffer, each element's bytes another, anchored to
    /// the vector buffer at its element offset.
    pub fn write_hidl_vec_strings<S: AsRef<str>>(&mut self, items: &[S]) -> Result<(), Error> {
        let elem = self.hidl_string_struct_size();
        self.write_usize(0)?; // vector data pointer
        self.write_usize(items.len())?;
        self.write_usize(0)?; // owns_buffer
        let vector_bytes = vec![0u8; items.len() * elem];
        let vector_index = self.fixed_buffer(None, &vector_bytes)?;
        for (i, item) in items.iter().enumerate() {
            let mut bytes = item.as_ref().as_bytes().to_vec();
            bytes.push(0);
            self.fixed_buffer(Some((vector_index, (i * elem) as u64)), &bytes)?;
        }
        Ok(())
    }

    pub fn read_hidl_vec_strings(&mut self) -> Result<Vec<String>, Error> {
        self.read_usize()?;
        let count = self.read_usize()?;
        self.read_usize()?;
        self.read_fixed_buffer()?; // vector backing bytes, not independently used
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let bytes = self.read_fixed_buffer()?;
            let nul = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            out.push(String::from_utf8(bytes[..nul].to_vec())?);
        }
        Ok(out)
    }

    /// Read an arbitrary `#[repr(C)]` value by raw byte copy. Reserved for
    /// the fixed-layout transaction-data header; application fields always
    /// go through the typed accessors above.
    pub(crate) fn read_pod<T: Copy>(&mut self) -> Result<T, Error> {
        let size = size_of::<T>();
        let mut data = vec![0u8; size];
        self.cursor.read_exact(&mut data)?;
        Ok(unsafe { std::ptr::read_unaligned(data.as_ptr() as *const T) })
    }

    pub(crate) fn write_pod<T: Copy>(&mut self, value: &T) -> Result<(), Error> {
        let size = size_of::<T>();
        let bytes = unsafe { slice::from_raw_parts(value as *const T as *const u8, size) };
        self.cursor.write_all(bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_round_trip() {
        // S6: write int32(42) then int64(42); payload is the literal bytes
        // from spec.md's test table.
        let mut p = Parcel::empty();
        p.write_i32(42).unwrap();
        p.write_i64(42).unwrap();
        assert_eq!(
            p.to_slice(),
            &[0x2A, 0x00, 0x00, 0x00, 0x2A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );

        p.set_position(0);
        assert_eq!(p.read_i32().unwrap(), 42);
        assert_eq!(p.read_i64().unwrap(), 42);
    }

    #[test]
    fn str16_round_trip() {
        let mut p = Parcel::empty();
        p.write_str16("x").unwrap();
        assert_eq!(p.to_slice(), &[0x01, 0x00, 0x00, 0x00, 0x78, 0x00, 0x00, 0x00]);
        p.set_position(0);
        assert_eq!(p.read_str16().unwrap(), "x");
    }

    #[test]
    fn hidl_vec_strings_round_trip() {
        let mut p = Parcel::empty();
        let items = vec!["x".to_string(), "android.hidl.base@1.0::IBase".to_string()];
        p.write_hidl_vec_strings(&items).unwrap();
        // one vector buffer + one buffer per element
        assert_eq!(p.offsets_len(), 3);

        p.set_position(0);
        let read_back = p.read_hidl_vec_strings().unwrap();
        assert_eq!(read_back, items);
    }

    #[test]
    fn hidl_string_round_trip() {
        let mut p = Parcel::empty();
        p.write_hidl_string("android.hidl.base@1.0::IBase").unwrap();
        p.set_position(0);
        assert_eq!(p.read_hidl_string().unwrap(), "android.hidl.base@1.0::IBase");
    }

    #[test]
    fn object_offset_mismatch_detected() {
        let mut p = Parcel::empty();
        p.write_i32(0).unwrap();
        p.write_local_object(0x1000, 0, 0).unwrap();
        p.set_position(0);
        assert!(p.read_raw_flat_object().is_err());
    }
}
