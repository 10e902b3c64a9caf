//! Lifetime of memory the kernel handed back in a `BR_TRANSACTION`/
//! `BR_REPLY`: refcounted so a nested sub-buffer (e.g. `hidl_vec`'s backing
//! storage) can share its parent's ownership instead of allocating its own,
//! freed via `BC_FREE_BUFFER` exactly once the last reference drops.
//! Grounded on `gbinder_buffer.c`'s `GBinderBufferContents`.

use std::sync::Arc;

use nix::unistd::close;

use crate::{driver::Driver, io::BinderType, Error, Parcel};

struct BufferContents {
    driver: Arc<Driver>,
    data_ptr: u64,
}

impl Drop for BufferContents {
    fn drop(&mut self) {
        if let Err(err) = self.driver.free_buffer(self.data_ptr) {
            warn!("free_buffer({:#x}) failed: {}", self.data_ptr, err);
        }
    }
}

/// A buffer received from the driver: the parsed [`Parcel`] view over its
/// bytes, plus the refcounted kernel-side backing memory. Still-owned file
/// descriptors found in the object table are closed on drop, mirroring
/// `gbinder_driver_close_fds`.
pub struct Buffer {
    contents: Arc<BufferContents>,
    parcel: Parcel,
}

impl Buffer {
    pub(crate) fn new(driver: Arc<Driver>, data_ptr: u64, parcel: Parcel) -> Self {
        Self { contents: Arc::new(BufferContents { driver, data_ptr }), parcel }
    }

    /// A sub-buffer sharing its parent's backing memory (nested HIDL
    /// buffers) - freeing is driven by whichever of the two drops last.
    pub fn new_with_parent(parent: &Buffer, parcel: Parcel) -> Self {
        Self { contents: parent.contents.clone(), parcel }
    }

    pub fn parcel(&self) -> &Parcel { &self.parcel }
    pub fn parcel_mut(&mut self) -> &mut Parcel { &mut self.parcel }

    /// Takes ownership of the parsed parcel without running `Buffer`'s own
    /// `Drop` (which would close any fds still in the object table) - the
    /// caller now owns those fds via the returned `Parcel`.
    pub fn into_parcel(self) -> Parcel {
        let mut this = std::mem::ManuallyDrop::new(self);
        let parcel = unsafe { std::ptr::read(&this.parcel) };
        unsafe { std::ptr::drop_in_place(&mut this.contents) };
        parcel
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let io = self.parcel.io();
        let size = io.flat_object_size();
        let data = self.parcel.to_slice();
        for &offset in self.parcel.offsets() {
            if offset + size > data.len() {
                continue;
            }
            if let Some(obj) = io.read_flat_object(&data[offset..offset + size]) {
                if obj.kind == BinderType::Fd {
                    let fd = obj.handle_or_binder as i32;
                    if let Err(err) = close(fd) {
                        warn!("failed to close received fd {}: {}", fd, err);
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer").field("parcel", &self.parcel).finish()
    }
}

pub(crate) fn validate_consumed(parcel: &Parcel) -> Result<(), Error> {
    if parcel.has_unread_data() {
        return Err(Error::DeserializationError);
    }
    Ok(())
}
