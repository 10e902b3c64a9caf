//! The two object kinds a transaction can name: a [`LocalObject`] this
//! process hosts, and a [`RemoteObject`] it holds a handle to. Both track
//! the kernel's view of their refcount independently of Rust's own
//! `Arc` count, since the driver's `BC_ACQUIRE`/`BC_RELEASE` protocol is a
//! second, asynchronous refcount layered on top.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex,
};

use crate::{driver::Driver, Error, Parcel};

/// Invoked for every non-built-in transaction a `LocalObject` receives.
/// Returns the reply body and a status code; a non-zero status with no
/// reply is serialized as a transaction error to the caller.
pub type Handler = Box<dyn Fn(u32, &mut Parcel) -> (Option<Parcel>, i32) + Send + Sync>;

/// An object this process exposes to others. `cookie` is the value handed
/// back to the kernel on `BC_TRANSACTION`'s reply path and in death
/// notifications for remote peers holding a handle to it - we use the
/// object's own heap address, exactly as `gbinder_local_object` does.
pub struct LocalObject {
    pub interfaces: Vec<String>,
    handler: Handler,
    kernel_strong_refs: AtomicU32,
    kernel_weak_refs: AtomicU32,
}

impl LocalObject {
    pub fn new(interfaces: Vec<String>, handler: Handler) -> Arc<Self> {
        Arc::new(Self {
            interfaces,
            handler,
            kernel_strong_refs: AtomicU32::new(0),
            kernel_weak_refs: AtomicU32::new(0),
        })
    }

    pub fn cookie(self: &Arc<Self>) -> u64 {
        Arc::as_ptr(self) as *const () as u64
    }

    pub fn supports(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }

    pub fn dispatch(&self, code: u32, data: &mut Parcel) -> (Option<Parcel>, i32) {
        (self.handler)(code, data)
    }

    pub(crate) fn note_strong_ref(&self) -> u32 { self.kernel_strong_refs.fetch_add(1, Ordering::SeqCst) + 1 }
    pub(crate) fn note_strong_unref(&self) -> u32 { self.kernel_strong_refs.fetch_sub(1, Ordering::SeqCst) - 1 }
    pub(crate) fn note_weak_ref(&self) -> u32 { self.kernel_weak_refs.fetch_add(1, Ordering::SeqCst) + 1 }
    pub(crate) fn note_weak_unref(&self) -> u32 { self.kernel_weak_refs.fetch_sub(1, Ordering::SeqCst) - 1 }
}

impl std::fmt::Debug for LocalObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalObject").field("interfaces", &self.interfaces).finish()
    }
}

type DeathCallback = Box<dyn Fn() + Send + Sync>;

/// An object another process hosts, referenced here by kernel handle. The
/// `dead` flag is the short-circuit spec.md requires: once set, every
/// transaction attempt fails locally with `-ESTALE` without touching the
/// driver (see `gbinder_client_transact_sync_reply2`'s `obj->dead` check).
pub struct RemoteObject {
    driver: Arc<Driver>,
    handle: u32,
    dead: AtomicBool,
    death_recipients: Mutex<Vec<DeathCallback>>,
}

impl RemoteObject {
    pub(crate) fn new(driver: Arc<Driver>, handle: u32) -> Arc<Self> {
        Arc::new(Self { driver, handle, dead: AtomicBool::new(false), death_recipients: Mutex::new(Vec::new()) })
    }

    pub fn handle(&self) -> u32 { self.handle }
    pub fn is_dead(&self) -> bool { self.dead.load(Ordering::SeqCst) }

    pub(crate) fn mark_dead(&self) {
        if !self.dead.swap(true, Ordering::SeqCst) {
            for recipient in self.death_recipients.lock().unwrap().iter() {
                recipient();
            }
        }
    }

    /// Clears `dead`, re-subscribes death notification and re-acquires -
    /// the documented resolution for spec.md's reanimation Open Question.
    pub fn reanimate(self: &Arc<Self>) -> Result<(), Error> {
        self.dead.store(false, Ordering::SeqCst);
        self.driver.acquire(self.handle)?;
        self.driver.request_death_notification(self.handle, self.cookie())
    }

    pub fn cookie(self: &Arc<Self>) -> u64 {
        Arc::as_ptr(self) as *const () as u64
    }

    pub fn request_death_notification<F: Fn() + Send + Sync + 'static>(self: &Arc<Self>, on_death: F) -> Result<(), Error> {
        self.death_recipients.lock().unwrap().push(Box::new(on_death));
        self.driver.request_death_notification(self.handle, self.cookie())
    }

    pub fn clear_death_notification(self: &Arc<Self>) -> Result<(), Error> {
        self.death_recipients.lock().unwrap().clear();
        self.driver.clear_death_notification(self.handle, self.cookie())
    }
}

impl Drop for RemoteObject {
    fn drop(&mut self) {
        if let Err(err) = self.driver.decrefs(self.handle) {
            warn!("decrefs({}) failed during drop: {}", self.handle, err);
        }
    }
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject").field("handle", &self.handle).field("dead", &self.is_dead()).finish()
    }
}
