//! Keeps exactly one Rust wrapper alive per kernel handle/pointer so two
//! lookups of the same remote object return pointer-equal `Arc`s (spec.md
//! S5) and so local-object dispatch can find a `LocalObject` from the
//! cookie the kernel hands back on transactions addressed to it.
//! Grounded on `gbinder_object_registry.h`'s vtable shape.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use crate::{
    driver::Driver,
    object::{LocalObject, RemoteObject},
    Error,
};

pub struct ObjectRegistry {
    driver: Arc<Driver>,
    // A single lock guarding the whole map serializes concurrent creation,
    // so "get_remote called twice concurrently" really does only ever
    // issue one BC_ACQUIRE (spec.md S5).
    remote: Mutex<HashMap<u32, Weak<RemoteObject>>>,
    local: Mutex<HashMap<u64, Weak<LocalObject>>>,
}

impl ObjectRegistry {
    pub fn new(driver: Arc<Driver>) -> Self {
        Self { driver, remote: Mutex::new(HashMap::new()), local: Mutex::new(HashMap::new()) }
    }

    /// Look up (or create, acquiring a fresh kernel reference) the
    /// `RemoteObject` wrapping `handle`.
    pub fn get_remote(&self, handle: u32) -> Result<Arc<RemoteObject>, Error> {
        let mut map = self.remote.lock().unwrap();
        if let Some(existing) = map.get(&handle).and_then(Weak::upgrade) {
            trace!("get_remote({}): reusing existing wrapper", handle);
            return Ok(existing);
        }
        self.driver.increfs(handle)?;
        self.driver.acquire(handle)?;
        let object = RemoteObject::new(self.driver.clone(), handle);
        map.insert(handle, Arc::downgrade(&object));
        trace!("get_remote({}): created new wrapper", handle);
        Ok(object)
    }

    pub fn forget_remote(&self, handle: u32) {
        self.remote.lock().unwrap().remove(&handle);
    }

    /// Finds the live `RemoteObject` whose death-notification cookie (its
    /// own `Arc` address) matches `cookie`. Used to resolve
    /// `BR_DEAD_BINDER`, which carries only the cookie, back to the
    /// wrapper that should be marked dead.
    pub fn find_by_death_cookie(&self, cookie: u64) -> Option<Arc<RemoteObject>> {
        self.remote
            .lock()
            .unwrap()
            .values()
            .filter_map(Weak::upgrade)
            .find(|remote| remote.cookie() == cookie)
    }

    pub fn register_local(&self, object: &Arc<LocalObject>) {
        self.local.lock().unwrap().insert(object.cookie(), Arc::downgrade(object));
    }

    pub fn get_local(&self, cookie: u64) -> Option<Arc<LocalObject>> {
        self.local.lock().unwrap().get(&cookie).and_then(Weak::upgrade)
    }

    pub fn forget_local(&self, cookie: u64) {
        self.local.lock().unwrap().remove(&cookie);
    }
}

impl std::fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("remote_count", &self.remote.lock().unwrap().len())
            .field("local_count", &self.local.lock().unwrap().len())
            .finish()
    }
}
