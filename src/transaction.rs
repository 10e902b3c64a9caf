//! The transaction engine (`Ipc`): one open device per process, a looper
//! thread draining driver events, a worker pool dispatching incoming
//! calls, and the sync/async entry points callers actually use. Each
//! caller thread performs its own ad-hoc `BINDER_WRITE_READ` loop for a
//! synchronous call, exactly like every other binder thread in the
//! process - there is no separate "client" thread role.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex, Weak,
    },
    thread,
};

use crate::{
    buffer::Buffer,
    dispatch::{self, Disposition},
    driver::{BrEvent, Driver},
    io::BcCommand,
    object::{LocalObject, RemoteObject},
    registry::ObjectRegistry,
    Error, Parcel,
};

const FLAG_ONE_WAY: u32 = 0x01;
const WORKER_POOL_SIZE: usize = 4;

type Job = Box<dyn FnOnce() + Send>;

struct WorkerPool {
    sender: mpsc::Sender<Job>,
}

impl WorkerPool {
    fn new(size: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        for _ in 0..size {
            let receiver = receiver.clone();
            thread::spawn(move || loop {
                let job = { receiver.lock().unwrap().recv() };
                match job {
                    Ok(job) => job(),
                    Err(_) => break,
                }
            });
        }
        Self { sender }
    }

    fn submit(&self, job: Job) {
        let _ = self.sender.send(job);
    }
}

static OPEN_DEVICES: Mutex<Option<HashMap<String, Weak<Ipc>>>> = Mutex::new(None);

/// The open connection to one device node: driver, object registry, looper
/// and worker pool. One instance per device path per process - see
/// `get_or_open`.
pub struct Ipc {
    driver: Arc<Driver>,
    registry: Arc<ObjectRegistry>,
    workers: WorkerPool,
    looper_shutdown: Arc<AtomicBool>,
}

/// A handle to an in-flight async call; dropping or calling `cancel`
/// suppresses the reply callback. Mirrors `gbinder_client_cancel`, which
/// likewise only detaches the callback - the transaction already in
/// flight still completes at the kernel/peer.
pub struct CallHandle {
    cancelled: Arc<AtomicBool>,
}

impl CallHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl Ipc {
    /// Returns the shared `Ipc` for `device_path`, opening it if this is
    /// the first caller (or the previous one has been dropped).
    pub fn get_or_open(device_path: &str) -> Result<Arc<Self>, Error> {
        let mut table = OPEN_DEVICES.lock().unwrap();
        let table = table.get_or_insert_with(HashMap::new);
        if let Some(existing) = table.get(device_path).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        let driver = Driver::open(device_path)?;
        driver.enter_looper()?;
        let ipc = Arc::new(Self {
            registry: Arc::new(ObjectRegistry::new(driver.clone())),
            driver,
            workers: WorkerPool::new(WORKER_POOL_SIZE),
            looper_shutdown: Arc::new(AtomicBool::new(false)),
        });
        ipc.clone().spawn_looper();
        table.insert(device_path.to_string(), Arc::downgrade(&ipc));
        Ok(ipc)
    }

    pub fn driver(&self) -> &Arc<Driver> { &self.driver }
    pub fn registry(&self) -> &Arc<ObjectRegistry> { &self.registry }

    fn spawn_looper(self: Arc<Self>) {
        thread::spawn(move || {
            while !self.looper_shutdown.load(Ordering::SeqCst) {
                match self.driver.poll() {
                    Ok(events) => {
                        if let Err(err) = self.handle_looper_events(events) {
                            warn!("looper: {}", err);
                        }
                    }
                    Err(err) => {
                        error!("looper read failed: {}", err);
                        break;
                    }
                }
            }
        });
    }

    fn handle_looper_events(&self, events: Vec<BrEvent>) -> Result<(), Error> {
        for event in events {
            self.handle_event(event)?;
        }
        Ok(())
    }

    pub fn get_remote(&self, handle: u32) -> Result<Arc<RemoteObject>, Error> {
        self.registry.get_remote(handle)
    }

    pub fn register_local(&self, object: Arc<LocalObject>) {
        self.registry.register_local(&object);
    }

    pub fn transact_sync_reply(&self, remote: &Arc<RemoteObject>, code: u32, req: &Parcel) -> Result<Parcel, Error> {
        if remote.is_dead() {
            debug!("transact_sync_reply({}, {:#x}): dead object, short-circuiting", remote.handle(), code);
            return Err(Error::Status(Error::ESTALE));
        }
        let events = self.driver.transact(BcCommand::Transaction, remote.handle() as u64, code, 0, req)?;
        self.drain_until_reply(events)
    }

    pub fn transact_sync_oneway(&self, remote: &Arc<RemoteObject>, code: u32, req: &Parcel) -> Result<(), Error> {
        if remote.is_dead() {
            return Err(Error::Status(Error::ESTALE));
        }
        let events = self.driver.transact(BcCommand::Transaction, remote.handle() as u64, code, FLAG_ONE_WAY, req)?;
        for event in events {
            if let BrEvent::TransactionComplete = event {
                return Ok(());
            }
            self.handle_event(event)?;
        }
        Ok(())
    }

    /// Issue a call on a worker thread, invoking `on_reply` once it
    /// completes unless the returned handle is cancelled first.
    pub fn transact(
        self: &Arc<Self>,
        remote: Arc<RemoteObject>,
        code: u32,
        req: Parcel,
        on_reply: impl FnOnce(Result<Parcel, Error>) + Send + 'static,
    ) -> CallHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = CallHandle { cancelled: cancelled.clone() };
        let ipc = self.clone();
        self.workers.submit(Box::new(move || {
            let result = ipc.transact_sync_reply(&remote, code, &req);
            if !cancelled.load(Ordering::SeqCst) {
                on_reply(result);
            }
        }));
        handle
    }

    fn drain_until_reply(&self, mut events: Vec<BrEvent>) -> Result<Parcel, Error> {
        loop {
            for event in events.drain(..) {
                match event {
                    BrEvent::Reply { data, .. } => return Ok(data.into_parcel()),
                    BrEvent::DeadReply => return Err(Error::Status(Error::ESTALE)),
                    BrEvent::FailedReply => return Err(Error::Status(Error::EINVAL)),
                    BrEvent::Error(code) => return Err(Error::Status(code)),
                    other => self.handle_event(other)?,
                }
            }
            events = self.driver.poll()?;
        }
    }

    fn handle_event(&self, event: BrEvent) -> Result<(), Error> {
        match event {
            BrEvent::TransactionComplete | BrEvent::Noop | BrEvent::SpawnLooper | BrEvent::Finished => {}
            BrEvent::AcquireResult(_) => {}
            BrEvent::IncRefs { cookie } => {
                if let Some(object) = self.registry.get_local(cookie) {
                    object.note_weak_ref();
                }
                self.driver.increfs_done(cookie)?;
            }
            BrEvent::Acquire { cookie } => {
                if let Some(object) = self.registry.get_local(cookie) {
                    object.note_strong_ref();
                }
                self.driver.acquire_done(cookie)?;
            }
            BrEvent::Release { cookie } => {
                if let Some(object) = self.registry.get_local(cookie) {
                    object.note_strong_unref();
                }
            }
            BrEvent::DecRefs { cookie } => {
                let remaining = self.registry.get_local(cookie).map(|object| object.note_weak_unref());
                if remaining == Some(0) {
                    self.registry.forget_local(cookie);
                }
            }
            BrEvent::AttemptAcquire { .. } => {}
            BrEvent::DeadBinder { cookie } => {
                if let Some(remote) = self.find_remote_by_cookie(cookie) {
                    remote.mark_dead();
                }
                self.driver.dead_binder_done(cookie)?;
            }
            BrEvent::ClearDeathNotificationDone { .. } => {}
            BrEvent::Transaction { target_cookie, code, data, .. } => {
                self.dispatch_incoming(target_cookie, code, data);
            }
            BrEvent::Reply { .. } | BrEvent::DeadReply | BrEvent::FailedReply | BrEvent::Error(_) => {
                warn!("unexpected reply-shaped event on the looper thread");
            }
        }
        Ok(())
    }

    fn find_remote_by_cookie(&self, cookie: u64) -> Option<Arc<RemoteObject>> {
        self.registry.find_by_death_cookie(cookie)
    }

    fn dispatch_incoming(&self, cookie: u64, code: u32, mut data: Buffer) {
        let object = match self.registry.get_local(cookie) {
            Some(object) => object,
            None => {
                warn!("transaction for unknown local object cookie {:#x}", cookie);
                return;
            }
        };
        let protocol = self.driver.protocol();
        let iface = match protocol.read_rpc_header(data.parcel_mut()) {
            Ok(iface) => iface,
            Err(err) => {
                warn!("failed to read rpc header: {}", err);
                return;
            }
        };

        match dispatch::can_handle(&object, protocol, &iface, code) {
            Disposition::Looper => match dispatch::builtin_reply(&object, protocol, code) {
                Ok(reply) => self.reply(&reply),
                Err(err) => warn!("builtin reply failed: {}", err),
            },
            Disposition::Supported => {
                let driver = self.driver.clone();
                self.workers.submit(Box::new(move || {
                    // `data` (and any fds its object table still holds)
                    // stays alive until the handler returns.
                    let (reply, status) = object.dispatch(code, data.parcel_mut());
                    if let Err(err) = crate::buffer::validate_consumed(data.parcel()) {
                        trace!("handler for code {:#x} left request data unread: {}", code, err);
                    }
                    let reply = reply.unwrap_or_else(|| {
                        let mut p = Parcel::empty();
                        let _ = p.write_i32(status);
                        p
                    });
                    if let Err(err) = driver.transact(BcCommand::Reply, 0, 0, 0, &reply) {
                        warn!("reply failed: {}", err);
                    }
                }));
            }
            Disposition::NotSupported => {
                let mut reply = Parcel::empty();
                let _ = reply.write_i32(Error::EINVAL);
                self.reply(&reply);
            }
        }
    }

    fn reply(&self, data: &Parcel) {
        if let Err(err) = self.driver.transact(BcCommand::Reply, 0, 0, 0, data) {
            warn!("reply failed: {}", err);
        }
    }
}

impl std::fmt::Debug for Ipc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ipc").field("driver", &self.driver).finish()
    }
}

impl Drop for Ipc {
    fn drop(&mut self) {
        self.looper_shutdown.store(true, Ordering::SeqCst);
    }
}
