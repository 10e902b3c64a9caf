#[macro_use]
extern crate log;

mod error;
pub use error::Error;

mod io;
pub use io::{native_io, BcCommand, BinderType, BrCode, FlatBinderObject, Io, Io32, Io64};

mod protocol;
pub use protocol::{Aidl, BuiltinCodes, Hidl, RpcProtocol};

mod parcel;
pub use parcel::Parcel;

mod parcelable;
pub use parcelable::{Parcelable, String16};

mod config;

mod driver;
pub use driver::{BrEvent, Driver};

mod buffer;
pub use buffer::Buffer;

mod object;
pub use object::{LocalObject, RemoteObject};

mod registry;
pub use registry::ObjectRegistry;

mod dispatch;

mod transaction;
pub use transaction::{CallHandle, Ipc};

mod client;
pub use client::{Client, InterfaceRange};
