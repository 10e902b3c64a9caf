//! Calls `myservice`'s echo method. Looking a service up by name is a
//! servicemanager concern this crate keeps external (spec.md Non-goals),
//! so the handle is passed on the command line - whatever wire protocol
//! the caller used to resolve "myservice" to a handle, this only needs the
//! number it landed on.

use binder_rust::{Client, InterfaceRange, Ipc};

fn main() {
    env_logger::init();

    let handle: u32 = std::env::args().nth(1).expect("usage: simple <handle>").parse().expect("handle must be a u32");

    let ipc = Ipc::get_or_open("/dev/binder").expect("open /dev/binder");
    let remote = ipc.get_remote(handle).expect("get_remote");
    let client = Client::new(
        ipc,
        remote,
        vec![InterfaceRange { interface: "com.example.IMyService".to_string(), last_code: 2 }],
    )
    .expect("build client");

    let mut request = client.new_request().expect("new_request");
    request.write_str16("Hello World").expect("write");
    let mut reply = client.transact_sync_reply(1, &request).expect("transact");
    println!("echo reply: {:?}", reply.read_str16());
}
