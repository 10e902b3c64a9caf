//! A simple echo service. Requires root (or CAP_SYS_ADMIN-ish access to
//! `/dev/binder`) to run. Registering with a real servicemanager is out of
//! scope here (spec.md keeps that wire protocol external); this just hosts
//! the object and prints its address/cookie so a peer that already knows
//! how to hand out the handle (or `simple`, run against the same driver in
//! the same process for a loopback demo) can reach it.

use std::sync::Arc;

use binder_rust::{Ipc, LocalObject, Parcel};

const ECHO: u32 = 1;
const GET_FILE: u32 = 2;

fn main() {
    env_logger::init();

    let ipc = Ipc::get_or_open("/dev/binder").expect("open /dev/binder");

    let object = LocalObject::new(
        vec!["com.example.IMyService".to_string()],
        Box::new(|code, data| match code {
            ECHO => {
                let text = data.read_str16().unwrap_or_default();
                println!("echo: {}", text);
                let mut reply = Parcel::empty();
                let _ = reply.write_str16(&text);
                (Some(reply), 0)
            }
            GET_FILE => {
                let path = data.read_str16().unwrap_or_default();
                match std::fs::File::create(&path) {
                    Ok(file) => {
                        use std::os::unix::io::IntoRawFd;
                        let mut reply = Parcel::empty();
                        let _ = reply.write_file_descriptor(file.into_raw_fd(), true);
                        (Some(reply), 0)
                    }
                    Err(err) => {
                        eprintln!("open {} failed: {}", path, err);
                        (None, binder_rust::Error::EINVAL)
                    }
                }
            }
            other => {
                eprintln!("unknown command {}", other);
                (None, binder_rust::Error::EINVAL)
            }
        }),
    );

    ipc.register_local(object.clone());
    println!("myservice listening, cookie {:#x}", Arc::as_ptr(&object) as u64);

    loop {
        std::thread::park();
    }
}
