//! Routing an incoming transaction to a `LocalObject`: decide whether the
//! code is a built-in answered inline on the looper thread, a real call
//! handed to the worker pool, or unsupported.

use crate::{object::LocalObject, protocol::RpcProtocol, Error, Parcel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    NotSupported,
    Supported,
    /// Answered inline on the looper thread - the reply is static and
    /// cheap enough that dispatching to a worker would only add latency.
    Looper,
}

pub fn can_handle(object: &LocalObject, protocol: &dyn RpcProtocol, interface: &str, code: u32) -> Disposition {
    let builtins = protocol.builtin_codes();
    if code == builtins.ping
        || code == builtins.interface
        || code == builtins.dump
        || code == builtins.sysprops
        || Some(code) == builtins.descriptor_chain
    {
        return Disposition::Looper;
    }
    if object.supports(interface) {
        Disposition::Supported
    } else {
        Disposition::NotSupported
    }
}

/// Render the reply to a built-in transaction. Never invokes the object's
/// user handler.
pub fn builtin_reply(object: &LocalObject, protocol: &dyn RpcProtocol, code: u32) -> Result<Parcel, Error> {
    let builtins = protocol.builtin_codes();
    let mut reply = Parcel::empty();

    if code == builtins.ping {
        reply.write_i32(0)?; // status = 0 (S1)
    } else if code == builtins.interface {
        reply.write_str16(object.interfaces.first().map(String::as_str).unwrap_or(""))?; // S2, no status prefix
    } else if code == builtins.dump || code == builtins.sysprops {
        // Neither built-in has a literal test scenario in the spec; a
        // status-only reply is the best-effort placeholder (see DESIGN.md).
        reply.write_i32(0)?;
    } else if Some(code) == builtins.descriptor_chain {
        reply.write_hidl_vec_strings(&object.interfaces)?; // S3
    }

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Hidl;

    fn object() -> std::sync::Arc<LocalObject> {
        LocalObject::new(vec!["x".into()], Box::new(|_, _| (None, 0)))
    }

    #[test]
    fn ping_is_handled_by_looper() {
        let obj = object();
        assert_eq!(can_handle(&obj, &Hidl, "x", Hidl.builtin_codes().ping), Disposition::Looper);
    }

    #[test]
    fn ping_reply_is_status_zero() {
        let obj = object();
        let mut reply = builtin_reply(&obj, &Hidl, Hidl.builtin_codes().ping).unwrap();
        assert_eq!(reply.to_slice(), &[0, 0, 0, 0]);
        reply.set_position(0);
        assert_eq!(reply.read_i32().unwrap(), 0);
    }

    #[test]
    fn interface_reply_matches_s2() {
        let obj = object();
        let reply = builtin_reply(&obj, &Hidl, Hidl.builtin_codes().interface).unwrap();
        assert_eq!(reply.to_slice(), &[0x01, 0x00, 0x00, 0x00, 0x78, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn descriptor_chain_reply_matches_s3() {
        let obj = LocalObject::new(
            vec!["x".into(), "android.hidl.base@1.0::IBase".into()],
            Box::new(|_, _| (None, 0)),
        );
        let mut reply = builtin_reply(&obj, &Hidl, Hidl.builtin_codes().descriptor_chain.unwrap()).unwrap();
        reply.set_position(0);
        let strings = reply.read_hidl_vec_strings().unwrap();
        assert_eq!(strings, vec!["x".to_string(), "android.hidl.base@1.0::IBase".to_string()]);
    }

    #[test]
    fn unsupported_interface_rejected() {
        let obj = object();
        assert_eq!(can_handle(&obj, &Hidl, "y", 12345), Disposition::NotSupported);
    }
}
