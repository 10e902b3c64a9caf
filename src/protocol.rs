//! RPC-header dialect. AIDL (framework services over `/dev/binder`) and
//! HIDL (hardware services over `/dev/hwbinder`) disagree on how a
//! transaction's payload identifies the interface it targets.

use crate::{Error, Parcel};

/// Transaction codes every `Protocol` must answer inline, without
/// dispatching to the hosted object's handler (spec.md "Interface
/// built-ins").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinCodes {
    pub ping: u32,
    pub interface: u32,
    pub dump: u32,
    pub sysprops: u32,
    /// HIDL-only; AIDL has no descriptor-chain transaction.
    pub descriptor_chain: Option<u32>,
}

pub trait RpcProtocol: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn builtin_codes(&self) -> BuiltinCodes;

    /// Prepend the interface-identifying header to `parcel`.
    fn write_rpc_header(&self, parcel: &mut Parcel, iface: &str) -> Result<(), Error>;

    /// Consume the header written by `write_rpc_header` and return the
    /// interface name it named.
    fn read_rpc_header(&self, parcel: &mut Parcel) -> Result<String, Error>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Aidl;

impl RpcProtocol for Aidl {
    fn name(&self) -> &'static str { "aidl" }

    fn builtin_codes(&self) -> BuiltinCodes {
        BuiltinCodes {
            ping: pack_chars(b'_', b'P', b'N', b'G'),
            interface: pack_chars(b'_', b'N', b'T', b'F'),
            dump: pack_chars(b'_', b'D', b'M', b'P'),
            sysprops: pack_chars(b'_', b'S', b'P', b'R'),
            descriptor_chain: None,
        }
    }

    /// `int32 strict_mode_policy(=0) + string16 interface`.
    fn write_rpc_header(&self, parcel: &mut Parcel, iface: &str) -> Result<(), Error> {
        parcel.write_i32(0)?;
        parcel.write_str16(iface)?;
        Ok(())
    }

    fn read_rpc_header(&self, parcel: &mut Parcel) -> Result<String, Error> {
        parcel.read_i32()?;
        parcel.read_str16()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Hidl;

impl RpcProtocol for Hidl {
    fn name(&self) -> &'static str { "hidl" }

    fn builtin_codes(&self) -> BuiltinCodes {
        BuiltinCodes {
            // Literal hwbinder PING_TRANSACTION code.
            ping: 0x00c0_317e,
            interface: pack_chars(b'_', b'N', b'T', b'F'),
            dump: pack_chars(b'_', b'D', b'M', b'P'),
            sysprops: pack_chars(b'_', b'S', b'Y', b'S'),
            descriptor_chain: Some(pack_chars(b'_', b'C', b'H', b'N')),
        }
    }

    fn write_rpc_header(&self, parcel: &mut Parcel, iface: &str) -> Result<(), Error> {
        parcel.write(iface.as_bytes())?;
        parcel.write_u8(0)?;
        parcel.pad_to_4()?;
        Ok(())
    }

    fn read_rpc_header(&self, parcel: &mut Parcel) -> Result<String, Error> {
        parcel.read_nul_terminated_str()
    }
}

const fn pack_chars(c1: u8, c2: u8, c3: u8, c4: u8) -> u32 {
    ((c1 as u32) << 24) | ((c2 as u32) << 16) | ((c3 as u32) << 8) | (c4 as u32)
}
