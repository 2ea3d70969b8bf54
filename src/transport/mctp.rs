//! AF_MCTP socket transport, tunneling JTAG commands to a remote
//! controller. Grounded on `lib/jtag_mctp.c`: same OEM message type, same
//! two commands, same 3-second receive timeout.
//!
//! No corpus example uses `AF_MCTP` directly; the raw socket plumbing
//! follows ordinary `libc` socket conventions (`socket`/`sendto`/
//! `recvfrom`/`poll`), matching how the reference itself is a thin
//! wrapper over those same syscalls.

use std::mem::size_of;

use crate::error::JtagError;
use crate::tap::TapState;
use crate::transport::{JtagConfig, JtagTransport, ShiftKind};

/// Not present in `libc` (MCTP is a recent addition to the Linux UAPI);
/// matches `AF_MCTP` in `linux/mctp.h`.
const AF_MCTP: libc::c_int = 45;
const MCTP_TAG_OWNER: u8 = 0x08;
const MCTP_MESSAGE_TYPE_OEM_JTAG: u8 = 0x5F;
const RECV_TIMEOUT_MS: i32 = 3000;

const CMD_JTAG_SET_STATE: u8 = 1;
const CMD_JTAG_TRANSFER: u8 = 2;

#[repr(C)]
#[derive(Clone, Copy)]
struct MctpAddr {
    s_addr: u8,
}

#[repr(C)]
struct SockaddrMctp {
    smctp_family: libc::sa_family_t,
    __smctp_pad0: u16,
    smctp_network: u32,
    smctp_addr: MctpAddr,
    smctp_type: u8,
    smctp_tag: u8,
    __smctp_pad1: u8,
}

#[repr(C)]
struct SockaddrMctpExt {
    base: SockaddrMctp,
    smctp_ifindex: i32,
    smctp_halen: u8,
    __smctp_pad2: [u8; 3],
    smctp_haddr: [u8; 16],
}

#[repr(C, packed)]
struct JtagTapState2 {
    reset: u8,
    from: u8,
    endstate: u8,
    tck: u32,
}

#[repr(C, packed)]
struct JtagXfer2 {
    kind: u8,
    direction: u8,
    from: u8,
    endstate: u8,
    padding: u32,
    length: u32,
}

fn mctp_addr(net: u32, eid: u8) -> Result<SockaddrMctpExt, JtagError> {
    if eid == 0 {
        return Err(JtagError::InvalidEid);
    }
    Ok(SockaddrMctpExt {
        base: SockaddrMctp {
            smctp_family: AF_MCTP as libc::sa_family_t,
            __smctp_pad0: 0,
            smctp_network: net,
            smctp_addr: MctpAddr { s_addr: eid },
            smctp_type: MCTP_MESSAGE_TYPE_OEM_JTAG,
            smctp_tag: MCTP_TAG_OWNER,
        },
        smctp_ifindex: 0,
        smctp_halen: 0,
        __smctp_pad2: [0; 3],
        smctp_haddr: [0; 16],
    })
}

fn poll_readable(fd: libc::c_int, timeout_ms: i32) -> Result<(), JtagError> {
    let mut fds = [libc::pollfd { fd, events: libc::POLLIN | libc::POLLERR, revents: 0 }];
    // SAFETY: fds is a single, stack-resident, correctly sized array.
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), 1, timeout_ms) };
    if rc < 0 {
        return Err(JtagError::Io(std::io::Error::last_os_error()));
    }
    if rc == 0 || fds[0].revents & libc::POLLERR != 0 {
        return Err(JtagError::Timeout);
    }
    Ok(())
}

fn mctp_send(fd: libc::c_int, net: u32, eid: u8, data: &[u8]) -> Result<(), JtagError> {
    let addr = mctp_addr(net, eid)?;
    // SAFETY: addr/data are valid for the call's duration; addrlen matches
    // the non-extended sockaddr_mctp, as in the reference.
    let rc = unsafe {
        libc::sendto(
            fd,
            data.as_ptr() as *const libc::c_void,
            data.len(),
            0,
            &addr as *const SockaddrMctpExt as *const libc::sockaddr,
            size_of::<SockaddrMctp>() as libc::socklen_t,
        )
    };
    if rc != data.len() as isize {
        return Err(JtagError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

fn mctp_recv(fd: libc::c_int, net: u32, eid: u8, buf: &mut [u8]) -> Result<usize, JtagError> {
    if eid == 0 {
        return Err(JtagError::InvalidEid);
    }
    let _ = net;
    poll_readable(fd, RECV_TIMEOUT_MS)?;
    let mut addr: SockaddrMctpExt = unsafe { std::mem::zeroed() };
    let mut addrlen = size_of::<SockaddrMctpExt>() as libc::socklen_t;
    // SAFETY: buf/addr are valid stack buffers sized as declared.
    let rc = unsafe {
        libc::recvfrom(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            libc::MSG_TRUNC,
            &mut addr as *mut SockaddrMctpExt as *mut libc::sockaddr,
            &mut addrlen,
        )
    };
    if rc < 0 {
        return Err(JtagError::Io(std::io::Error::last_os_error()));
    }
    Ok(rc as usize)
}

#[derive(Debug)]
pub struct McptTransport {
    fd: libc::c_int,
    config: JtagConfig,
}

impl McptTransport {
    pub fn open(config: JtagConfig) -> Result<Self, JtagError> {
        if config.eid == 0 {
            return Err(JtagError::InvalidEid);
        }
        tracing::debug!(eid = config.eid, net = config.net, "opening AF_MCTP socket");
        // SAFETY: plain socket() call with no pointer arguments.
        let fd = unsafe { libc::socket(AF_MCTP, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(JtagError::Io(std::io::Error::last_os_error()));
        }
        Ok(McptTransport { fd, config })
    }

    fn net(&self) -> u32 {
        self.config.net
    }

    fn eid(&self) -> u8 {
        self.config.eid
    }
}

impl Drop for McptTransport {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

impl JtagTransport for McptTransport {
    fn set_state(&mut self, end_state: TapState) -> Result<(), JtagError> {
        self.run_tck(end_state, 0)
    }

    fn run_tck(&mut self, end_state: TapState, tcks: u32) -> Result<(), JtagError> {
        if end_state != TapState::Current && !end_state.is_stable() {
            return Err(JtagError::UnstableEndState(end_state));
        }
        let body = JtagTapState2 { reset: 0, from: TapState::Current.to_wire(), endstate: end_state.to_wire(), tck: tcks };
        let mut req = vec![CMD_JTAG_SET_STATE];
        req.extend_from_slice(unsafe {
            std::slice::from_raw_parts(&body as *const _ as *const u8, size_of::<JtagTapState2>())
        });
        mctp_send(self.fd, self.net(), self.eid(), &req)?;
        let mut resp = vec![0u8; 1];
        mctp_recv(self.fd, self.net(), self.eid(), &mut resp)?;
        Ok(())
    }

    fn shift(
        &mut self,
        kind: ShiftKind,
        bits: usize,
        tdi: &[u8],
        tdo: Option<&mut [u8]>,
        end_state: TapState,
    ) -> Result<(), JtagError> {
        if !end_state.is_stable() {
            return Err(JtagError::UnstableEndState(end_state));
        }
        let data_bytes = (bits + 7) / 8;
        let header = JtagXfer2 {
            kind: if kind == ShiftKind::Ir { 0 } else { 1 },
            direction: 0,
            from: TapState::Current.to_wire(),
            endstate: end_state.to_wire(),
            padding: 0,
            length: bits as u32,
        };
        let mut req = vec![CMD_JTAG_TRANSFER];
        req.extend_from_slice(unsafe {
            std::slice::from_raw_parts(&header as *const _ as *const u8, size_of::<JtagXfer2>())
        });
        req.extend_from_slice(&tdi[..data_bytes]);

        mctp_send(self.fd, self.net(), self.eid(), &req)?;
        let mut resp = vec![0u8; 1 + data_bytes];
        mctp_recv(self.fd, self.net(), self.eid(), &mut resp)?;
        if let Some(out) = tdo {
            out[..data_bytes].copy_from_slice(&resp[1..1 + data_bytes]);
        }
        Ok(())
    }
}
