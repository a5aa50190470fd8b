// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The preloaded entry points: `extern "C" fn`s named after the wrapped
//! library's own symbols, so that `LD_PRELOAD`-ing this crate's `cdylib`
//! ahead of the real library intercepts every call transparently (spec
//! §4.4).
//!
//! The stub's socket is attached lazily, on the first intercepted call —
//! not at load time — because the session hand-off (`usbnet-handoff`)
//! region is only guaranteed to exist once the parent process has
//! published it, which happens after this library is already mapped into
//! the child. A [`ctor`]-registered `atexit` hook frees the last `usb_bus`
//! tree on process exit; `ctor` only runs load-time constructors, so
//! teardown has to ride on libc's own exit hook instead of a destructor.

use std::net::TcpStream;
use std::os::raw::{c_char, c_int, c_uint};
use std::os::unix::io::FromRawFd;
use std::ptr;
use std::sync::{Mutex, OnceLock};

use ctor::ctor;
use tracing::error;

use crate::cstruct::{self, UsbBus, UsbDevHandle};
use crate::stub::Stub;

static STUB: OnceLock<Stub<TcpStream>> = OnceLock::new();

/// The most recently built `usb_bus` tree, so the next `usb_get_busses()`
/// call (or process exit) can free it before handing out a new one. Wrapped
/// in a raw pointer, not `Box`, since ownership of the pointee is shared
/// with whatever host code is still holding it.
struct TreeSlot(*mut UsbBus);
unsafe impl Send for TreeSlot {}
static TREE: Mutex<TreeSlot> = Mutex::new(TreeSlot(ptr::null_mut()));

fn stub() -> &'static Stub<TcpStream> {
    STUB.get_or_init(|| {
        let fd = usbnet_handoff::retrieve_any().unwrap_or_else(|e| {
            panic!("usbnet-shim: no inherited session ({e})");
        });
        if let Err(e) = usbnet_transport::disable_nagle_fd(fd) {
            error!(error = %e, "failed to disable Nagle's algorithm on the inherited socket");
        }
        let stream = unsafe { TcpStream::from_raw_fd(fd) };
        Stub::new_with_fd(stream, fd)
    })
}

#[ctor]
fn register_teardown() {
    unsafe {
        libc::atexit(teardown);
    }
}

extern "C" fn teardown() {
    let mut slot = TREE.lock().unwrap();
    if !slot.0.is_null() {
        unsafe { cstruct::free_tree(slot.0) };
        slot.0 = ptr::null_mut();
    }
}

/// Copy up to `cap` bytes of `src` into the caller-owned buffer at `dst`,
/// returning the number of bytes copied. `dst` may be null only if `cap`
/// is zero.
unsafe fn copy_out(src: &[u8], dst: *mut c_char, cap: c_int) -> c_int {
    if cap <= 0 {
        return 0;
    }
    let n = src.len().min(cap as usize);
    if n > 0 {
        ptr::copy_nonoverlapping(src.as_ptr() as *const c_char, dst, n);
    }
    n as c_int
}

unsafe fn borrow_in<'a>(src: *const c_char, len: c_int) -> &'a [u8] {
    if src.is_null() || len <= 0 {
        &[]
    } else {
        std::slice::from_raw_parts(src as *const u8, len as usize)
    }
}

unsafe fn handle_fd(dev: *mut UsbDevHandle) -> Option<i32> {
    if dev.is_null() {
        None
    } else {
        Some((*dev).fd)
    }
}

#[no_mangle]
pub extern "C" fn usb_init() {
    let _ = stub().init();
}

#[no_mangle]
pub extern "C" fn usb_find_busses() -> c_int {
    stub().find_busses().unwrap_or(-1)
}

#[no_mangle]
pub extern "C" fn usb_find_devices() -> c_int {
    stub().find_devices().unwrap_or(-1)
}

/// Synthesize a fresh pointer tree from the virtual bus tree and free the
/// one handed out by the previous call, if any (spec §9's "never hand the
/// arena's own addresses to host code").
#[no_mangle]
pub extern "C" fn usb_get_busses() -> *mut UsbBus {
    let new_tree = stub().with_tree(cstruct::build_tree);
    let mut slot = TREE.lock().unwrap();
    if !slot.0.is_null() {
        unsafe { cstruct::free_tree(slot.0) };
    }
    slot.0 = new_tree;
    new_tree
}

#[no_mangle]
pub extern "C" fn usb_open(bus_location: c_uint, devnum: c_uint) -> *mut UsbDevHandle {
    match stub().open(bus_location as u32, devnum as u32) {
        Ok(handle) if handle >= 0 => Box::into_raw(Box::new(UsbDevHandle {
            fd: handle,
            bus: ptr::null_mut(),
            device: ptr::null_mut(),
            config: 0,
            interface: -1,
            altsetting: -1,
            impl_info: ptr::null_mut(),
        })),
        _ => ptr::null_mut(),
    }
}

#[no_mangle]
pub extern "C" fn usb_close(dev: *mut UsbDevHandle) -> c_int {
    let fd = match unsafe { handle_fd(dev) } {
        Some(fd) => fd,
        None => return -9,
    };
    let rc = stub().close(fd).unwrap_or(-1);
    unsafe { drop(Box::from_raw(dev)) };
    rc
}

#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn usb_control_msg(
    dev: *mut UsbDevHandle,
    requesttype: c_int,
    request: c_int,
    value: c_int,
    index: c_int,
    bytes: *mut c_char,
    size: c_int,
    timeout: c_int,
) -> c_int {
    let fd = match unsafe { handle_fd(dev) } {
        Some(fd) => fd,
        None => return -9,
    };
    let out_bound = unsafe { borrow_in(bytes, size) };
    match stub().control_msg(fd, requesttype, request, value, index, out_bound, timeout) {
        Ok((rc, reply)) if rc >= 0 => unsafe { copy_out(&reply, bytes, size) },
        Ok((rc, _)) => rc,
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn usb_claim_interface(dev: *mut UsbDevHandle, interface: c_int) -> c_int {
    match unsafe { handle_fd(dev) } {
        Some(fd) => stub().claim_interface(fd, interface).unwrap_or(-1),
        None => -9,
    }
}

#[no_mangle]
pub extern "C" fn usb_release_interface(dev: *mut UsbDevHandle, interface: c_int) -> c_int {
    match unsafe { handle_fd(dev) } {
        Some(fd) => stub().release_interface(fd, interface).unwrap_or(-1),
        None => -9,
    }
}

#[no_mangle]
pub extern "C" fn usb_get_driver_np(dev: *mut UsbDevHandle, interface: c_int, name: *mut c_char, namelen: c_uint) -> c_int {
    let fd = match unsafe { handle_fd(dev) } {
        Some(fd) => fd,
        None => return -9,
    };
    match stub().get_kernel_driver(fd, interface, namelen) {
        Ok((rc, driver_name)) if rc >= 0 => {
            unsafe { copy_out(&driver_name, name, namelen as c_int) };
            0
        }
        Ok((rc, _)) => rc,
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn usb_detach_kernel_driver_np(dev: *mut UsbDevHandle, interface: c_int) -> c_int {
    match unsafe { handle_fd(dev) } {
        Some(fd) => stub().detach_kernel_driver(fd, interface).unwrap_or(-1),
        None => -9,
    }
}

#[no_mangle]
pub extern "C" fn usb_bulk_read(dev: *mut UsbDevHandle, ep: c_int, bytes: *mut c_char, size: c_int, timeout: c_int) -> c_int {
    let fd = match unsafe { handle_fd(dev) } {
        Some(fd) => fd,
        None => return -9,
    };
    match stub().bulk_read(fd, ep, size, timeout) {
        Ok((rc, data)) if rc >= 0 => unsafe { copy_out(&data, bytes, size) },
        Ok((rc, _)) => rc,
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn usb_bulk_write(dev: *mut UsbDevHandle, ep: c_int, bytes: *const c_char, size: c_int, timeout: c_int) -> c_int {
    let fd = match unsafe { handle_fd(dev) } {
        Some(fd) => fd,
        None => return -9,
    };
    let data = unsafe { borrow_in(bytes, size) };
    stub().bulk_write(fd, ep, data, timeout).unwrap_or(-1)
}

#[no_mangle]
pub extern "C" fn usb_set_configuration(dev: *mut UsbDevHandle, configuration: c_int) -> c_int {
    let fd = match unsafe { handle_fd(dev) } {
        Some(fd) => fd,
        None => return -9,
    };
    match stub().set_configuration(fd, configuration) {
        Ok((rc, cfg)) => {
            if rc >= 0 && !dev.is_null() {
                unsafe { (*dev).config = cfg };
            }
            rc
        }
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn usb_set_altinterface(dev: *mut UsbDevHandle, alternate: c_int) -> c_int {
    let fd = match unsafe { handle_fd(dev) } {
        Some(fd) => fd,
        None => return -9,
    };
    match stub().set_alt_interface(fd, alternate) {
        Ok((rc, alt)) => {
            if rc >= 0 && !dev.is_null() {
                unsafe { (*dev).altsetting = alt };
            }
            rc
        }
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn usb_resetep(dev: *mut UsbDevHandle, ep: c_uint) -> c_int {
    match unsafe { handle_fd(dev) } {
        Some(fd) => stub().reset_ep(fd, ep).unwrap_or(-1),
        None => -9,
    }
}

#[no_mangle]
pub extern "C" fn usb_clear_halt(dev: *mut UsbDevHandle, ep: c_uint) -> c_int {
    match unsafe { handle_fd(dev) } {
        Some(fd) => stub().clear_halt(fd, ep).unwrap_or(-1),
        None => -9,
    }
}

#[no_mangle]
pub extern "C" fn usb_reset(dev: *mut UsbDevHandle) -> c_int {
    match unsafe { handle_fd(dev) } {
        Some(fd) => stub().reset(fd).unwrap_or(-1),
        None => -9,
    }
}

#[no_mangle]
pub extern "C" fn usb_interrupt_read(dev: *mut UsbDevHandle, ep: c_int, bytes: *mut c_char, size: c_int, timeout: c_int) -> c_int {
    let fd = match unsafe { handle_fd(dev) } {
        Some(fd) => fd,
        None => return -9,
    };
    match stub().interrupt_read(fd, ep, size, timeout) {
        Ok((rc, data)) if rc >= 0 => unsafe { copy_out(&data, bytes, size) },
        Ok((rc, _)) => rc,
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn usb_interrupt_write(dev: *mut UsbDevHandle, ep: c_int, bytes: *const c_char, size: c_int, timeout: c_int) -> c_int {
    let fd = match unsafe { handle_fd(dev) } {
        Some(fd) => fd,
        None => return -9,
    };
    let data = unsafe { borrow_in(bytes, size) };
    stub().interrupt_write(fd, ep, data, timeout).unwrap_or(-1)
}
