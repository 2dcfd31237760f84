use std::ptr::NonNull;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub fn page_size() -> usize {
            rustix::param::page_size()
        }

        pub fn reserve(len: usize) -> Option<NonNull<u8>> {
            use rustix::mm::{MapFlags, ProtFlags, mmap_anonymous};
            let ptr = unsafe {
                mmap_anonymous(
                    std::ptr::null_mut(),
                    len,
                    ProtFlags::READ | ProtFlags::WRITE,
                    MapFlags::PRIVATE,
                )
                .ok()?
            };
            NonNull::new(ptr.cast())
        }

        /// # Safety
        /// `ptr..ptr+len` must lie within a mapping owned by the caller.
        pub unsafe fn protect_none(ptr: *mut u8, len: usize) -> Result<(), rustix::io::Errno> {
            use rustix::mm::{MprotectFlags, mprotect};
            unsafe { mprotect(ptr.cast(), len, MprotectFlags::empty()) }
        }

        /// # Safety
        /// `ptr..ptr+len` must be a mapping previously returned by `reserve`.
        pub unsafe fn release(ptr: *mut u8, len: usize) {
            unsafe {
                let _ = rustix::mm::munmap(ptr.cast(), len);
            }
        }
    } else if #[cfg(windows)] {
        use windows_sys::Win32::System::Memory::{
            VirtualAlloc, VirtualFree, VirtualProtect, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
            PAGE_NOACCESS, PAGE_READWRITE,
        };

        pub fn page_size() -> usize {
            // Windows allocation granularity for our purposes; 4 KiB is the
            // stable page size on all supported targets.
            4096
        }

        pub fn reserve(len: usize) -> Option<NonNull<u8>> {
            let ptr = unsafe {
                VirtualAlloc(std::ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE)
            };
            NonNull::new(ptr.cast())
        }

        /// # Safety
        /// `ptr..ptr+len` must lie within a mapping owned by the caller.
        pub unsafe fn protect_none(ptr: *mut u8, len: usize) -> Result<(), ()> {
            let mut old = 0u32;
            let ok = unsafe { VirtualProtect(ptr.cast(), len, PAGE_NOACCESS, &mut old) };
            if ok == 0 { Err(()) } else { Ok(()) }
        }

        /// # Safety
        /// `ptr` must be the base of a mapping previously returned by `reserve`.
        pub unsafe fn release(ptr: *mut u8, _len: usize) {
            unsafe {
                let _ = VirtualFree(ptr.cast(), 0, MEM_RELEASE);
            }
        }
    } else {
        compile_error!("vmcore-fiber supports unix and windows only");
    }
}
