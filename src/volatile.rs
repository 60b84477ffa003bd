use std::ptr;

// Callers guarantee `r` is valid, aligned memory for the lifetime of the access
// (an MMIO mapping or a live DMA page).

pub unsafe fn read<T>(r: *const T) -> T {
    ptr::read_volatile(r)
}

pub unsafe fn write<T>(r: *mut T, value: T) {
    ptr::write_volatile(r, value);
}
