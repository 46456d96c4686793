//! Architecture-specific access to the native machine state: the frame
//! pointer, the stack pointer, a snapshot of the general-purpose registers
//! and the frame-chain walk feeding the conservative root scan. One
//! implementation exists per supported architecture; building for anything
//! else fails here rather than miscollecting at runtime.

use cfg_if::cfg_if;
use core::arch::asm;
use core::mem::size_of;

cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// The contents of the general-purpose registers at the moment of
        /// capture. `rsp` and `rbp` are excluded: stack addresses are
        /// filtered out of the root set anyway.
        #[derive(Debug, Default, Clone, Copy)]
        #[repr(C)]
        pub struct RegisterSnapshot {
            pub rax: usize,
            pub rbx: usize,
            pub rcx: usize,
            pub rdx: usize,
            pub rsi: usize,
            pub rdi: usize,
            pub r8: usize,
            pub r9: usize,
            pub r10: usize,
            pub r11: usize,
            pub r12: usize,
            pub r13: usize,
            pub r14: usize,
            pub r15: usize,
        }

        impl RegisterSnapshot {
            /// The captured registers as a flat word array.
            #[must_use]
            pub fn words(&self) -> [usize; 14] {
                [
                    self.rax, self.rbx, self.rcx, self.rdx, self.rsi, self.rdi,
                    self.r8, self.r9, self.r10, self.r11, self.r12, self.r13,
                    self.r14, self.r15,
                ]
            }
        }

        /// Read the current frame pointer.
        #[inline(always)]
        #[must_use]
        pub fn read_frame_pointer() -> usize {
            let fp: usize;
            unsafe {
                asm!("mov {}, rbp", out(reg) fp, options(nomem, nostack, preserves_flags));
            }
            fp
        }

        /// Read the current stack pointer.
        #[inline(always)]
        #[must_use]
        pub fn read_stack_pointer() -> usize {
            let sp: usize;
            unsafe {
                asm!("mov {}, rsp", out(reg) sp, options(nomem, nostack, preserves_flags));
            }
            sp
        }

        /// Sample every general-purpose register. The values are whatever
        /// the surrounding code happens to keep there; the caller filters
        /// them like any other conservative candidate.
        #[inline(never)]
        #[must_use]
        pub fn capture_registers() -> RegisterSnapshot {
            let mut snapshot = RegisterSnapshot::default();
            macro_rules! sample {
                ($($field:ident : $reg:literal),* $(,)?) => {
                    $(
                        unsafe {
                            asm!(
                                concat!("mov {}, ", $reg),
                                out(reg) snapshot.$field,
                                options(nomem, nostack, preserves_flags),
                            );
                        }
                    )*
                };
            }
            sample!(
                rax: "rax", rbx: "rbx", rcx: "rcx", rdx: "rdx",
                rsi: "rsi", rdi: "rdi", r8: "r8", r9: "r9",
                r10: "r10", r11: "r11", r12: "r12", r13: "r13",
                r14: "r14", r15: "r15",
            );
            snapshot
        }
    } else if #[cfg(target_arch = "aarch64")] {
        /// The contents of the general-purpose registers at the moment of
        /// capture. `sp` and the frame pointer `x29` are excluded: stack
        /// addresses are filtered out of the root set anyway.
        #[derive(Debug, Default, Clone, Copy)]
        #[repr(C)]
        pub struct RegisterSnapshot {
            pub x: [usize; 29],
        }

        impl RegisterSnapshot {
            /// The captured registers as a flat word array.
            #[must_use]
            pub fn words(&self) -> [usize; 29] {
                self.x
            }
        }

        /// Read the current frame pointer.
        #[inline(always)]
        #[must_use]
        pub fn read_frame_pointer() -> usize {
            let fp: usize;
            unsafe {
                asm!("mov {}, x29", out(reg) fp, options(nomem, nostack, preserves_flags));
            }
            fp
        }

        /// Read the current stack pointer.
        #[inline(always)]
        #[must_use]
        pub fn read_stack_pointer() -> usize {
            let sp: usize;
            unsafe {
                asm!("mov {}, sp", out(reg) sp, options(nomem, nostack, preserves_flags));
            }
            sp
        }

        /// Sample every general-purpose register. The values are whatever
        /// the surrounding code happens to keep there; the caller filters
        /// them like any other conservative candidate.
        #[inline(never)]
        #[must_use]
        pub fn capture_registers() -> RegisterSnapshot {
            let mut snapshot = RegisterSnapshot::default();
            macro_rules! sample {
                ($($index:literal : $reg:literal),* $(,)?) => {
                    $(
                        unsafe {
                            asm!(
                                concat!("mov {}, ", $reg),
                                out(reg) snapshot.x[$index],
                                options(nomem, nostack, preserves_flags),
                            );
                        }
                    )*
                };
            }
            sample!(
                0: "x0", 1: "x1", 2: "x2", 3: "x3", 4: "x4", 5: "x5",
                6: "x6", 7: "x7", 8: "x8", 9: "x9", 10: "x10", 11: "x11",
                12: "x12", 13: "x13", 14: "x14", 15: "x15", 16: "x16",
                17: "x17", 18: "x18", 19: "x19", 20: "x20", 21: "x21",
                22: "x22", 23: "x23", 24: "x24", 25: "x25", 26: "x26",
                27: "x27", 28: "x28",
            );
            snapshot
        }
    } else {
        compile_error!("conservative root scanning is not implemented for this architecture");
    }
}

/// Walk the native frame chain from the current frame toward `stack_base`,
/// feeding the visitor the return-address slot and every word each frame
/// spans. The walk stops at the first frame record that does not advance
/// monotonically toward the base, so a frame built without a frame pointer
/// truncates the scan instead of derailing it.
///
/// # Safety
/// `stack_base` must be the value recorded by this thread at attach time,
/// and the frame-pointer chain between here and there must be readable.
pub unsafe fn walk_frames(stack_base: usize, mut visit: impl FnMut(usize)) {
    let word_size = size_of::<usize>();
    let floor = read_stack_pointer();
    let mut frame = read_frame_pointer();

    // A frame pointer register repurposed as a scratch register by the
    // compiler fails the extent check and truncates the walk to nothing.
    while frame >= floor && frame % word_size == 0 && frame < stack_base {
        let next = (frame as *const usize).read();
        let ret = (frame as *const usize).add(1).read();
        visit(ret);

        if next <= frame || next > stack_base || next % word_size != 0 {
            break;
        }

        // The region between this frame record and the caller's holds the
        // caller's saved registers and spilled locals.
        let mut word = frame + 2 * word_size;
        while word < next {
            visit((word as *const usize).read());
            word += word_size;
        }

        frame = next;
    }
}
