//! Process table queries through `sysctl(3)`.

use crate::{procargs, procargs::ProcArgs, Error, Result};
use anyhow::Context as _;
use libc::{c_int, c_void, pid_t};
use std::{fmt, mem::MaybeUninit};

use ffi::kinfo_proc;

/// Mirrors of the `KERN_PROC` record from `<sys/sysctl.h>` and `<sys/proc.h>`,
/// which libc does not declare for Darwin. Kernel pointers are kept opaque.
#[allow(dead_code, non_camel_case_types)]
mod ffi {
    use libc::{
        c_char, c_int, c_short, c_uint, c_void, dev_t, gid_t, pid_t, sigset_t, timeval, uid_t,
    };

    const MAXCOMLEN: usize = 16;
    const WMESGLEN: usize = 7;
    const COMAPT_MAXLOGNAME: usize = 12;
    const NGROUPS: usize = 16;

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct itimerval {
        pub it_interval: timeval,
        pub it_value: timeval,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct extern_proc {
        /// `p_st1` run queue links, or `__p_starttime`.
        pub p_un: [*mut c_void; 2],
        pub p_vmspace: *mut c_void,
        pub p_sigacts: *mut c_void,
        pub p_flag: c_int,
        pub p_stat: c_char,
        pub p_pid: pid_t,
        pub p_oppid: pid_t,
        pub p_dupfd: c_int,
        pub user_stack: *mut c_char,
        pub exit_thread: *mut c_void,
        pub p_debugger: c_int,
        pub sigwait: c_int,
        pub p_estcpu: c_uint,
        pub p_cpticks: c_int,
        pub p_pctcpu: u32,
        pub p_wchan: *mut c_void,
        pub p_wmesg: *mut c_char,
        pub p_swtime: c_uint,
        pub p_slptime: c_uint,
        pub p_realtimer: itimerval,
        pub p_rtime: timeval,
        pub p_uticks: u64,
        pub p_sticks: u64,
        pub p_iticks: u64,
        pub p_traceflag: c_int,
        pub p_tracep: *mut c_void,
        pub p_siglist: c_int,
        pub p_textvp: *mut c_void,
        pub p_holdcnt: c_int,
        pub p_sigmask: sigset_t,
        pub p_sigignore: sigset_t,
        pub p_sigcatch: sigset_t,
        pub p_priority: u8,
        pub p_usrpri: u8,
        pub p_nice: c_char,
        pub p_comm: [c_char; MAXCOMLEN + 1],
        pub p_pgrp: *mut c_void,
        pub p_addr: *mut c_void,
        pub p_xstat: u16,
        pub p_acflag: u16,
        pub p_ru: *mut c_void,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct _pcred {
        pub pc_lock: [c_char; 72],
        pub pc_ucred: *mut c_void,
        pub p_ruid: uid_t,
        pub p_svuid: uid_t,
        pub p_rgid: gid_t,
        pub p_svgid: gid_t,
        pub p_refcnt: c_int,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct _ucred {
        pub cr_ref: i32,
        pub cr_uid: uid_t,
        pub cr_ngroups: c_short,
        pub cr_groups: [gid_t; NGROUPS],
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct vmspace {
        pub dummy: i32,
        pub dummy2: *mut c_char,
        pub dummy3: [i32; 5],
        pub dummy4: [*mut c_char; 3],
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct eproc {
        pub e_paddr: *mut c_void,
        pub e_sess: *mut c_void,
        pub e_pcred: _pcred,
        pub e_ucred: _ucred,
        pub e_vm: vmspace,
        pub e_ppid: pid_t,
        pub e_pgid: pid_t,
        pub e_jobc: c_short,
        pub e_tdev: dev_t,
        pub e_tpgid: pid_t,
        pub e_tsess: *mut c_void,
        pub e_wmesg: [c_char; WMESGLEN + 1],
        pub e_xsize: i32,
        pub e_xrssize: c_short,
        pub e_xccount: c_short,
        pub e_xswrss: c_short,
        pub e_flag: i32,
        pub e_login: [c_char; COMAPT_MAXLOGNAME],
        pub e_spare: [i32; 4],
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct kinfo_proc {
        pub kp_proc: extern_proc,
        pub kp_eproc: eproc,
    }

    // The kernel only fills in a record of exactly this size.
    #[cfg(target_pointer_width = "64")]
    const _: () = {
        assert!(std::mem::size_of::<extern_proc>() == 296);
        assert!(std::mem::size_of::<eproc>() == 352);
        assert!(std::mem::size_of::<kinfo_proc>() == 648);
    };
}

/// Process descriptor returned by `KERN_PROC_PID`.
#[derive(Clone, Copy)]
pub struct ProcessInfo(kinfo_proc);

// SAFETY: the pointers in the record are kernel addresses, never dereferenced.
unsafe impl Send for ProcessInfo {}
unsafe impl Sync for ProcessInfo {}

impl ProcessInfo {
    pub fn pid(&self) -> pid_t {
        self.0.kp_proc.p_pid
    }
    pub fn ppid(&self) -> pid_t {
        self.0.kp_eproc.e_ppid
    }
    /// Command name, truncated by the kernel to `MAXCOMLEN` bytes.
    pub fn command(&self) -> String {
        let comm: Vec<u8> = self
            .0
            .kp_proc
            .p_comm
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        String::from_utf8_lossy(&comm).into_owned()
    }
}

impl fmt::Debug for ProcessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessInfo")
            .field("pid", &self.pid())
            .field("ppid", &self.ppid())
            .field("command", &self.command())
            .finish()
    }
}

/// `KERN_PROCARGS2` output. Only the first `used` bytes were written by the kernel.
pub struct RawArgBuffer {
    data: Vec<u8>,
    used: usize,
}

impl RawArgBuffer {
    pub fn used_len(&self) -> usize {
        self.used
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.used.min(self.data.len())]
    }
    pub fn decode(&self) -> Result<ProcArgs> {
        procargs::decode(&self.data, self.used)
    }
}

impl fmt::Debug for RawArgBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawArgBuffer")
            .field("used", &self.used)
            .field("capacity", &self.data.len())
            .finish()
    }
}

/// Read-only query by MIB. Returns the number of bytes the kernel wrote.
///
/// # Safety
///
/// `out` must be valid for writes of `len` bytes.
unsafe fn sysctl_read(mib: &mut [c_int], out: *mut c_void, len: usize) -> Result<usize> {
    let mut size = len;
    let rv = libc::sysctl(
        mib.as_mut_ptr(),
        mib.len() as libc::c_uint,
        out,
        &mut size,
        std::ptr::null_mut(),
        0,
    );
    if rv != 0 {
        let err = Error::last_os_error();
        log::debug!("sysctl {mib:?} failed: {err}");
        return Err(err);
    }
    log::debug!("sysctl {mib:?} wrote {size} of {len} bytes");
    Ok(size)
}

pub fn fetch_info(pid: pid_t) -> Result<ProcessInfo> {
    let mut mib = [libc::CTL_KERN, libc::KERN_PROC, libc::KERN_PROC_PID, pid];
    let mut info = MaybeUninit::<kinfo_proc>::zeroed();
    let expected = std::mem::size_of::<kinfo_proc>();
    // SAFETY: `info` is exactly `expected` bytes long.
    let size = unsafe { sysctl_read(&mut mib, info.as_mut_ptr().cast(), expected)? };
    if size != expected {
        // Unknown pids succeed with an empty reply.
        log::debug!("No process record for pid {pid}");
        return Err(Error::Kernel(libc::ESRCH));
    }
    // SAFETY: zero is a valid bit pattern for `kinfo_proc`, and the kernel wrote a full record.
    Ok(ProcessInfo(unsafe { info.assume_init() }))
}

pub fn fetch_ppid(pid: pid_t) -> Result<pid_t> {
    fetch_info(pid).map(|info| info.ppid())
}

/// Size of the largest argument buffer the kernel will hand out (`kern.argmax`).
pub fn fetch_arg_max() -> Result<usize> {
    let mut arg_max: c_int = 0;
    let mut size = std::mem::size_of::<c_int>();
    // SAFETY: `arg_max` is a `c_int` and `size` says so.
    let rv = unsafe {
        libc::sysctlbyname(
            c"kern.argmax".as_ptr(),
            (&mut arg_max as *mut c_int).cast(),
            &mut size,
            std::ptr::null_mut(),
            0,
        )
    };
    if rv != 0 {
        return Err(Error::last_os_error());
    }
    let max = usize::try_from(arg_max)
        .ok()
        .filter(|&max| max > 0)
        .ok_or_else(|| anyhow::anyhow!("kernel reported kern.argmax of {arg_max}"))?;
    Ok(max)
}

pub fn fetch_arg_buffer(pid: pid_t) -> Result<RawArgBuffer> {
    let arg_max = fetch_arg_max()?;
    let mut data = Vec::new();
    data.try_reserve_exact(arg_max)
        .with_context(|| format!("allocating {arg_max} byte argument buffer"))?;
    data.resize(arg_max, 0);
    let mut mib = [libc::CTL_KERN, libc::KERN_PROCARGS2, pid];
    // SAFETY: `data` holds `arg_max` initialized bytes.
    let used = unsafe { sysctl_read(&mut mib, data.as_mut_ptr().cast(), arg_max)? };
    Ok(RawArgBuffer { data, used })
}

/// Path, arguments and environment `pid` was started with.
pub fn fetch_args(pid: pid_t) -> Result<ProcArgs> {
    fetch_arg_buffer(pid)?.decode()
}
