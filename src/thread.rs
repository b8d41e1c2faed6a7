//! Worker thread plumbing: execution unit handles and CPU affinity

use std::{io, mem, time::Duration};

/// Native handle of a running worker thread.
///
/// Only valid while the thread is alive. Workers register it on start-up and every priority
/// request against it happens before the thread leaves its work loop.
#[derive(Debug, Clone, Copy)]
pub struct ExecUnit {
    pthread: libc::pthread_t,
    tid: libc::pid_t,
}

// `pthread_t` is an opaque identifier, not a pointer into thread-local state
unsafe impl Send for ExecUnit {}
unsafe impl Sync for ExecUnit {}

impl ExecUnit {
    /// Handle of the calling thread
    pub fn current() -> Self {
        Self {
            pthread: unsafe { libc::pthread_self() },
            tid: unsafe { libc::syscall(libc::SYS_gettid) } as libc::pid_t,
        }
    }

    pub fn pthread(&self) -> libc::pthread_t {
        self.pthread
    }

    /// Kernel thread id, as shown by `ps -L`
    pub fn tid(&self) -> libc::pid_t {
        self.tid
    }
}

/// Pins the calling thread to a single CPU.
pub fn pin_to_cpu(cpu: usize) -> io::Result<()> {
    if cpu >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cpu {} out of range", cpu),
        ));
    }

    unsafe {
        let mut set: libc::cpu_set_t = mem::zeroed();
        libc::CPU_SET(cpu, &mut set);

        if libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}

/// CPU time consumed so far by the calling thread (`CLOCK_THREAD_CPUTIME_ID`).
///
/// Unlike wall time it does not advance while the thread is preempted.
pub fn cpu_time() -> io::Result<Duration> {
    let mut ts = mem::MaybeUninit::<libc::timespec>::uninit();

    if unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, ts.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let ts = unsafe { ts.assume_init() };
    Ok(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_unit_differs_between_threads() {
        let main = ExecUnit::current();
        let other = std::thread::spawn(ExecUnit::current).join().unwrap();

        assert_ne!(main.tid(), other.tid());
        assert!(unsafe { libc::pthread_equal(main.pthread(), ExecUnit::current().pthread()) } != 0);
    }

    #[test]
    fn pinning_to_current_cpu_succeeds() {
        std::thread::spawn(|| {
            let cpu = unsafe { libc::sched_getcpu() };
            assert!(cpu >= 0);
            pin_to_cpu(cpu as usize).unwrap();
            assert_eq!(unsafe { libc::sched_getcpu() }, cpu);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn pinning_out_of_range_is_rejected() {
        let err = pin_to_cpu(usize::MAX).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn cpu_time_ignores_sleeping() {
        std::thread::spawn(|| {
            let before = cpu_time().unwrap();
            std::thread::sleep(Duration::from_millis(50));
            let slept = cpu_time().unwrap() - before;
            assert!(slept < Duration::from_millis(25), "sleep counted as {:?} of CPU", slept);
        })
        .join()
        .unwrap();
    }
}
