//! Lock helpers that recover from poisoning instead of propagating panics.
//!
//! Every guarded section in this crate is a short check-and-update that leaves
//! the protected state consistent at each statement, so continuing with the
//! inner value after another thread panicked is sound.

use std::sync::{Mutex, MutexGuard};

use tracing::warn;

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log_poisoned(target, op, "mutex.lock");
            poisoned.into_inner()
        }
    }
}

fn log_poisoned(target: &'static str, op: &'static str, lock_kind: &'static str) {
    warn!(
        op,
        target_module = target,
        lock_kind,
        result = "poisoned_recovered",
        "Recovered from poisoned lock"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn mutex_lock_recovers_after_panic() {
        let lock = Arc::new(Mutex::new(1_u32));
        let poisoner = Arc::clone(&lock);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().expect("first lock");
            panic!("poison the lock");
        })
        .join();

        assert!(lock.is_poisoned());
        let mut guard = mutex_lock(&lock, "util::lock::tests", "recover");
        *guard += 1;
        assert_eq!(*guard, 2);
    }
}
