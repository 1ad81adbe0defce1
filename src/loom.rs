pub mod models {
    use core::array;

    use loom::model::Builder;
    use loom::sync::Arc;
    use loom::{model, thread};

    use crate::test::{get, inc, try_inc, Lock, Probe, TryLock};

    // TODO: Three or more blocking threads make lock models run for too long.
    // It would be nice to run a lock model with at least three threads because
    // that would cover a queue with a cancelled or skipped node in the middle.
    const LOCKS: usize = 2;
    const TRY_LOCKS: usize = 3;

    /// Preemptions allowed in models that run more blocking threads.
    const PREEMPTION_BOUND: usize = 2;

    /// Evaluates that concurrent `try_lock` calls will serialize all critical
    /// sections, therefore no data races.
    pub fn try_lock_join<L>()
    where
        L: TryLock + Send + Sync + 'static,
    {
        model(|| {
            const RUNS: usize = TRY_LOCKS;
            let lock = Arc::new(Probe::<L>::new());
            let handles: [_; RUNS] = array::from_fn(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || try_inc(&lock))
            });
            for handle in handles {
                handle.join().unwrap();
            }
            let value = get(&lock);
            assert!((1..=RUNS).contains(&value));
        });
    }

    /// Evaluates that concurrent `lock` calls will serialize all critical
    /// sections and that every blocked caller is eventually resumed.
    pub fn lock_join<L>()
    where
        L: Lock + Send + Sync + 'static,
    {
        model(|| {
            const RUNS: usize = LOCKS;
            let lock = Arc::new(Probe::<L>::new());
            let handles: [_; RUNS] = array::from_fn(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || inc(&lock))
            });
            for handle in handles {
                handle.join().unwrap();
            }
            let value = get(&lock);
            assert_eq!(RUNS, value);
        });
    }

    /// Evaluates that concurrent `lock` and `try_lock` calls will serialize
    /// all critical sections, therefore no data races.
    pub fn mixed_lock_join<L>()
    where
        L: TryLock + Send + Sync + 'static,
    {
        model(|| {
            const RUNS: usize = LOCKS;
            let lock = Arc::new(Probe::<L>::new());
            let handles: [_; RUNS] = array::from_fn(|run| {
                let lock = Arc::clone(&lock);
                let f = if run % 2 == 0 { inc } else { try_inc };
                thread::spawn(move || f(&lock))
            });
            for handle in handles {
                handle.join().unwrap();
            }
            let value = get(&lock);
            assert!((1..=RUNS).contains(&value));
        });
    }

    /// Evaluates that a shared lock never admits more than its holders, even
    /// when more threads than permits contend for it.
    pub fn shared_bound<L>()
    where
        L: Lock + Send + Sync + 'static,
    {
        let mut builder = Builder::new();
        builder.preemption_bound = Some(PREEMPTION_BOUND);
        builder.check(|| {
            let runs = L::HOLDERS + 1;
            let lock = Arc::new(Probe::<L>::new());
            let handles: Vec<_> = (0..runs)
                .map(|_| {
                    let lock = Arc::clone(&lock);
                    thread::spawn(move || inc(&lock))
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(runs, get(&lock));
        });
    }
}
