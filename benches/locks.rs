use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, Bencher, Criterion};
use qsync::park::{ImmediatePark, Park, SpinThenPark, YieldThenPark};
use qsync::{Mutex, TwinsLock};

fn gen_create<P: Park>(bencher: &mut Bencher) {
    bencher.iter(|| black_box(Mutex::<P>::new()));
}

fn gen_lock_unlock<P: Park>(bencher: &mut Bencher) {
    let mutex = Mutex::<P>::new();

    bencher.iter(|| {
        mutex.lock();
        mutex.unlock().unwrap();
    });
}

fn gen_lock_unlock_contention<P: Park + 'static>(bencher: &mut Bencher) {
    let mutex = Arc::new(Mutex::<P>::new());
    let done = Arc::new(AtomicBool::new(false));

    let thread = thread::spawn({
        let (mutex, done) = (Arc::clone(&mutex), Arc::clone(&done));
        move || {
            while !done.load(Ordering::Relaxed) {
                for _ in 0..1000 {
                    mutex.lock();
                    mutex.unlock().unwrap();
                }
            }
        }
    });

    bencher.iter(|| {
        mutex.lock();
        mutex.unlock().unwrap();
    });

    done.store(true, Ordering::Relaxed);
    thread.join().unwrap();
}

fn gen_twins_contention<P: Park + 'static>(bencher: &mut Bencher) {
    const THREADS: usize = 2;
    let lock = Arc::new(TwinsLock::<P>::new());
    let done = Arc::new(AtomicBool::new(false));

    let threads: Vec<_> = (0..THREADS)
        .map(|_| {
            let (lock, done) = (Arc::clone(&lock), Arc::clone(&done));
            thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    for _ in 0..1000 {
                        lock.lock();
                        lock.unlock().unwrap();
                    }
                }
            })
        })
        .collect();

    bencher.iter(|| {
        lock.lock();
        lock.unlock().unwrap();
    });

    done.store(true, Ordering::Relaxed);
    for thread in threads {
        thread.join().unwrap();
    }
}

fn create(criterion: &mut Criterion) {
    criterion.bench_function("create", |bench| gen_create::<SpinThenPark>(bench));
}

fn lock_unlock(criterion: &mut Criterion) {
    criterion.bench_function("lock_unlock", |bench| gen_lock_unlock::<SpinThenPark>(bench));
}

fn lock_unlock_contention(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("lock_unlock_contention");
    group.bench_function("spins", |bench| gen_lock_unlock_contention::<SpinThenPark>(bench));
    group.bench_function("yields", |bench| gen_lock_unlock_contention::<YieldThenPark>(bench));
    group.bench_function("immediate", |bench| gen_lock_unlock_contention::<ImmediatePark>(bench));
    group.finish();
}

fn twins_contention(criterion: &mut Criterion) {
    criterion.bench_function("twins_contention", |bench| gen_twins_contention::<SpinThenPark>(bench));
}

criterion_group!(locks, create, lock_unlock, lock_unlock_contention, twins_contention);

criterion_main!(locks);
