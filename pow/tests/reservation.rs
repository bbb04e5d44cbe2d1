use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use tritium_pow::{
    reservation::{acquire, Owner, ReservationPolicy},
    testing::SharedStatus,
};

fn policy() -> ReservationPolicy {
    ReservationPolicy {
        backoff: Duration::from_millis(1),
        timeout: Duration::from_secs(5),
    }
}

#[test]
fn competing_hosts_never_overlap() {
    let shared = SharedStatus::new();
    let busy = Arc::new(AtomicBool::new(false));
    let rounds = Arc::new(AtomicUsize::new(0));

    let hosts: Vec<_> = [Owner::Controller, Owner::Usb]
        .into_iter()
        .map(|owner| {
            let host = shared.host();
            let busy = busy.clone();
            let rounds = rounds.clone();
            thread::spawn(move || {
                let mut host = host;
                for _ in 0..20 {
                    let held = acquire(&mut host, owner, policy()).unwrap();
                    assert!(!busy.swap(true, Ordering::SeqCst), "two owners at once");
                    thread::sleep(Duration::from_micros(200));
                    busy.store(false, Ordering::SeqCst);
                    drop(held);
                    rounds.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for host in hosts {
        host.join().unwrap();
    }
    assert_eq!(rounds.load(Ordering::SeqCst), 40);
    assert_eq!(shared.current(), Owner::None);
}

#[test]
fn release_lets_the_other_host_in_within_one_poll() {
    let shared = SharedStatus::new();
    let mut usb = shared.host();
    let held = acquire(&mut usb, Owner::Usb, policy()).unwrap();

    let backoff = Duration::from_millis(20);
    let waiting = {
        let mut controller = shared.host();
        thread::spawn(move || {
            let policy = ReservationPolicy {
                backoff,
                timeout: Duration::from_secs(5),
            };
            let held = acquire(&mut controller, Owner::Controller, policy).unwrap();
            let acquired = Instant::now();
            drop(held);
            acquired
        })
    };

    thread::sleep(Duration::from_millis(50));
    let released = Instant::now();
    drop(held);
    let acquired = waiting.join().unwrap();
    assert!(acquired.duration_since(released) <= backoff + Duration::from_millis(40));
}
