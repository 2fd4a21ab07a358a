use std::sync::atomic::{AtomicBool, Ordering};

// Non-blocking mutual exclusion around the computation critical section. A
// caller that loses the race is served the last cached result instead of
// queueing behind the winner.
#[derive(Default)]
pub struct SingleFlightGuard {
    busy: AtomicBool,
}

impl SingleFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_enter(&self) -> Option<FlightPermit<'_>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(FlightPermit { guard: self })
        } else {
            None
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }
}

// Releasing on Drop keeps the flag balanced on every exit path of the
// guarded region, early returns and panics included.
pub struct FlightPermit<'a> {
    guard: &'a SingleFlightGuard,
}

impl Drop for FlightPermit<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn second_enter_fails_while_permit_is_held() {
        let guard = SingleFlightGuard::new();
        let permit = guard.try_enter().expect("first enter should succeed");
        assert!(guard.try_enter().is_none());
        assert!(guard.is_busy());
        drop(permit);
        assert!(guard.try_enter().is_some());
    }

    #[test]
    fn permit_releases_on_panic_path() {
        let guard = Arc::new(SingleFlightGuard::new());
        let inner = guard.clone();
        let result = std::thread::spawn(move || {
            let _permit = inner.try_enter().expect("enter should succeed");
            panic!("guarded region failed");
        })
        .join();
        assert!(result.is_err());
        assert!(!guard.is_busy());
        assert!(guard.try_enter().is_some());
    }

    #[test]
    fn concurrent_callers_admit_at_most_one_at_a_time() {
        let guard = Arc::new(SingleFlightGuard::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles = (0..8)
            .map(|_| {
                let guard = guard.clone();
                let inside = inside.clone();
                let peak = peak.clone();
                let admitted = admitted.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if let Some(permit) = guard.try_enter() {
                            admitted.fetch_add(1, Ordering::Relaxed);
                            let current = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(current, Ordering::SeqCst);
                            std::thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                            drop(permit);
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("worker should finish");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(admitted.load(Ordering::Relaxed) >= 1);
        assert!(!guard.is_busy());
    }
}
