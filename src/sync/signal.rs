use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Level of the frame-ready bit.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadyState {
    Clear,
    Set,
}

/// Single-bit "frame ready" event between the source and the sink.
///
/// Not a queue: setting an already set flag is a no-op, so any number of
/// productions between two consumptions collapse into one observed event.
/// Set and consume both go through the same mutex, which orders every frame
/// buffer write made before `set` ahead of the consumer's flush.
pub struct ReadySignal {
    inner: Mutex<Inner>,
    cond: Condvar,
}

struct Inner {
    state: ReadyState,
    cancelled: bool,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { state: ReadyState::Clear, cancelled: false }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// CLEAR -> SET. Wakes a waiting consumer.
    pub fn set(&self) {
        let mut inner = self.lock();
        inner.state = ReadyState::Set;
        self.cond.notify_all();
    }

    pub fn state(&self) -> ReadyState {
        self.lock().state
    }

    pub fn is_set(&self) -> bool {
        self.state() == ReadyState::Set
    }

    /// Block until the flag is set, the signal is cancelled or `timeout`
    /// passes.
    ///
    /// Returns `true` if the flag was set, in which case it has already been
    /// cleared again: a `set` racing with the caller's work afterwards is
    /// seen by the next wait. A timeout leaves the state untouched. Once
    /// cancelled, a clear flag returns `false` without waiting.
    pub fn wait_and_clear(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (mut inner, _) = match self.cond.wait_timeout_while(guard, timeout, |inner| {
            inner.state == ReadyState::Clear && !inner.cancelled
        }) {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };

        if inner.state == ReadyState::Set {
            inner.state = ReadyState::Clear;
            true
        } else {
            false
        }
    }

    /// Release every current and future waiter, used on shutdown.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        inner.cancelled = true;
        self.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn times_out_when_nothing_is_ready() {
        let signal = ReadySignal::new();
        let start = Instant::now();
        assert!(!signal.wait_and_clear(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(signal.state(), ReadyState::Clear);
    }

    #[test]
    fn repeated_sets_collapse_into_one_event() {
        let signal = ReadySignal::new();
        signal.set();
        signal.set();
        signal.set();

        assert!(signal.wait_and_clear(Duration::from_millis(10)));
        assert!(!signal.wait_and_clear(Duration::from_millis(10)));
    }

    #[test]
    fn set_after_consume_is_not_lost() {
        let signal = ReadySignal::new();
        signal.set();
        assert!(signal.wait_and_clear(Duration::ZERO));

        // Producer finishes another frame while the consumer is flushing.
        signal.set();
        assert!(signal.is_set());
        assert!(signal.wait_and_clear(Duration::ZERO));
    }

    #[test]
    fn wakes_a_blocked_waiter() {
        let signal = Arc::new(ReadySignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            std::thread::spawn(move || signal.wait_and_clear(Duration::from_secs(5)))
        };

        std::thread::sleep(Duration::from_millis(20));
        signal.set();
        assert!(waiter.join().unwrap());
        assert_eq!(signal.state(), ReadyState::Clear);
    }

    #[test]
    fn cancel_releases_a_long_wait() {
        let signal = Arc::new(ReadySignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            std::thread::spawn(move || {
                let start = Instant::now();
                let ready = signal.wait_and_clear(Duration::from_secs(5));
                (ready, start.elapsed())
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        signal.cancel();
        let (ready, waited) = waiter.join().unwrap();
        assert!(!ready);
        assert!(waited < Duration::from_secs(1), "waited {:?}", waited);

        // Later waits return at once.
        let start = Instant::now();
        assert!(!signal.wait_and_clear(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(signal.is_cancelled());
    }

    #[test]
    fn pending_frame_is_still_delivered_after_cancel() {
        let signal = ReadySignal::new();
        signal.set();
        signal.cancel();
        assert!(signal.wait_and_clear(Duration::from_secs(5)));
        assert!(!signal.wait_and_clear(Duration::from_secs(5)));
    }
}
