//! One-shot gate that holds a node back until another party releases it.
//!
//! [`pair`] builds the shared signal first and hands out both sides from it,
//! so a releaser and the waiters it is meant to free can never point at
//! different signals.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// The signal shared by both sides of a gate
#[derive(Debug, Default)]
pub struct Signal {
    released: Mutex<bool>,
    condvar: Condvar,
}

/// Build a connected releaser/waiter pair
pub fn pair() -> (WaitSignaller, NodeWaiter) {
    let signal = Arc::new(Signal::default());
    (
        WaitSignaller {
            signal: Arc::clone(&signal),
        },
        NodeWaiter::Blocking(signal),
    )
}

/// Releasing side of a gate
#[derive(Debug, Clone)]
pub struct WaitSignaller {
    signal: Arc<Signal>,
}

impl WaitSignaller {
    /// Open the gate. Only the first call has an effect.
    pub fn signal_wait_end(&self) {
        let mut released = self.signal.released.lock();
        if !*released {
            *released = true;
            self.signal.condvar.notify_all();
        }
    }

    pub fn is_released(&self) -> bool {
        *self.signal.released.lock()
    }
}

/// Waiting side of a gate
#[derive(Debug, Clone, Default)]
pub enum NodeWaiter {
    /// Never blocks
    #[default]
    NoWait,
    /// Blocks until the matching [`WaitSignaller`] fires
    Blocking(Arc<Signal>),
}

impl NodeWaiter {
    /// Block until the gate opens
    pub fn wait(&self) {
        if let NodeWaiter::Blocking(signal) = self {
            let mut released = signal.released.lock();
            while !*released {
                signal.condvar.wait(&mut released);
            }
        }
    }

    /// Block until the gate opens or `timeout` elapses. Returns whether the
    /// gate is open.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self {
            NodeWaiter::NoWait => true,
            NodeWaiter::Blocking(signal) => {
                let mut released = signal.released.lock();
                if !*released {
                    let _ = signal
                        .condvar
                        .wait_while_for(&mut released, |released| !*released, timeout);
                }
                *released
            }
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, NodeWaiter::Blocking(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_no_wait_never_blocks() {
        let waiter = NodeWaiter::NoWait;
        waiter.wait();
        assert!(waiter.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_waiter_blocks_until_released() {
        let (signaller, waiter) = pair();
        let passed = Arc::new(AtomicBool::new(false));

        let handle = {
            let passed = Arc::clone(&passed);
            thread::spawn(move || {
                waiter.wait();
                passed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!passed.load(Ordering::SeqCst));

        signaller.signal_wait_end();
        handle.join().unwrap();
        assert!(passed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wait_timeout_expires_while_closed() {
        let (signaller, waiter) = pair();
        assert!(!waiter.wait_timeout(Duration::from_millis(20)));
        signaller.signal_wait_end();
        assert!(waiter.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_release_is_one_shot() {
        let (signaller, waiter) = pair();
        signaller.signal_wait_end();
        signaller.signal_wait_end();
        assert!(signaller.is_released());
        waiter.wait();
        waiter.clone().wait();
    }
}
