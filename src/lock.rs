use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// In-process mutual exclusion keyed by game id.
///
/// Entries are created on demand and dropped again once nobody holds or
/// waits on them, so the map only ever contains games with work in flight.
#[derive(Debug, Default)]
pub struct GameLocks {
    locks: Mutex<HashMap<i32, Arc<Mutex<()>>>>,
}

impl GameLocks {
    pub fn new() -> GameLocks {
        GameLocks::default()
    }

    /// Runs `f` while holding the lock for `game_id`.
    pub fn with<T, F: FnOnce() -> T>(&self, game_id: i32, f: F) -> T {
        let entry = {
            let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(game_id).or_default())
        };

        let result = {
            // A panic in another holder leaves nothing half-written in `()`.
            let _guard = entry.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&entry) == 2 {
            map.remove(&game_id);
        }

        result
    }

    #[cfg(test)]
    fn held(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_game_is_serialized() {
        let locks = Arc::new(GameLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);

                thread::spawn(move || {
                    locks.with(1, || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.held(), 0);
    }

    #[test]
    fn different_games_do_not_block() {
        let locks = GameLocks::new();

        let value = locks.with(1, || locks.with(2, || 42));

        assert_eq!(value, 42);
        assert_eq!(locks.held(), 0);
    }
}
