//! In-process single-flight coordination.
//!
//! The map is process-global and keyed independently of the cache path so two
//! engine instances sharing a cache directory coordinate. The first caller
//! for a key runs the generator; overlapping callers await the same pending
//! cell. Entries are removed once the leader finishes, so a later call (after
//! e.g. a cache rebuild) generates afresh.

use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

type FlightCell = Arc<OnceCell<Value>>;

static IN_FLIGHT: Lazy<Mutex<HashMap<String, FlightCell>>> = Lazy::new(Default::default);

/// Cache-path-independent flight key for one snapshot.
pub fn flight_key(package_id: &str, package_version: &str, filename: &str) -> String {
    format!("{}#{}/{}", package_id, package_version, filename)
}

/// Run `generate` under single-flight for `key`. If a flight for the key is
/// already pending, await its result instead of generating. A failed leader
/// leaves the cell empty, so a waiter falls back to its own generation.
pub async fn run<F, Fut, E>(key: &str, generate: F) -> Result<Value, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, E>>,
{
    let Some((cell, leader)) = enter(key) else {
        return generate().await;
    };

    let result = cell.get_or_try_init(generate).await.map(Value::clone);
    if leader {
        exit(key);
    }
    result
}

/// Join or open the flight for `key`. Returns the shared cell and whether the
/// caller is the leader; `None` when the global map is unusable (a poisoned
/// lock), in which case coordination degrades to direct generation.
fn enter(key: &str) -> Option<(FlightCell, bool)> {
    let mut map = IN_FLIGHT.lock().ok()?;
    match map.get(key) {
        Some(cell) => Some((Arc::clone(cell), false)),
        None => {
            let cell: FlightCell = Arc::new(OnceCell::new());
            map.insert(key.to_string(), Arc::clone(&cell));
            Some((cell, true))
        }
    }
}

fn exit(key: &str) {
    if let Ok(mut map) = IN_FLIGHT.lock() {
        map.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn overlapping_calls_share_one_generation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let key = flight_key("test.pkg", "1.0.0", "a.json");

        let slow = {
            let calls = Arc::clone(&calls);
            let key = key.clone();
            async move {
                run::<_, _, std::convert::Infallible>(&key, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    Ok(json!({"winner": true}))
                })
                .await
            }
        };
        let fast = {
            let calls = Arc::clone(&calls);
            let key = key.clone();
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                run::<_, _, std::convert::Infallible>(&key, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"winner": false}))
                })
                .await
            }
        };

        let (a, b) = tokio::join!(tokio::spawn(slow), tokio::spawn(fast));
        assert_eq!(a.unwrap().unwrap(), json!({"winner": true}));
        assert_eq!(b.unwrap().unwrap(), json!({"winner": true}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_calls_generate_independently() {
        let key = flight_key("test.pkg", "1.0.0", "b.json");

        let first = run::<_, _, std::convert::Infallible>(&key, || async { Ok(json!(1)) })
            .await
            .unwrap();
        let second = run::<_, _, std::convert::Infallible>(&key, || async { Ok(json!(2)) })
            .await
            .unwrap();

        assert_eq!(first, json!(1));
        assert_eq!(second, json!(2));
    }

    #[tokio::test]
    async fn failed_leader_does_not_pin_the_key() {
        let key = flight_key("test.pkg", "1.0.0", "c.json");

        let failed = run::<_, _, String>(&key, || async { Err("boom".to_string()) }).await;
        assert!(failed.is_err());

        let ok = run::<_, _, String>(&key, || async { Ok(json!({"ok": true})) }).await;
        assert_eq!(ok.unwrap(), json!({"ok": true}));
    }
}
