//! Scoped worker threads for independent trials

use std::panic;
use std::thread;

/// Apply `f` to every item, on one scoped thread per item when `parallel` is set.
/// Output order matches input order. Each call owns whatever state `f` builds.
pub fn map_scoped<T, R, F>(items: &[T], parallel: bool, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    if !parallel || items.len() < 2 {
        return items.iter().map(&f).collect();
    }

    thread::scope(|scope| {
        let f = &f;
        let handles: Vec<_> = items
            .iter()
            .map(|item| scope.spawn(move || f(item)))
            .collect();

        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(payload) => panic::resume_unwind(payload),
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_and_serial_agree() {
        let items: Vec<u64> = (1..=8).collect();
        let serial = map_scoped(&items, false, |x| x * x);
        let parallel = map_scoped(&items, true, |x| x * x);
        assert_eq!(serial, parallel);
        assert_eq!(parallel[7], 64);
    }
}
