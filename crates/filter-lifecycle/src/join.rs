use std::thread::JoinHandle;

/// Joins `join` on a short-lived helper thread so the caller never blocks on it.
pub(crate) fn detach_join(join: JoinHandle<()>, joiner_name: &str) {
    let _ = std::thread::Builder::new()
        .name(joiner_name.to_string())
        .spawn(move || {
            let _ = join.join();
        });
}
