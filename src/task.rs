use std::future::Future;
use tokio::task::JoinHandle;

/// Spawn a named background task.
///
/// `tokio::task::Builder::name` would let this name show up in
/// `tokio-console`, but it requires the `tokio_unstable` cfg; we fall back
/// to a plain `tokio::spawn` and keep the name only for log lines callers
/// choose to include themselves.
pub fn spawn_named<T, F>(_name: &str, future: F) -> JoinHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(future)
}
