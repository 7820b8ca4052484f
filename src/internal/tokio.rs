use std::future::Future;

use tokio::task::JoinHandle;

pub fn spawn_named<F, T>(_name: &str, future: F) -> JoinHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    #[cfg(tokio_unstable)]
    let handle = tokio::task::Builder::new()
        .name(&format!("shardhost::{_name}"))
        .spawn(future)
        .expect("called outside tokio runtime");
    #[cfg(not(tokio_unstable))]
    let handle = tokio::spawn(future);
    handle
}
