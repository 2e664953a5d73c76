//! Thin wrapper around the async runtime's task spawning, mirroring the
//! teacher's `bft::async_runtime::tokio` module.

use std::future::Future;

pub type JoinHandle<T> = tokio::task::JoinHandle<T>;

pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future)
}
