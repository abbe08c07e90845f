use tokio::runtime::Handle;

/// Spawns a future on the runtime owning the device.
#[inline]
pub fn spawn<O, F>(runtime: &Handle, future: F) -> tokio::task::JoinHandle<O>
where
    O: Send + 'static,
    F: std::future::Future<Output = O> + Send + 'static,
{
    runtime.spawn(future)
}

/// Runs a blocking closure on the runtime's blocking pool.
#[inline]
pub fn spawn_blocking<O, F>(runtime: &Handle, f: F) -> tokio::task::JoinHandle<O>
where
    O: Send + 'static,
    F: FnOnce() -> O + Send + 'static,
{
    runtime.spawn_blocking(f)
}

/// Drives the device until all submitted work has completed, so that pending
/// callbacks (work-done notifications, buffer mappings) fire.
#[inline]
pub fn poll(runtime: &Handle, device: wgpu::Device) {
    spawn_blocking(runtime, move || {
        if let Err(err) = device.poll(wgpu::PollType::Wait) {
            log::error!("failed to poll device: {err}");
        }
    });
}

pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;
