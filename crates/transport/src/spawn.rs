use std::future::Future;
use std::sync::OnceLock;

use tokio::task::JoinHandle;

fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(1)
			.thread_name("tether-global")
			.build()
			.expect("failed to build tether global tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns a message pump or timer task.
///
/// Runs on the current Tokio runtime when there is one, otherwise on a small shared
/// fallback runtime, so endpoints and ports can be created from plain threads.
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	runtime_handle().spawn(fut)
}
