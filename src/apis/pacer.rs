use std::time::Duration;
use tokio::sync::Mutex;

/// Fixed-window request pacer: after every `window` live requests, all callers
/// wait for `pause` before the next one goes out.
pub struct RequestPacer {
    window: u32,
    pause: Duration,
    count: Mutex<u32>,
}

impl RequestPacer {
    pub fn new(window: u32, pause: Duration) -> Self {
        Self {
            window: window.max(1),
            pause,
            count: Mutex::new(0),
        }
    }

    /// Count one request, sleeping while holding the lock once the window fills.
    pub async fn tick(&self) {
        let mut count = self.count.lock().await;
        *count += 1;
        if *count >= self.window {
            tracing::debug!("Request window of {} reached, pausing {:?}", self.window, self.pause);
            tokio::time::sleep(self.pause).await;
            *count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pauses_after_window() {
        let pacer = RequestPacer::new(3, Duration::from_secs(1));
        let start = tokio::time::Instant::now();
        pacer.tick().await;
        pacer.tick().await;
        assert!(start.elapsed() < Duration::from_millis(10));
        pacer.tick().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(*pacer.count.lock().await, 0);
    }
}
