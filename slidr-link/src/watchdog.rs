//! Transfer watchdog
//!
//! A single countdown that must be kicked at least once per window while a
//! transfer is active. Commands travel through one single-slot signal, so a
//! newer command replaces an older one that has not been seen yet:
//!
//! - `start` and `kick` both (re)arm the countdown with a fresh deadline
//! - `stop` disarms it
//!
//! A pending arm overwritten by a kick still arms, and a pending kick
//! overwritten by a stop still disarms, so the runner always ends up in the
//! state of the last call.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Feed {
    Kick,
    Stop,
}

/// Countdown guarding an active transfer
pub struct Watchdog<M: RawMutex> {
    feed: Signal<M, Feed>,
    window: Duration,
}

impl<M: RawMutex> Watchdog<M> {
    pub const fn new(window: Duration) -> Self {
        Self {
            feed: Signal::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Arm a fresh countdown
    pub fn start(&self) {
        self.feed.signal(Feed::Kick);
    }

    /// Push the deadline out by one window
    pub fn kick(&self) {
        self.feed.signal(Feed::Kick);
    }

    /// Disarm the countdown
    pub fn stop(&self) {
        self.feed.signal(Feed::Stop);
    }

    /// Wait until an armed countdown runs out
    ///
    /// Idles while disarmed. Returns once per expiry; the countdown is
    /// disarmed again on return, so each armed instance fires at most once.
    pub async fn expired(&self) {
        loop {
            // Disarmed: only an arm request wakes us up
            while self.feed.wait().await != Feed::Kick {}
            trace!("Watchdog armed");

            loop {
                match with_timeout(self.window, self.feed.wait()).await {
                    Ok(Feed::Kick) => continue,
                    Ok(Feed::Stop) => {
                        trace!("Watchdog stopped");
                        break;
                    }
                    Err(_) => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_futures::select::{select, Either};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embassy_time::{Instant, Timer};

    const WINDOW: Duration = Duration::from_millis(40);

    #[test]
    fn test_expires_without_kicks() {
        let watchdog = Watchdog::<NoopRawMutex>::new(WINDOW);
        watchdog.start();

        let began = Instant::now();
        block_on(watchdog.expired());
        assert!(began.elapsed() >= WINDOW);
    }

    #[test]
    fn test_kicks_keep_it_alive() {
        let watchdog = Watchdog::<NoopRawMutex>::new(WINDOW);
        watchdog.start();

        let result = block_on(select(watchdog.expired(), async {
            for _ in 0..5 {
                Timer::after_millis(15).await;
                watchdog.kick();
            }
        }));
        assert!(matches!(result, Either::Second(())));
    }

    #[test]
    fn test_stop_disarms() {
        let watchdog = Watchdog::<NoopRawMutex>::new(WINDOW);
        watchdog.start();

        let result = block_on(select(watchdog.expired(), async {
            Timer::after_millis(10).await;
            watchdog.stop();
            Timer::after_millis(120).await;
        }));
        assert!(matches!(result, Either::Second(())));
    }

    #[test]
    fn test_idle_until_started() {
        let watchdog = Watchdog::<NoopRawMutex>::new(WINDOW);

        let result = block_on(select(watchdog.expired(), Timer::after_millis(120)));
        assert!(matches!(result, Either::Second(())));
    }

    #[test]
    fn test_restart_after_stop() {
        let watchdog = Watchdog::<NoopRawMutex>::new(WINDOW);
        watchdog.start();
        watchdog.stop();
        watchdog.start();

        let began = Instant::now();
        block_on(watchdog.expired());
        assert!(began.elapsed() >= WINDOW);
    }
}
