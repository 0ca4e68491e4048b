use std::time::Duration;
use tokio::sync::watch;

pub type ShutdownRx = watch::Receiver<bool>;

pub fn channel() -> (watch::Sender<bool>, ShutdownRx) {
    watch::channel(false)
}

/// Resolves once shutdown is requested or the sender is gone.
pub async fn wait(shutdown: &mut ShutdownRx) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Sleeps for `duration`; returns `true` if shutdown fired first.
pub async fn sleep_or_shutdown(duration: Duration, shutdown: &mut ShutdownRx) -> bool {
    tokio::select! {
        _ = wait(shutdown) => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

pub fn next_backoff(current: Duration) -> Duration {
    let next = current + current;
    if next > Duration::from_secs(10) {
        Duration::from_secs(10)
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = Duration::from_secs(1);
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(backoff.as_secs());
            backoff = next_backoff(backoff);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 10, 10]);
    }

    #[tokio::test]
    async fn sleep_is_cut_short_by_shutdown() {
        let (tx, mut rx) = channel();
        let waiter = tokio::spawn(async move {
            sleep_or_shutdown(Duration::from_secs(30), &mut rx).await
        });
        tx.send(true).expect("send shutdown");
        let interrupted = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter finished")
            .expect("join");
        assert!(interrupted);
    }

    #[tokio::test]
    async fn dropped_sender_counts_as_shutdown() {
        let (tx, mut rx) = channel();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), wait(&mut rx))
            .await
            .expect("wait resolves");
    }

    #[tokio::test]
    async fn sleep_completes_without_shutdown() {
        let (_tx, mut rx) = channel();
        assert!(!sleep_or_shutdown(Duration::from_millis(10), &mut rx).await);
    }
}
