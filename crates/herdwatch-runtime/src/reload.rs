//! Periodic configuration re-read.
//!
//! The config file is re-read on a fixed cadence and published on a watch
//! channel. Pipelines snapshot the current value per event, so a change
//! applies to the next opened event. A file that fails to parse or
//! validate keeps the previous config in effect.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use herdwatch_core::config::{self, Config};

pub fn spawn(
    path: PathBuf,
    interval: Duration,
    tx: watch::Sender<Arc<Config>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // interval fires immediately; the initial config is already loaded.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => match config::load(&path) {
                    Ok(new_config) => {
                        let changed = **tx.borrow() != new_config;
                        if changed {
                            tx.send_replace(Arc::new(new_config));
                            info!("configuration reloaded, applies to next event");
                        }
                    }
                    Err(e) => warn!("config reload failed, keeping previous: {e}"),
                },
            }
        }
    })
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BASE: &str = r#"
        [detection]
        save_threshold = 0.75

        [[sources]]
        id = "camera-1"
    "#;

    const UPDATED: &str = r#"
        [detection]
        save_threshold = 0.5

        [[sources]]
        id = "camera-1"
    "#;

    fn write_config(path: &std::path::Path, content: &str) {
        let mut f = std::fs::File::create(path).expect("create config");
        f.write_all(content.as_bytes()).expect("write config");
    }

    #[tokio::test]
    async fn publishes_changed_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("herdwatch.toml");
        write_config(&path, BASE);

        let initial = config::load(&path).expect("initial config");
        let (tx, mut rx) = watch::channel(Arc::new(initial));
        let cancel = CancellationToken::new();
        let handle = spawn(
            path.clone(),
            Duration::from_millis(20),
            tx,
            cancel.clone(),
        );

        write_config(&path, UPDATED);
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("reload within 2s")
            .expect("sender alive");
        assert!((rx.borrow().detection.save_threshold - 0.5).abs() < f64::EPSILON);

        cancel.cancel();
        handle.await.expect("join");
    }

    #[tokio::test]
    async fn invalid_file_keeps_previous_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("herdwatch.toml");
        write_config(&path, BASE);

        let initial = config::load(&path).expect("initial config");
        let (tx, rx) = watch::channel(Arc::new(initial));
        let cancel = CancellationToken::new();
        let handle = spawn(
            path.clone(),
            Duration::from_millis(20),
            tx,
            cancel.clone(),
        );

        // Both syntactically broken and semantically invalid files are
        // rejected; the published config keeps the original threshold.
        write_config(&path, "not valid toml [[[");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!((rx.borrow().detection.save_threshold - 0.75).abs() < f64::EPSILON);

        write_config(
            &path,
            r#"
            [detection]
            save_threshold = 7.5

            [[sources]]
            id = "camera-1"
            "#,
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!((rx.borrow().detection.save_threshold - 0.75).abs() < f64::EPSILON);

        cancel.cancel();
        handle.await.expect("join");
    }

    #[tokio::test]
    async fn unchanged_file_publishes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("herdwatch.toml");
        write_config(&path, BASE);

        let initial = config::load(&path).expect("initial config");
        let (tx, rx) = watch::channel(Arc::new(initial));
        let cancel = CancellationToken::new();
        let handle = spawn(
            path.clone(),
            Duration::from_millis(20),
            tx,
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!rx.has_changed().expect("sender alive"));

        cancel.cancel();
        handle.await.expect("join");
    }
}
