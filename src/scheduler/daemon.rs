use std::time::Duration;

use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::scheduler::Scheduler;

/// 一定間隔で購読者全員のパイプラインを実行するデーモンを起動する。
///
/// 実際に送るかどうかは各実行の予定時刻ゲートが決める。
pub fn spawn_briefing_daemon(
    scheduler: Scheduler,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    BriefingDaemon {
        scheduler,
        interval,
        cancel,
    }
    .spawn()
}

struct BriefingDaemon {
    scheduler: Scheduler,
    interval: Duration,
    cancel: CancellationToken,
}

impl BriefingDaemon {
    fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        info!(
            interval_seconds = self.interval.as_secs(),
            roster = ?self.scheduler.roster_path(),
            "briefing daemon started"
        );

        loop {
            match self.scheduler.run_tick(&self.cancel).await {
                Ok(summary) => info!(
                    subscribers = summary.subscribers,
                    runs = summary.runs,
                    delivered = summary.delivered,
                    already_sent_today = summary.already_sent_today,
                    "briefing tick completed"
                ),
                Err(err) => error!(error = %err, "briefing tick failed"),
            }

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = sleep(self.interval) => {}
            }
        }

        info!("briefing daemon stopped");
    }
}
