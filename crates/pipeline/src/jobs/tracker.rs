use anyhow::Result;
use common::db::AsyncDb;
use std::time::Instant;

/// Records a job run in `job_status`: running on start, idle or failed on finish.
pub struct JobTracker {
    db: AsyncDb,
    job_name: String,
    start_time: Instant,
}

impl JobTracker {
    pub async fn start(db: &AsyncDb, job_name: &str) -> Result<Self> {
        let name = job_name.to_string();
        db.call_named("job_tracker.start", move |conn| {
            conn.execute(
                "INSERT INTO job_status (job_name, status, last_run_at, updated_at)
                 VALUES (?1, 'running', datetime('now'), datetime('now'))
                 ON CONFLICT(job_name) DO UPDATE SET
                    status = 'running',
                    last_run_at = datetime('now'),
                    updated_at = datetime('now'),
                    last_error = NULL,
                    duration_ms = NULL",
                rusqlite::params![name],
            )?;
            Ok(())
        })
        .await?;

        Ok(Self {
            db: db.clone(),
            job_name: job_name.to_string(),
            start_time: Instant::now(),
        })
    }

    fn elapsed_ms(&self) -> i64 {
        i64::try_from(self.start_time.elapsed().as_millis()).unwrap_or(i64::MAX)
    }

    pub async fn success(self, metadata: serde_json::Value) -> Result<()> {
        let duration_ms = self.elapsed_ms();
        let name = self.job_name;
        let meta = metadata.to_string();
        self.db
            .call_named("job_tracker.success", move |conn| {
                conn.execute(
                    "UPDATE job_status SET
                        status = 'idle',
                        duration_ms = ?2,
                        metadata = ?3,
                        updated_at = datetime('now')
                     WHERE job_name = ?1",
                    rusqlite::params![name, duration_ms, meta],
                )?;
                Ok(())
            })
            .await
    }

    /// Marks the run failed. Metadata still records how far the run got.
    pub async fn fail(self, error: &str, metadata: serde_json::Value) -> Result<()> {
        let duration_ms = self.elapsed_ms();
        let name = self.job_name;
        let error = error.to_string();
        let meta = metadata.to_string();
        self.db
            .call_named("job_tracker.fail", move |conn| {
                conn.execute(
                    "UPDATE job_status SET
                        status = 'failed',
                        duration_ms = ?2,
                        last_error = ?3,
                        metadata = ?4,
                        updated_at = datetime('now')
                     WHERE job_name = ?1",
                    rusqlite::params![name, duration_ms, error, meta],
                )?;
                Ok(())
            })
            .await
    }
}
