//! Results of administrative commands

use std::fmt::{Display, Formatter};

use courier_common::time::format_timestamp;
use courier_queue::{FailedJob, Job, QueueStats};
use serde::Serialize;

/// A pending or reserved job (for list command)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub queue: String,
    pub job: String,
    pub to: String,
    pub subject: Option<String>,
    /// Number of reservations so far
    pub attempts: u32,
    /// Unix milliseconds
    pub enqueued_at: u64,
    /// Unix milliseconds before which the job is not reserved
    pub available_at: u64,
    /// Set while a worker holds the job
    pub reserved_at: Option<u64>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            queue: job.queue.clone(),
            job: job.payload.job.clone(),
            to: job.payload.to.clone(),
            subject: job.payload.subject.clone(),
            attempts: job.attempts,
            enqueued_at: job.enqueued_at,
            available_at: job.available_at,
            reserved_at: job.reserved_at,
        }
    }
}

impl Display for JobSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("ID:        {}\n", self.id))?;
        f.write_fmt(format_args!("Queue:     {}\n", self.queue))?;
        f.write_fmt(format_args!("Job:       {}\n", self.job))?;
        f.write_fmt(format_args!("To:        {}\n", self.to))?;
        if let Some(subject) = &self.subject {
            f.write_fmt(format_args!("Subject:   {subject}\n"))?;
        }
        f.write_fmt(format_args!("Attempts:  {}\n", self.attempts))?;
        f.write_fmt(format_args!(
            "Queued:    {}\n",
            format_timestamp(self.enqueued_at)
        ))?;
        if let Some(reserved_at) = self.reserved_at {
            f.write_fmt(format_args!(
                "Reserved:  {}\n",
                format_timestamp(reserved_at)
            ))
        } else {
            f.write_fmt(format_args!(
                "Available: {}\n",
                format_timestamp(self.available_at)
            ))
        }
    }
}

/// A failed job record (for failed command)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedSummary {
    pub id: String,
    pub queue: String,
    pub to: String,
    pub subject: Option<String>,
    pub attempts: u32,
    /// Message of the error that ended the job
    pub error: String,
    /// Unix milliseconds
    pub failed_at: u64,
}

impl From<&FailedJob> for FailedSummary {
    fn from(record: &FailedJob) -> Self {
        Self {
            id: record.job.id.to_string(),
            queue: record.job.queue.clone(),
            to: record.job.payload.to.clone(),
            subject: record.job.payload.subject.clone(),
            attempts: record.job.attempts,
            error: record.exception.clone(),
            failed_at: record.failed_at,
        }
    }
}

impl Display for FailedSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("ID:        {}\n", self.id))?;
        f.write_fmt(format_args!("Queue:     {}\n", self.queue))?;
        f.write_fmt(format_args!("To:        {}\n", self.to))?;
        if let Some(subject) = &self.subject {
            f.write_fmt(format_args!("Subject:   {subject}\n"))?;
        }
        f.write_fmt(format_args!("Attempts:  {}\n", self.attempts))?;
        f.write_fmt(format_args!("Error:     {}\n", self.error))?;
        f.write_fmt(format_args!(
            "Failed:    {}\n",
            format_timestamp(self.failed_at)
        ))
    }
}

/// Counts for one queue (for stats command)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub queue: String,
    #[serde(flatten)]
    pub stats: QueueStats,
}

/// Result of an administrative command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Report {
    Jobs(Vec<JobSummary>),
    Failed(Vec<FailedSummary>),
    Stats {
        queues: Vec<QueueSummary>,
        failed: usize,
    },
    /// Jobs moved back from the failed collection
    Retried(usize),
    /// Entries deleted by flush, clear or purge
    Removed(usize),
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jobs(jobs) if jobs.is_empty() => f.write_str("No jobs found\n"),
            Self::Jobs(jobs) => write_separated(f, jobs),
            Self::Failed(records) if records.is_empty() => f.write_str("No failed jobs!\n"),
            Self::Failed(records) => write_separated(f, records),
            Self::Stats { queues, failed } => {
                f.write_fmt(format_args!(
                    "{:<20} {:>8} {:>8} {:>8}\n",
                    "QUEUE", "PENDING", "DELAYED", "RESERVED"
                ))?;
                for summary in queues {
                    f.write_fmt(format_args!(
                        "{:<20} {:>8} {:>8} {:>8}\n",
                        summary.queue,
                        summary.stats.pending,
                        summary.stats.delayed,
                        summary.stats.reserved
                    ))?;
                }
                f.write_fmt(format_args!("\nFailed:    {failed}\n"))
            }
            Self::Retried(0) => f.write_str("No failed jobs to retry\n"),
            Self::Retried(count) => {
                f.write_fmt(format_args!("{count} failed job(s) pushed back onto their queue\n"))
            }
            Self::Removed(count) => f.write_fmt(format_args!("Removed {count} entries\n")),
        }
    }
}

fn write_separated<T: Display>(f: &mut Formatter<'_>, items: &[T]) -> std::fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            f.write_str("\n")?;
        }
        item.fmt(f)?;
    }
    f.write_fmt(format_args!("\nTotal: {}\n", items.len()))
}

#[cfg(test)]
mod tests {
    use courier_queue::MailPayload;
    use pretty_assertions::assert_eq;

    use super::*;

    fn job() -> Job {
        let mut job = Job::new(
            "emails",
            MailPayload::new("a@example.com").with_subject("Hi"),
            1_700_000_000_000,
        );
        job.attempts = 2;
        job
    }

    #[test]
    fn test_failed_summary_display() {
        let record = FailedJob::new(job(), "Connection refused", 1_700_000_060_000);
        let summary = FailedSummary::from(&record);
        let text = summary.to_string();

        assert!(text.contains("Queue:     emails\n"));
        assert!(text.contains("Subject:   Hi\n"));
        assert!(text.contains("Attempts:  2\n"));
        assert!(text.contains("Error:     Connection refused\n"));
        assert!(text.contains("Failed:    2023-11-14 22:14:20 UTC\n"));
    }

    #[test]
    fn test_job_summary_shows_reservation() {
        let mut job = job();
        let summary = JobSummary::from(&job);
        assert!(summary.to_string().contains("Available: 2023-11-14 22:13:20 UTC\n"));

        job.reserved_at = Some(1_700_000_001_000);
        let summary = JobSummary::from(&job);
        assert!(summary.to_string().contains("Reserved:  2023-11-14 22:13:21 UTC\n"));
    }

    #[test]
    fn test_empty_reports() {
        assert_eq!(Report::Jobs(Vec::new()).to_string(), "No jobs found\n");
        assert_eq!(Report::Failed(Vec::new()).to_string(), "No failed jobs!\n");
        assert_eq!(Report::Retried(0).to_string(), "No failed jobs to retry\n");
        assert_eq!(Report::Removed(3).to_string(), "Removed 3 entries\n");
    }

    #[test]
    fn test_stats_table() {
        let report = Report::Stats {
            queues: vec![QueueSummary {
                queue: "emails".to_string(),
                stats: QueueStats {
                    pending: 4,
                    delayed: 1,
                    reserved: 2,
                },
            }],
            failed: 3,
        };
        let text = report.to_string();
        assert!(text.starts_with("QUEUE "));
        assert!(text.contains("emails                      4        1        2\n"));
        assert!(text.ends_with("Failed:    3\n"));
    }

    #[test]
    fn test_list_total() {
        let text = Report::Jobs(vec![JobSummary::from(&job()), JobSummary::from(&job())]).to_string();
        assert!(text.ends_with("\nTotal: 2\n"));
        assert_eq!(text.matches("ID:").count(), 2);
    }
}
