// src/notify.rs

//! Status-change notifications.

use tracing::info;

use crate::dag::{Job, Status};

/// One status change worth telling someone about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusNotification {
    pub expid: String,
    pub job: String,
    pub from: Status,
    pub to: Status,
    pub recipients: Vec<String>,
}

/// Fire-and-forget delivery; failures stay inside the notifier.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &StatusNotification);
}

/// Whether `job` asked to hear about reaching `to`.
pub fn wants_notification(job: &Job, to: Status) -> bool {
    job.notify_on.contains(&to)
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: &StatusNotification) {
        info!(
            target: "expflow::notify",
            expid = %n.expid,
            job = %n.job,
            from = %n.from,
            to = %n.to,
            recipients = ?n.recipients,
            "job status changed"
        );
    }
}
