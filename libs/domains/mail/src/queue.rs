use job_queue::QueueDef;

/// Outbound mail queue.
pub struct MailQueue;

impl QueueDef for MailQueue {
    const QUEUE_NAME: &'static str = "mail";
    const KEY_PREFIX: &'static str = "courier:{mail}";
}
