/// Store keys derived from a queue name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    /// Items waiting for their fire time (score = `at`).
    pub ready: String,
    /// In-flight items (score = claim time) and dead items (score = 0).
    pub retry: String,
    /// Lease key serializing retry compaction across instances.
    pub lock: String,
}

impl QueueKeys {
    pub fn new(name: &str) -> Self {
        let retry = format!("{name}:retry");
        Self {
            ready: name.to_string(),
            lock: format!("{retry}:lock"),
            retry,
        }
    }
}
