//! Deterministic broker names for OTS queues.

const STREAM_PREFIX: &str = "OTS_";
const SUBJECT_PREFIX: &str = "ots.v1.queue";

/// Name of the private reply queue of a test run.
pub fn testrun_queue(testrun_id: &str) -> String {
    format!("testrun_{testrun_id}")
}

/// JetStream stream backing `queue`.
pub fn stream_name(queue: &str) -> String {
    let body: String = queue
        .chars()
        .map(|c| match c {
            'a'..='z' => c.to_ascii_uppercase(),
            'A'..='Z' | '0'..='9' | '_' | '-' => c,
            _ => '_',
        })
        .collect();
    format!("{STREAM_PREFIX}{body}")
}

/// Subject the stream of `queue` listens on.
pub fn subject(queue: &str) -> String {
    let token: String = queue
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' | '\t' | '\n' | '\r' => '_',
            other => other,
        })
        .collect();
    format!("{SUBJECT_PREFIX}.{token}")
}
