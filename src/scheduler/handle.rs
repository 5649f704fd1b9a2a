use std::sync::atomic::{AtomicU64, Ordering};

/// Issues `{hostname}:{counter}` job handles, counting up from 1.
#[derive(Debug)]
pub struct JobHandleFactory {
    hostname: String,
    counter: AtomicU64,
}

impl JobHandleFactory {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn next_handle(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}:{}", self.hostname, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_sequential() {
        let factory = JobHandleFactory::new("broker-1");
        assert_eq!(factory.next_handle(), "broker-1:1");
        assert_eq!(factory.next_handle(), "broker-1:2");
    }
}
