use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Segment used when an upload carries no caller identifier
pub const ANONYMOUS_CALLER: &str = "anonymous";

/// Token in route slugs that stands for a path separator
pub const SLUG_SEPARATOR: &str = "__";

/// Strategy for deriving storage keys from request parameters
pub trait ObjectKeyPolicy: Send + Sync {
    /// Key for an uploaded part: `{dateBucket}/{callerId}_{timestamp}.{filename}`
    fn upload_key(&self, caller_id: Option<&str>, filename: &str, now: DateTime<Utc>) -> String;

    /// Key for a read request addressed by slug and filename
    fn read_key(&self, slug: &str, filename: &str) -> String;
}

/// Date-bucketed upload keys and `__`-encoded read slugs
#[derive(Debug, Default)]
pub struct DefaultKeyPolicy {
    last_stamp: AtomicI64,
}

impl DefaultKeyPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folder for uploads made at `now`
    pub fn date_bucket(now: DateTime<Utc>) -> String {
        now.format("%Y-%m-%d").to_string()
    }

    /// Epoch milliseconds, strictly increasing across calls on this policy
    fn next_stamp(&self, now: DateTime<Utc>) -> i64 {
        let wanted = now.timestamp_millis();
        let mut current = self.last_stamp.load(Ordering::Relaxed);
        loop {
            let next = wanted.max(current + 1);
            match self.last_stamp.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    fn caller_segment(caller_id: Option<&str>) -> String {
        match caller_id.map(str::trim).filter(|c| !c.is_empty()) {
            Some(caller) => caller.replace(['/', '\\'], "-"),
            None => ANONYMOUS_CALLER.to_string(),
        }
    }

    /// Drop any client-side directory components from a filename
    fn base_filename(filename: &str) -> &str {
        filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(filename)
    }
}

impl ObjectKeyPolicy for DefaultKeyPolicy {
    fn upload_key(&self, caller_id: Option<&str>, filename: &str, now: DateTime<Utc>) -> String {
        format!(
            "{}/{}_{}.{}",
            Self::date_bucket(now),
            Self::caller_segment(caller_id),
            self.next_stamp(now),
            Self::base_filename(filename)
        )
    }

    fn read_key(&self, slug: &str, filename: &str) -> String {
        let folder = slug.replace(SLUG_SEPARATOR, "/");
        if folder.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", folder.trim_end_matches('/'), filename)
        }
    }
}
