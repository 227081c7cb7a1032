use chrono::{DateTime, SecondsFormat, Utc};

// created/modified 时间戳来源
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn timestamp(&self) -> String {
        self.now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// 固定时间，用于可复现的文档和测试
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_formats_rfc3339() {
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap());
        assert_eq!(clock.timestamp(), "2024-03-01T08:30:00Z");
    }
}
