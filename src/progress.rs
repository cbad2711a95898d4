use std::{ fmt, time::Duration };

use chrono::{ DateTime, FixedOffset, TimeDelta, Utc };

/// 预计剩余时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eta {
    Calculating,
    Remaining(Duration),
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = match self {
            Eta::Calculating => {
                return write!(f, "Calculating...");
            }
            Eta::Remaining(d) => d.as_secs(),
        };
        if secs < 60 {
            write!(f, "{} seconds", secs)
        } else if secs < 3600 {
            write!(f, "{} minutes", secs / 60)
        } else {
            write!(f, "{} hours, {} minutes", secs / 3600, (secs % 3600) / 60)
        }
    }
}

/// 以 `now` 结束、长度为 `days` 天的时间窗口的起点，即截止时间
pub fn window_start(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now - TimeDelta::days(i64::from(days))
}

pub fn format_elapsed(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// 一次采集的计数和时间窗口覆盖进度
///
/// 窗口从 `now` 往回 `days` 天。已见到的最旧时间戳决定窗口已覆盖的比例。
#[derive(Debug)]
pub struct Progress {
    now: DateTime<Utc>,
    cutoff: DateTime<Utc>,
    window: TimeDelta,
    covered: f64,
    elapsed: Duration,
    last_eta: Option<Duration>,

    pub pages: u64,
    pub records: u64,
    pub routed: u64,
    pub private: u64,
    pub errors: u64,
    pub non_ipv4: u64,
    pub out_of_window: u64,
}

impl Progress {
    pub fn new(now: DateTime<Utc>, days: u32) -> Self {
        Self {
            now,
            cutoff: window_start(now, days),
            window: TimeDelta::days(i64::from(days)),
            covered: 0.0,
            elapsed: Duration::ZERO,
            last_eta: None,
            pages: 0,
            records: 0,
            routed: 0,
            private: 0,
            errors: 0,
            non_ipv4: 0,
            out_of_window: 0,
        }
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }

    /// 已覆盖的窗口比例，范围 `[0, 1]`
    pub fn covered(&self) -> f64 {
        self.covered
    }

    /// 记录已处理到的时间戳
    pub fn observe(&mut self, timestamp: &DateTime<FixedOffset>) {
        let window_ms = self.window.num_milliseconds() as f64;
        if window_ms <= 0.0 {
            return;
        }
        let age = (self.now - timestamp.with_timezone(&Utc)).num_milliseconds() as f64;
        let fraction = (age / window_ms).clamp(0.0, 1.0);
        if fraction > self.covered {
            self.covered = fraction;
        }
    }

    /// ETA = elapsed / covered * (1 - covered)。耗时不回退，预计剩余时间不增加
    pub fn tick(&mut self, elapsed: Duration) -> Eta {
        self.elapsed = self.elapsed.max(elapsed);
        if self.covered <= 0.0 {
            return Eta::Calculating;
        }
        let secs = (self.elapsed.as_secs_f64() / self.covered) * (1.0 - self.covered);
        let mut remaining = Duration::from_secs_f64(secs.max(0.0));
        if let Some(last) = self.last_eta {
            remaining = remaining.min(last);
        }
        self.last_eta = Some(remaining);
        Eta::Remaining(remaining)
    }

    pub fn line(&self, eta: Eta) -> String {
        format!(
            "Page {} | Processed: {} | Routed: {} | Private: {} | Errors: {} | Elapsed: {} | ETA: {}",
            self.pages,
            self.records,
            self.routed,
            self.private,
            self.errors,
            format_elapsed(self.elapsed),
            eta
        )
    }
}
