use std::{ fmt, path::PathBuf, time::{ Duration, Instant } };

use chrono::{ DateTime, Utc };
use serde_json::Value;

use crate::client::{ resolve_link, sessions_url, PageSource };
use crate::error::CollectError;
use crate::models::Entry;
use crate::progress::{ format_elapsed, Progress };
use crate::report::Reports;

/// 逐页拉取截止时间之后的会话，把符合条件的记录写入路由地址和私有地址报告
pub struct Collector<S: PageSource> {
    source: S,
    api_base: String,
    reports: Reports,
    progress: Progress,
    started: Instant,
    // 目前为止记录是否按时间从新到旧排列，只有确认如此才能提前结束
    newest_first: bool,
    last_seen: Option<DateTime<Utc>>,
}

/// 运行结束时打印的统计
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub pages: u64,
    pub records: u64,
    pub routed: u64,
    pub private: u64,
    pub errors: u64,
    pub non_ipv4: u64,
    pub out_of_window: u64,
    pub routed_path: PathBuf,
    pub private_path: PathBuf,
    pub elapsed: Duration,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Data collection complete.")?;
        writeln!(f, "Pages fetched: {}", self.pages)?;
        writeln!(f, "Total records processed: {}", self.records)?;
        writeln!(f, "IPv4 clients that can spoof routed addresses: {}", self.routed)?;
        writeln!(f, "IPv4 clients that can spoof private addresses: {}", self.private)?;
        writeln!(f, "Malformed records skipped: {}", self.errors)?;
        writeln!(f, "Non-IPv4 sessions skipped: {}", self.non_ipv4)?;
        writeln!(f, "Records older than the window: {}", self.out_of_window)?;
        writeln!(
            f,
            "Results saved to: {} and {}",
            self.routed_path.display(),
            self.private_path.display()
        )?;
        write!(f, "Total time: {}", format_elapsed(self.elapsed))
    }
}

impl<S: PageSource> Collector<S> {
    pub fn new(source: S, api_base: &str, reports: Reports, now: DateTime<Utc>, days: u32) -> Self {
        Self {
            source,
            api_base: api_base.to_string(),
            reports,
            progress: Progress::new(now, days),
            started: Instant::now(),
            newest_first: true,
            last_seen: None,
        }
    }

    pub async fn run(mut self) -> Result<Summary, CollectError> {
        let cutoff = self.progress.cutoff();
        let mut next = Some(sessions_url(&self.api_base, cutoff)?);
        let mut total_pages_logged = false;

        println!("Starting data collection from {} to present...", cutoff.format("%Y-%m-%d %H:%M:%S"));

        while let Some(url) = next.take() {
            let page = self.source.fetch(&url).await?;
            self.progress.pages += 1;

            if self.progress.pages == 1 {
                if let Some(total) = page.total_items {
                    log::info!("{} sessions match the window", total);
                }
            }
            if !total_pages_logged {
                if let Some(total) = page.last_page_number() {
                    log::info!("Estimated total pages: {}", total);
                    total_pages_logged = true;
                }
            }

            let link = page.next_url().map(str::to_string);
            let oldest = self.process_page(page.members, cutoff)?;
            self.reports.flush()?;

            log::debug!("window covered: {:.1}%", self.progress.covered() * 100.0);
            let eta = self.progress.tick(self.started.elapsed());
            println!("{}", self.progress.line(eta));

            if self.newest_first && oldest.is_some_and(|t| t < cutoff) {
                log::info!("reached records older than {}, stopping", cutoff);
                break;
            }
            next = match link {
                Some(link) => Some(resolve_link(&self.api_base, &link)?),
                None => None,
            };
        }

        Ok(Summary {
            pages: self.progress.pages,
            records: self.progress.records,
            routed: self.reports.routed.lines(),
            private: self.reports.private.lines(),
            errors: self.progress.errors,
            non_ipv4: self.progress.non_ipv4,
            out_of_window: self.progress.out_of_window,
            routed_path: self.reports.routed.path().to_path_buf(),
            private_path: self.reports.private.path().to_path_buf(),
            elapsed: self.started.elapsed(),
        })
    }

    /// 返回本页最旧的记录时间，没有可解析的记录时为 None
    fn process_page(
        &mut self,
        members: Vec<Value>,
        cutoff: DateTime<Utc>
    ) -> Result<Option<DateTime<Utc>>, CollectError> {
        let mut oldest: Option<DateTime<Utc>> = None;

        for value in members {
            self.progress.records += 1;
            let record = match Entry::from_json(value) {
                Ok(Entry::Record(record)) => record,
                Ok(Entry::NonIpv4) => {
                    self.progress.non_ipv4 += 1;
                    continue;
                }
                Err(e) => {
                    log::warn!("skipping malformed record: {}", e);
                    self.progress.errors += 1;
                    continue;
                }
            };

            let timestamp = record.timestamp.with_timezone(&Utc);
            oldest = Some(oldest.map_or(timestamp, |o| o.min(timestamp)));
            if self.last_seen.is_some_and(|prev| timestamp > prev) {
                if self.newest_first {
                    log::info!("sessions are not ordered newest first, following every page");
                }
                self.newest_first = false;
            }
            self.last_seen = Some(timestamp);
            self.progress.observe(&record.timestamp);

            if timestamp < cutoff {
                self.progress.out_of_window += 1;
                continue;
            }
            self.reports.append(&record)?;
        }

        self.progress.routed = self.reports.routed.lines();
        self.progress.private = self.reports.private.lines();
        Ok(oldest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionPage;
    use crate::report::Classifier;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::path::Path;
    use tempfile::TempDir;

    const API: &str = "https://api.spoofer.caida.org";
    const EXAMPLE_LINE: &str =
        "Session: https://spoofer.caida.org/report.php?sessionid=887477, ASN4 number: 12222, Client4: 88.221.209.0/24, Country: pol, Privatespoof: rewritten, Routedspoof: rewritten, Timestamp: 2020-05-01T00:00:12+00:00";

    /// 按顺序返回预先准备的分页，并记录请求过的地址
    struct FixturePages {
        pages: VecDeque<Result<SessionPage, CollectError>>,
        requested: Vec<String>,
    }

    impl FixturePages {
        fn new(pages: Vec<Value>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .map(|p| Ok(serde_json::from_value(p).unwrap()))
                    .collect(),
                requested: Vec::new(),
            }
        }

        fn failing_after(pages: Vec<Value>) -> Self {
            let mut source = Self::new(pages);
            source.pages.push_back(
                Err(CollectError::Decode { url: "fixture".into(), message: "not json".into() })
            );
            source
        }
    }

    impl PageSource for &mut FixturePages {
        async fn fetch(&mut self, url: &str) -> Result<SessionPage, CollectError> {
            self.requested.push(url.to_string());
            self.pages
                .pop_front()
                .unwrap_or_else(|| Err(CollectError::InvalidUrl(format!("unexpected fetch {}", url))))
        }
    }

    fn session(id: u64, private: Option<&str>, routed: Option<&str>, timestamp: &str) -> Value {
        json!({
            "session": id,
            "asn4": 12222,
            "client4": "88.221.209.0/24",
            "country": "pol",
            "privatespoof": private,
            "routedspoof": routed,
            "timestamp": timestamp
        })
    }

    fn example() -> Value {
        session(887477, Some("rewritten"), Some("rewritten"), "2020-05-01T00:00:12+00:00")
    }

    fn page(members: Vec<Value>, next: Option<&str>) -> Value {
        match next {
            Some(next) =>
                json!({
                "hydra:member": members,
                "hydra:view": { "hydra:next": next, "hydra:last": "/sessions?page=9" }
            }),
            None => json!({ "hydra:member": members }),
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2020-05-10T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn reports(dir: &Path) -> Reports {
        Reports::open(
            &dir.join("routed.txt"),
            &dir.join("private.txt"),
            None,
            Classifier::default()
        ).unwrap()
    }

    fn read(dir: &Path, name: &str) -> String {
        std::fs::read_to_string(dir.join(name)).unwrap()
    }

    #[tokio::test]
    async fn test_example_record_in_both_reports() {
        let dir = TempDir::new().unwrap();
        let mut source = FixturePages::new(vec![page(vec![example()], None)]);

        let summary = Collector::new(&mut source, API, reports(dir.path()), now(), 30)
            .run().await
            .unwrap();

        assert_eq!(read(dir.path(), "routed.txt"), format!("{}\n", EXAMPLE_LINE));
        assert_eq!(read(dir.path(), "private.txt"), format!("{}\n", EXAMPLE_LINE));
        assert_eq!(summary.records, 1);
        assert_eq!(summary.routed, 1);
        assert_eq!(summary.private, 1);
        assert_eq!(summary.errors, 0);
        assert_eq!(
            source.requested,
            vec![
                "https://api.spoofer.caida.org/sessions?timestamp%5Bafter%5D=2020-04-10T00%3A00%3A00Z"
            ]
        );
    }

    #[tokio::test]
    async fn test_records_split_by_outcome() {
        let dir = TempDir::new().unwrap();
        let mut source = FixturePages::new(
            vec![
                page(
                    vec![
                        session(1, Some("received"), None, "2020-05-09T00:00:00+00:00"),
                        session(2, None, Some("blocked"), "2020-05-08T00:00:00+00:00"),
                        session(3, None, None, "2020-05-07T00:00:00+00:00")
                    ],
                    None
                )
            ]
        );

        let summary = Collector::new(&mut source, API, reports(dir.path()), now(), 30)
            .run().await
            .unwrap();

        let private = read(dir.path(), "private.txt");
        let routed = read(dir.path(), "routed.txt");
        assert_eq!(private.lines().count(), 1);
        assert!(private.contains("sessionid=1,"));
        assert_eq!(routed.lines().count(), 1);
        assert!(routed.contains("sessionid=2,"));
        assert_eq!(summary.records, 3);
    }

    #[tokio::test]
    async fn test_follows_next_and_stops_at_cutoff() {
        let dir = TempDir::new().unwrap();
        let mut source = FixturePages::new(
            vec![
                page(
                    vec![session(1, Some("received"), None, "2020-05-09T00:00:00+00:00")],
                    Some("/sessions?page=2")
                ),
                page(
                    vec![
                        session(2, Some("received"), None, "2020-05-05T00:00:00+00:00"),
                        session(3, Some("received"), None, "2020-04-01T00:00:00+00:00")
                    ],
                    Some("/sessions?page=3")
                ),
                page(vec![session(4, Some("received"), None, "2020-03-01T00:00:00+00:00")], None)
            ]
        );

        let summary = Collector::new(&mut source, API, reports(dir.path()), now(), 7)
            .run().await
            .unwrap();

        assert_eq!(source.requested.len(), 2);
        assert_eq!(source.requested[1], "https://api.spoofer.caida.org/sessions?page=2");
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.out_of_window, 1);
        // 2020-05-05 在 7 天内，2020-04-01 不在
        let private = read(dir.path(), "private.txt");
        assert_eq!(private.lines().count(), 2);
        assert!(!private.contains("sessionid=3,"));
        assert!(!private.contains("sessionid=4,"));
    }

    #[tokio::test]
    async fn test_oldest_first_pages_are_all_followed() {
        let dir = TempDir::new().unwrap();
        let now = DateTime::parse_from_rfc3339("2020-05-10T12:00:00Z").unwrap().with_timezone(&Utc);
        let mut source = FixturePages::new(
            vec![
                page(
                    vec![
                        session(1, Some("received"), None, "2020-04-10T03:00:00+00:00"),
                        session(2, Some("received"), None, "2020-04-20T00:00:00+00:00")
                    ],
                    Some("/sessions?page=2")
                ),
                page(vec![session(3, Some("received"), None, "2020-05-09T00:00:00+00:00")], None)
            ]
        );

        let summary = Collector::new(&mut source, API, reports(dir.path()), now, 30)
            .run().await
            .unwrap();

        assert_eq!(source.requested.len(), 2);
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.out_of_window, 1);
        let private = read(dir.path(), "private.txt");
        assert_eq!(private.lines().count(), 2);
        assert!(!private.contains("sessionid=1,"));
        assert!(private.contains("sessionid=3,"));
    }

    #[tokio::test]
    async fn test_missing_timestamp_counted_not_written() {
        let dir = TempDir::new().unwrap();
        let mut broken = example();
        broken.as_object_mut().unwrap().remove("timestamp");
        let mut source = FixturePages::new(vec![page(vec![broken, example()], None)]);

        let summary = Collector::new(&mut source, API, reports(dir.path()), now(), 30)
            .run().await
            .unwrap();

        assert_eq!(summary.errors, 1);
        assert_eq!(summary.records, 2);
        assert_eq!(read(dir.path(), "routed.txt").lines().count(), 1);
        assert_eq!(read(dir.path(), "private.txt").lines().count(), 1);
    }

    #[tokio::test]
    async fn test_ipv6_only_sessions_skipped() {
        let dir = TempDir::new().unwrap();
        let mut v6 = example();
        v6["client4"] = Value::Null;
        let mut source = FixturePages::new(vec![page(vec![v6], None)]);

        let summary = Collector::new(&mut source, API, reports(dir.path()), now(), 30)
            .run().await
            .unwrap();

        assert_eq!(summary.non_ipv4, 1);
        assert_eq!(summary.errors, 0);
        assert!(read(dir.path(), "routed.txt").is_empty());
    }

    #[tokio::test]
    async fn test_rerun_is_byte_identical() {
        let fixture = || {
            vec![
                page(
                    vec![example(), session(5, Some("received"), Some("received"), "2020-05-02T10:00:00+02:00")],
                    Some("/sessions?page=2")
                ),
                page(vec![session(6, None, Some("rewritten"), "2020-04-20T00:00:00+00:00")], None)
            ]
        };
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();

        for dir in [&first, &second] {
            let mut source = FixturePages::new(fixture());
            Collector::new(&mut source, API, reports(dir.path()), now(), 30)
                .run().await
                .unwrap();
        }

        for name in ["routed.txt", "private.txt"] {
            assert_eq!(
                std::fs::read(first.path().join(name)).unwrap(),
                std::fs::read(second.path().join(name)).unwrap()
            );
        }
        assert_eq!(read(first.path(), "routed.txt").lines().count(), 3);
    }

    #[tokio::test]
    async fn test_fetch_error_aborts_after_flushing_earlier_pages() {
        let dir = TempDir::new().unwrap();
        let mut source = FixturePages::failing_after(
            vec![page(vec![example()], Some("/sessions?page=2"))]
        );

        let err = Collector::new(&mut source, API, reports(dir.path()), now(), 30)
            .run().await
            .unwrap_err();

        assert!(matches!(err, CollectError::Decode { .. }));
        assert_eq!(read(dir.path(), "routed.txt"), format!("{}\n", EXAMPLE_LINE));
    }

    #[tokio::test]
    async fn test_bad_next_link_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut source = FixturePages::new(vec![page(vec![example()], Some("sessions?page=2"))]);

        let err = Collector::new(&mut source, API, reports(dir.path()), now(), 30)
            .run().await
            .unwrap_err();

        assert!(matches!(err, CollectError::InvalidUrl(_)));
    }

    #[test]
    fn test_summary_text() {
        let summary = Summary {
            pages: 2,
            records: 60,
            routed: 3,
            private: 5,
            errors: 1,
            non_ipv4: 4,
            out_of_window: 0,
            routed_path: PathBuf::from("r.txt"),
            private_path: PathBuf::from("p.txt"),
            elapsed: Duration::from_secs(61),
        };
        let text = summary.to_string();
        assert!(text.starts_with("Data collection complete.\n"));
        assert!(text.contains("IPv4 clients that can spoof routed addresses: 3\n"));
        assert!(text.contains("Results saved to: r.txt and p.txt\n"));
        assert!(text.ends_with("Total time: 00:01:01"));
    }
}
