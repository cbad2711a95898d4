use std::{ fs::{ File, OpenOptions }, io::{ BufWriter, Write }, path::{ Path, PathBuf } };

use chrono::{ DateTime, Utc };

use crate::error::CollectError;
use crate::models::SpoofRecord;

static SESSION_REPORT_URL: &str = "https://spoofer.caida.org/report.php?sessionid=";
static NOT_AVAILABLE: &str = "N/A";

pub fn format_line(record: &SpoofRecord) -> String {
    format!(
        "Session: {}{}, ASN4 number: {}, Client4: {}, Country: {}, Privatespoof: {}, Routedspoof: {}, Timestamp: {}",
        SESSION_REPORT_URL,
        record.session,
        record.asn4.as_deref().unwrap_or(NOT_AVAILABLE),
        record.client4,
        record.country.as_deref().unwrap_or(NOT_AVAILABLE),
        record.privatespoof.as_deref().unwrap_or(NOT_AVAILABLE),
        record.routedspoof.as_deref().unwrap_or(NOT_AVAILABLE),
        record.timestamp_raw
    )
}

pub fn file_header(collected_at: DateTime<Utc>, cutoff: DateTime<Utc>) -> String {
    format!(
        "# IPv4 clients that can spoof - Data from CAIDA Spoofer API\n\
         # Collection date: {}\n\
         # Data period: {} to present\n\
         # Format: Formatted text\n\n",
        collected_at.format("%Y-%m-%d %H:%M:%S"),
        cutoff.format("%Y-%m-%d")
    )
}

/// 判断记录应写入哪个报告
///
/// 未指定 outcome 时任何非空结果都符合，否则必须与其中之一完全相同。
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    outcomes: Vec<String>,
}

impl Classifier {
    pub fn new(outcomes: Vec<String>) -> Self {
        Self { outcomes }
    }

    fn qualifies(&self, outcome: Option<&str>) -> bool {
        match outcome {
            None => false,
            Some(o) if o.is_empty() => false,
            Some(o) => self.outcomes.is_empty() || self.outcomes.iter().any(|w| w == o),
        }
    }

    pub fn routed(&self, record: &SpoofRecord) -> bool {
        self.qualifies(record.routedspoof.as_deref())
    }

    pub fn private(&self, record: &SpoofRecord) -> bool {
        self.qualifies(record.privatespoof.as_deref())
    }
}

/// 一个只追加的文本报告文件
pub struct ReportFile {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: u64,
}

impl ReportFile {
    /// 以追加方式打开，文件或文件夹不存在时创建。只有空文件才写入 `header`
    pub fn open(path: &Path, header: Option<&str>) -> Result<Self, CollectError> {
        let io_err = |source| CollectError::Report { path: path.to_path_buf(), source };

        // 文件夹不存在就创建
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path).map_err(io_err)?;
        let is_empty = file.metadata().map_err(io_err)?.len() == 0;
        let mut writer = BufWriter::new(file);
        if let (Some(header), true) = (header, is_empty) {
            writer.write_all(header.as_bytes()).map_err(io_err)?;
        }

        Ok(Self { path: path.to_path_buf(), writer, lines: 0 })
    }

    pub fn write_record(&mut self, record: &SpoofRecord) -> Result<(), CollectError> {
        writeln!(self.writer, "{}", format_line(record)).map_err(|source| CollectError::Report {
            path: self.path.clone(),
            source,
        })?;
        self.lines += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), CollectError> {
        self.writer.flush().map_err(|source| CollectError::Report {
            path: self.path.clone(),
            source,
        })
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// 一次运行的路由地址报告和私有地址报告
pub struct Reports {
    pub routed: ReportFile,
    pub private: ReportFile,
    classifier: Classifier,
}

impl Reports {
    pub fn open(
        routed_path: &Path,
        private_path: &Path,
        header: Option<&str>,
        classifier: Classifier
    ) -> Result<Self, CollectError> {
        Ok(Self {
            routed: ReportFile::open(routed_path, header)?,
            private: ReportFile::open(private_path, header)?,
            classifier,
        })
    }

    /// 写入所有符合条件的报告
    pub fn append(&mut self, record: &SpoofRecord) -> Result<(), CollectError> {
        if self.classifier.private(record) {
            self.private.write_record(record)?;
        }
        if self.classifier.routed(record) {
            self.routed.write_record(record)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), CollectError> {
        self.routed.flush()?;
        self.private.flush()
    }
}
