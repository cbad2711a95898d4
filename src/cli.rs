use std::path::PathBuf;

use clap::{ ArgAction, Parser };
use log::LevelFilter;

pub static DEFAULT_API_BASE: &str = "https://api.spoofer.caida.org";

/// 本工具从 CAIDA Spoofer API 下载最近一段时间的 IPv4 测试结果，
/// 分别输出能伪造路由地址和私有地址的客户端列表。
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// 回溯的天数 (1 到 36500)
    #[arg(long, default_value_t = 365, value_parser = clap::value_parser!(u32).range(1..=36500))]
    pub days: u32,

    /// 路由地址伪造结果的输出文件
    #[arg(long, default_value = "ipv4_routed_spoofers.txt")]
    pub routed_output: PathBuf,

    /// 私有地址伪造结果的输出文件
    #[arg(long, default_value = "ipv4_private_spoofers.txt")]
    pub private_output: PathBuf,

    /// CAIDA Spoofer API 的基础地址
    #[arg(long, default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// 只保留这些测试结果（可重复，例如 --outcome received），不指定则保留所有非空结果
    #[arg(long = "outcome", action = ArgAction::Append)]
    pub outcomes: Vec<String>,

    /// 新建的输出文件写入 # 开头的文件头
    #[arg(long, default_value_t = false)]
    pub header: bool,

    /// 日志详细程度，-v 为 info，-vv 为 debug
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        }
    }
}
