mod cli;
mod client;
mod collector;
mod error;
mod models;
mod progress;
mod report;

use std::process::ExitCode;

use chrono::Utc;
use clap::{ error::ErrorKind, CommandFactory, Parser };
use simple_logger::SimpleLogger;

use crate::cli::Args;
use crate::client::SpooferClient;
use crate::collector::Collector;
use crate::error::{ codes, exit_code, CollectError };
use crate::report::{ file_header, Classifier, Reports };

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            if e.kind() == ErrorKind::MissingRequiredArgument || e.kind() == ErrorKind::InvalidValue {
                // 缺少参数或参数值无效时，显示帮助信息
                let _ = Args::command().print_help();
            }
            let _ = e.print();
            return ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1));
        }
    };

    if let Err(e) = SimpleLogger::new().with_level(args.log_level()).init() {
        eprintln!("Error initialising logger: {}", e);
    }

    match run(&args).await {
        Ok(()) => ExitCode::from(codes::SUCCESS),
        Err(e) => {
            log::error!("collection stopped: {}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(args: &Args) -> Result<(), CollectError> {
    let now = Utc::now();
    let header = args.header.then(|| file_header(now, progress::window_start(now, args.days)));

    let reports = Reports::open(
        &args.routed_output,
        &args.private_output,
        header.as_deref(),
        Classifier::new(args.outcomes.clone())
    )?;
    let client = SpooferClient::new()?;

    let summary = Collector::new(client, &args.api_base, reports, now, args.days).run().await?;
    println!("\n{}", summary);
    Ok(())
}
