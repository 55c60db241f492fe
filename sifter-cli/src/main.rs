use clap::Parser;
use colored::Colorize;

use sifter_cli::cli::Cli;
use sifter_cli::error::CliError;
use sifter_cli::output::OutputWriter;
use sifter_cli::{logging, runner};

/// 실행은 끝났지만 최종 실패한 페이로드가 있을 때의 종료 코드
const EXIT_FINAL_FAILURES: i32 = 4;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn execute(cli: Cli) -> Result<i32, CliError> {
    let config = runner::load_config(&cli).await?;
    let writer = OutputWriter::new(cli.summary);

    if cli.list_plugins {
        writer.render(&runner::list_plugins(&config)?)?;
        return Ok(0);
    }

    logging::init_tracing(&config.general).map_err(|e| CliError::Config(e.to_string()))?;

    let summary = runner::run(&config).await?;
    writer.render(&summary)?;

    Ok(if summary.has_failures() {
        EXIT_FINAL_FAILURES
    } else {
        0
    })
}
