use clap::Parser;
use cram_sheets::backend::{open_backend, XlsxBackend};
use cram_sheets::cli::{self, Cli, Commands};
use cram_sheets::config::Config;
use cram_sheets::handlers::Service;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 標準出力は応答専用。ログは標準エラーへ
    let default_filter = if cli.verbose { "cram_sheets=debug" } else { "cram_sheets=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load()?;
    if let Some(dir) = cli.data_dir.clone() {
        config.data_dir = Some(dir);
    }

    match cli.command {
        Commands::Exec { op, args, interactive } => {
            let service = Service::new(open_backend(&config)?, config);
            let response = cli::run_exec(&service, &op, &args, interactive)?;
            if !response.ok {
                std::process::exit(1);
            }
        }

        Commands::Serve => {
            let service = Arc::new(Service::new(open_backend(&config)?, config));
            cli::run_serve(service).await?;
        }

        Commands::Config { set_data_dir, show } => {
            if let Some(dir) = set_data_dir {
                config.set_data_dir(dir)?;
                println!("✔ データフォルダを設定しました");
            }

            if show || config.data_dir.is_none() {
                println!("設定:");
                println!("  データフォルダ: {}", config.data_dir()?.display());
                println!("  参考書マスター: {} / {}", config.books_master_id, config.books_sheet);
                println!("  生徒一覧: {} / {}", config.students_master_id, config.students_sheet);
                println!("  確定の有効期限: {}秒", config.preview_ttl_seconds);
                println!("  計画テキスト上限: {}文字", config.plan_text_max_length);
            }
        }

        Commands::Sheets => {
            let backend = XlsxBackend::open(&config.data_dir()?)?;
            let ids = backend.list_spreadsheets()?;
            println!("{} ({}件)", backend.dir().display(), ids.len());
            for id in ids {
                println!("  {}", id);
            }
        }
    }

    Ok(())
}
