use crate::error::{CramError, Result};
use crate::handlers::Service;
use clap::{Parser, Subcommand};
use cram_sheets_common::{ApiError, ErrorCode, Response};
use dialoguer::Confirm;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "cram-sheets")]
#[command(about = "塾のスプレッドシート（参考書・生徒・プランナー）を操作するJSON API", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// データフォルダ（設定より優先）
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 操作を1回実行して結果のJSONを出力
    Exec {
        /// 操作名（例: books.find）
        #[arg(required = true)]
        op: String,

        /// 引数のJSON
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// プレビューが返ったらその場で確定するか尋ねる
        #[arg(short, long)]
        interactive: bool,
    },

    /// 標準入力から1行1リクエストのJSONを読み、1行ずつ応答する
    Serve,

    /// 設定を表示/編集
    Config {
        /// データフォルダを設定
        #[arg(long)]
        set_data_dir: Option<PathBuf>,

        /// 設定を表示
        #[arg(long)]
        show: bool,
    },

    /// データフォルダのスプレッドシート一覧
    Sheets,
}

fn print_response(response: &Response) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}

/// 1回分の実行。`interactive` ならプレビューの確定を尋ねる
pub fn run_exec(service: &Service, op: &str, args: &str, interactive: bool) -> Result<Response> {
    let mut args: Value = serde_json::from_str(args)?;
    let response = service.handle_json(&json!({ "op": op, "args": args }).to_string());
    print_response(&response)?;

    let token = response
        .data
        .as_ref()
        .filter(|d| d["requires_confirmation"] == json!(true))
        .and_then(|d| d["confirm_token"].as_str())
        .map(str::to_string);
    let Some(token) = token.filter(|_| interactive) else {
        return Ok(response);
    };

    let confirmed = Confirm::new()
        .with_prompt("この変更を確定しますか？")
        .default(false)
        .interact()
        .map_err(|e| CramError::Prompt(e.to_string()))?;
    if !confirmed {
        println!("中止しました");
        return Ok(response);
    }

    if let Some(obj) = args.as_object_mut() {
        obj.insert("confirm_token".into(), json!(token));
    }
    let confirmed = service.handle_json(&json!({ "op": op, "args": args }).to_string());
    print_response(&confirmed)?;
    Ok(confirmed)
}

/// NDJSONで標準入出力を回す
///
/// 各リクエストはブロッキングスレッドで処理する（シートの読み書きが同期のため）。
pub async fn run_serve(service: Arc<Service>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    info!("serve: 標準入力を待機");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let svc = Arc::clone(&service);
        let response = match tokio::task::spawn_blocking(move || svc.handle_json(&line)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "リクエスト処理スレッドが異常終了");
                Response::failure("unknown", &ApiError::new(ErrorCode::Uncaught, e.to_string()))
            }
        };
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }
    info!("serve: 入力終了");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use cram_sheets_common::sheet::grid_from_strs;
    use cram_sheets_common::MemoryBackend;

    #[test]
    fn test_cli_parses_exec() {
        let cli = Cli::parse_from(["cram-sheets", "exec", "books.find", "--args", r#"{"query":"青"}"#, "-v"]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Exec { op, args, interactive } => {
                assert_eq!(op, "books.find");
                assert!(args.contains("query"));
                assert!(!interactive);
            }
            _ => panic!("exec として解釈されていない"),
        }
    }

    #[test]
    fn test_run_exec_without_prompt() {
        let books = grid_from_strs(&[&["参考書ID", "参考書名", "教科"], &["gMB001", "青チャート", "数学"]]);
        let backend = MemoryBackend::new().with_sheet("books_master", "参考書マスター", books);
        let service = Service::new(Arc::new(backend), Config::default());

        let response = run_exec(&service, "books.get", r#"{"book_id":"gMB001"}"#, false).unwrap();
        assert!(response.ok);
        assert_eq!(response.data.unwrap()["book"]["title"], json!("青チャート"));

        // プレビューは非対話なら確定しない
        let response = run_exec(&service, "books.delete", r#"{"book_id":"gMB001"}"#, false).unwrap();
        assert_eq!(response.data.unwrap()["requires_confirmation"], json!(true));
        let still_there = run_exec(&service, "books.get", r#"{"book_id":"gMB001"}"#, false).unwrap();
        assert!(still_there.ok);
    }

    #[test]
    fn test_run_exec_bad_args_json() {
        let service = Service::new(Arc::new(MemoryBackend::new()), Config::default());
        assert!(run_exec(&service, "books.list", "{", false).is_err());
    }
}
