//! cram-sheets
//!
//! 参考書マスター・生徒一覧・学習プランナーのスプレッドシートを
//! `{"op", "args"}` 形式のJSON操作として公開する。

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod router;

pub use config::Config;
pub use error::{CramError, Result};
pub use handlers::Service;
pub use router::Request;
