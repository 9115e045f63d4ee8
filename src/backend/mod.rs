//! シートバックエンド
//!
//! コアは `SheetAccessor` しか知らない。ここではデータフォルダ内の
//! xlsxファイルをスプレッドシートとして扱う実装を提供する。

mod xlsx;

pub use xlsx::XlsxBackend;

use crate::config::Config;
use crate::error::Result;
use cram_sheets_common::SheetAccessor;
use std::sync::Arc;

/// 設定からバックエンドを開く
pub fn open_backend(config: &Config) -> Result<Arc<dyn SheetAccessor>> {
    let dir = config.data_dir()?;
    Ok(Arc::new(XlsxBackend::open(&dir)?))
}
