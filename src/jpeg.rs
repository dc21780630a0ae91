//! JPEGの読み込み・書き出し
//!
//! 各関数はセッションを一つ作り、終了時（エラー時を含む）にハンドルの破棄で解放する。
//! メッセージの接頭辞はセッションの種別で決まる。
//!
//! | 種別 | 致命的エラー | 警告・トレース |
//! |---|---|---|
//! | 読み込み | `JPEG decompression error: ...` | `JPEG decompression: ...` |
//! | 書き出し | `JPEG compression error: ...` | `JPEG compression: ...` |

use crate::compress::Compress;
use crate::config::Config;
use crate::decompress::{Decompress, Header};
use crate::host::{DiagnosticSink, StderrSink};
use crate::session::new_session;
use crate::{ColorSpace, Error};
use std::path::Path;

/// 出力先バッファ見積もりの最小値
const MIN_DEST_HINT: usize = 1024;

/// JPEGの読み込み元
#[derive(Debug, Clone, Copy)]
pub enum Source<'a> {
    Bytes(&'a [u8]),
    File(&'a Path),
}

impl Source<'_> {
    fn load(self) -> Result<Vec<u8>, Error> {
        match self {
            Source::Bytes(data) => Ok(data.to_vec()),
            Source::File(path) => Ok(std::fs::read(path)?),
        }
    }
}

/// インターリーブされた8bit画像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub color_space: ColorSpace,
    pub data: Vec<u8>,
}

impl Image {
    pub fn channels(&self) -> usize {
        self.color_space.components()
    }
}

/// JPEG画像を読み込みます
///
/// 警告は標準エラー出力へ。
pub fn read_jpeg(source: Source<'_>, config: &Config) -> Result<Image, Error> {
    read_jpeg_with_sink(source, config, Box::new(StderrSink))
}

/// JPEG画像を読み込みます（警告の出力先を指定）
///
/// # Details
/// - 致命的エラーは `Error::Fatal` として返る
/// - どの経路で抜けてもセッションはハンドルの破棄で解放される
pub fn read_jpeg_with_sink(
    source: Source<'_>,
    config: &Config,
    sink: Box<dyn DiagnosticSink>,
) -> Result<Image, Error> {
    let data = source.load()?;
    let mut handle = new_session(Decompress::new(), config, sink)?;
    let session = handle.get_mut()?;

    session.set_source(data)?;
    let header = session.read_header()?;
    let pixels = session.decompress()?;

    handle.close();
    Ok(Image {
        width: header.width,
        height: header.height,
        color_space: header.color_space,
        data: pixels,
    })
}

/// JPEG画像のヘッダーのみを読み込みます
pub fn read_jpeg_header(source: Source<'_>, config: &Config) -> Result<Header, Error> {
    read_jpeg_header_with_sink(source, config, Box::new(StderrSink))
}

/// JPEG画像のヘッダーのみを読み込みます（警告の出力先を指定）
pub fn read_jpeg_header_with_sink(
    source: Source<'_>,
    config: &Config,
    sink: Box<dyn DiagnosticSink>,
) -> Result<Header, Error> {
    let data = source.load()?;
    let mut handle = new_session(Decompress::new(), config, sink)?;
    let session = handle.get_mut()?;
    session.set_source(data)?;
    let header = session.read_header()?;
    Ok(header)
}

/// JPEG画像を書き出します
pub fn write_jpeg(image: &Image, config: &Config) -> Result<Vec<u8>, Error> {
    write_jpeg_with_sink(image, config, Box::new(StderrSink))
}

/// JPEG画像を書き出します（警告の出力先を指定）
pub fn write_jpeg_with_sink(
    image: &Image,
    config: &Config,
    sink: Box<dyn DiagnosticSink>,
) -> Result<Vec<u8>, Error> {
    let mut handle = new_session(Compress::new(), config, sink)?;
    let session = handle.get_mut()?;

    session.set_image(image.width, image.height, image.color_space)?;
    session.set_quality(config.quality);
    // 生データの1/4程度を見積もり、上限内に収める
    let hint = (image.data.len() / 4)
        .max(MIN_DEST_HINT)
        .min(config.aux_memory_limit);
    session.set_mem_dest(hint)?;
    session.compress(&image.data)?;

    let output = session.output()?.to_vec();
    Ok(output)
}
