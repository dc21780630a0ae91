//! JPEGコーデックとホスト環境の間のエラー処理・リソース管理ブリッジ
//!
//! - コーデックの致命的エラーを [`Error::Fatal`] に変換し `?` で伝播
//! - 警告メッセージはホストの診断ストリーム ([`host::DiagnosticSink`]) に出力
//! - セッションに紐づくメモリはファイナライザで必ず一度だけ解放

pub mod compress;
pub mod config;
pub mod decompress;
pub mod error_mgr;
pub mod host;
pub mod jpeg;
pub mod message;
pub mod session;

pub use config::Config;
pub use error_mgr::{ErrorManager, ErrorTable};
pub use host::{DiagnosticSink, Handle, MemorySink, StderrSink};
pub use message::{MessageBuffer, MessageCode, MsgParm};
pub use session::{new_session, release_session, wrap_session, Codec, Session, Teardown};

use thiserror::Error;

/// セッションの種別（メッセージの接頭辞に使用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Decompress,
    Compress,
}

impl Role {
    /// 致命的エラーの接頭辞
    pub fn fatal_prefix(self) -> &'static str {
        match self {
            Role::Decompress => "JPEG decompression error",
            Role::Compress => "JPEG compression error",
        }
    }

    /// 警告メッセージの接頭辞
    pub fn message_prefix(self) -> &'static str {
        match self {
            Role::Decompress => "JPEG decompression",
            Role::Compress => "JPEG compression",
        }
    }
}

/// 8bitサンプルの色空間
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Grayscale,
    Rgb,
    Cmyk,
}

impl ColorSpace {
    /// 1ピクセルあたりのチャンネル数
    pub fn components(self) -> usize {
        match self {
            ColorSpace::Grayscale => 1,
            ColorSpace::Rgb => 3,
            ColorSpace::Cmyk => 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// コーデックの致命的エラー（ホスト側の例外に相当）
    #[error("{}: {}", .role.fatal_prefix(), .message)]
    Fatal {
        role: Role,
        code: MessageCode,
        message: String,
    },
    /// 標準のerror_exitが返すエラー
    #[error("JPEG library error: {message}")]
    Codec { code: MessageCode, message: String },
    /// エラーマネージャの確保に失敗
    #[error("Unable to allocate jpeg error management structure")]
    ErrorManagerAlloc,
    /// エラーマネージャが未設定のセッション
    #[error("No JPEG error manager attached to the session")]
    Detached,
    /// エラーマネージャの二重設定
    #[error("JPEG error manager is already attached to the session")]
    AlreadyAttached,
    /// 解放済みのハンドル
    #[error("JPEG session handle has already been released")]
    Released,
    /// I/Oエラー
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// エラーに含まれるコーデックのメッセージコード
    pub fn code(&self) -> Option<MessageCode> {
        match self {
            Error::Fatal { code, .. } | Error::Codec { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 接頭辞を除いたコーデックのメッセージ
    pub fn codec_message(&self) -> Option<&str> {
        match self {
            Error::Fatal { message, .. } | Error::Codec { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }
}
