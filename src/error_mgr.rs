use crate::config::Config;
use crate::host::{DiagnosticSink, StderrSink};
use crate::message::{format_into, MessageBuffer, MessageCode, MsgParm, JMSG_LENGTH_MAX};
use crate::{Error, Role};
use std::fmt;

/// 補助メモリ確保失敗時の "case" 番号
const AUX_MEMORY_CASE: i32 = 1;

/// 診断行の容量（接頭辞 + 区切り + メッセージ）
const LINE_CAPACITY: usize = 32 + JMSG_LENGTH_MAX;

pub type ErrorExitFn = fn(&mut ErrorManager) -> Error;
pub type EmitMessageFn = fn(&mut ErrorManager, i32);
pub type OutputMessageFn = fn(&mut ErrorManager);
pub type FormatMessageFn = fn(&ErrorManager, &mut MessageBuffer);
pub type ResetErrorMgrFn = fn(&mut ErrorManager);

/// コーデックのエラーコールバックテーブル
#[derive(Clone)]
pub struct ErrorTable {
    /// 致命的エラー。呼び出し元へ伝播させる `Error` を返す
    pub error_exit: ErrorExitFn,
    /// 警告 (level < 0) とトレース (level >= 0) の振り分け
    pub emit_message: EmitMessageFn,
    /// メッセージの実際の出力
    pub output_message: OutputMessageFn,
    pub format_message: FormatMessageFn,
    pub reset_error_mgr: ResetErrorMgrFn,
    pub trace_level: i32,
    pub num_warnings: u64,
    pub msg_code: MessageCode,
    pub msg_parm: MsgParm,
}

impl ErrorTable {
    /// ライブラリ標準のテーブル
    pub fn std() -> Self {
        ErrorTable {
            error_exit: std_error_exit,
            emit_message: std_emit_message,
            output_message: std_output_message,
            format_message: std_format_message,
            reset_error_mgr: std_reset_error_mgr,
            trace_level: 0,
            num_warnings: 0,
            msg_code: MessageCode::NoMessage,
            msg_parm: MsgParm::none(),
        }
    }
}

impl fmt::Debug for ErrorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorTable")
            .field("trace_level", &self.trace_level)
            .field("num_warnings", &self.num_warnings)
            .field("msg_code", &self.msg_code)
            .field("msg_parm", &self.msg_parm)
            .finish_non_exhaustive()
    }
}

/// 標準のerror_exit: メッセージを出力し `Error::Codec` を返す
pub fn std_error_exit(err: &mut ErrorManager) -> Error {
    let output = err.api.output_message;
    output(err);
    let message = err.formatted_message();
    Error::Codec {
        code: err.api.msg_code,
        message: message.as_str().to_string(),
    }
}

/// 標準のemit_message
///
/// 警告は最初の1件のみ出力（trace_level >= 3 なら全件）、
/// トレースは trace_level 以下のレベルのみ出力する。
pub fn std_emit_message(err: &mut ErrorManager, msg_level: i32) {
    let output = err.api.output_message;
    if msg_level < 0 {
        if err.api.num_warnings == 0 || err.api.trace_level >= 3 {
            output(err);
        }
        err.api.num_warnings += 1;
    } else if err.api.trace_level >= msg_level {
        output(err);
    }
}

/// 標準のoutput_message: 接頭辞なしで診断ストリームへ
pub fn std_output_message(err: &mut ErrorManager) {
    let message = err.formatted_message();
    err.sink.write_line(message.as_str());
}

pub fn std_format_message(err: &ErrorManager, buffer: &mut MessageBuffer) {
    format_into(err.api.msg_code, &err.api.msg_parm, buffer);
}

pub fn std_reset_error_mgr(err: &mut ErrorManager) {
    err.api.num_warnings = 0;
    err.api.msg_code = MessageCode::NoMessage;
}

/// ホスト側の致命的エラー処理
///
/// 固定長バッファにメッセージを整形し、ホストの例外に相当する
/// `Error::Fatal` を作る。後片付けはファイナライザに任せる。
pub fn host_error_exit(err: &mut ErrorManager) -> Error {
    let message = err.formatted_message();
    err.last = message.clone();
    tracing::debug!(
        role = ?err.role,
        code = ?err.api.msg_code,
        text = message.as_str(),
        "raising fatal JPEG condition"
    );
    Error::Fatal {
        role: err.role,
        code: err.api.msg_code,
        message: message.as_str().to_string(),
    }
}

/// ホスト側の警告出力。制御フローは中断しない
pub fn host_output_message(err: &mut ErrorManager) {
    let message = err.formatted_message();
    err.line.clear();
    err.line.push_str(err.role.message_prefix());
    err.line.push_str(": ");
    err.line.push_str(message.as_str());
    err.sink.write_line(&err.line);
    err.last = message;
}

/// セッション専用のエラーマネージャ
///
/// コールバックテーブルに加え、セッション終了まで保持される
/// 補助メモリとサイズ値を持つ。
pub struct ErrorManager {
    pub api: ErrorTable,
    role: Role,
    sink: Box<dyn DiagnosticSink>,
    line: String,
    last: MessageBuffer,
    mem: Option<Vec<u8>>,
    size: u64,
    aux_memory_limit: usize,
}

impl ErrorManager {
    /// 既定設定・標準エラー出力でエラーマネージャを作成
    pub fn new() -> Result<Box<Self>, Error> {
        Self::with_config(&Config::default(), Box::new(StderrSink))
    }

    /// エラーマネージャを作成し、error_exitとoutput_messageをホスト用に差し替える
    pub fn with_config(
        config: &Config,
        sink: Box<dyn DiagnosticSink>,
    ) -> Result<Box<Self>, Error> {
        // 警告出力で再確保しないよう診断行を先に確保
        let mut line = String::new();
        line.try_reserve_exact(LINE_CAPACITY)
            .map_err(|_| Error::ErrorManagerAlloc)?;

        let mut api = ErrorTable::std();
        api.trace_level = config.trace_level;
        api.error_exit = host_error_exit;
        api.output_message = host_output_message;

        tracing::debug!(trace_level = config.trace_level, "allocated JPEG error manager");
        Ok(Box::new(ErrorManager {
            api,
            role: Role::Decompress,
            sink,
            line,
            last: MessageBuffer::new(),
            mem: None,
            size: 0,
            aux_memory_limit: config.aux_memory_limit,
        }))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    /// 現在のメッセージをフォーマットした結果
    pub fn formatted_message(&self) -> MessageBuffer {
        let mut buffer = MessageBuffer::new();
        let format = self.api.format_message;
        format(self, &mut buffer);
        buffer
    }

    /// 最後に出力・送出したメッセージ
    pub fn last_message(&self) -> &str {
        self.last.as_str()
    }

    pub fn num_warnings(&self) -> u64 {
        self.api.num_warnings
    }

    /// 致命的エラーを発生させる。戻り値をそのまま呼び出し元へ返すこと
    pub fn fail(&mut self, code: MessageCode, parm: MsgParm) -> Error {
        self.api.msg_code = code;
        self.api.msg_parm = parm;
        let exit = self.api.error_exit;
        exit(self)
    }

    pub fn warn(&mut self, code: MessageCode, parm: MsgParm) {
        self.api.msg_code = code;
        self.api.msg_parm = parm;
        let emit = self.api.emit_message;
        emit(self, -1);
    }

    pub fn trace(&mut self, level: i32, code: MessageCode, parm: MsgParm) {
        self.api.msg_code = code;
        self.api.msg_parm = parm;
        let emit = self.api.emit_message;
        emit(self, level);
    }

    pub fn reset(&mut self) {
        let reset = self.api.reset_error_mgr;
        reset(self);
    }

    pub fn aux_memory(&self) -> Option<&[u8]> {
        self.mem.as_deref()
    }

    pub fn aux_memory_mut(&mut self) -> Option<&mut Vec<u8>> {
        self.mem.as_mut()
    }

    /// 補助メモリを設定する。以前のメモリがあれば返す
    pub fn set_aux_memory(&mut self, mem: Vec<u8>) -> Option<Vec<u8>> {
        self.mem.replace(mem)
    }

    pub fn take_aux_memory(&mut self) -> Option<Vec<u8>> {
        self.mem.take()
    }

    /// 容量 `len` の空バッファを補助メモリとして確保し、サイズ値に `len` を記録
    ///
    /// 上限超過・確保失敗は "Insufficient memory" の致命的エラー。
    pub fn alloc_aux_memory(&mut self, len: usize) -> Result<&mut Vec<u8>, Error> {
        if len > self.aux_memory_limit {
            return Err(self.out_of_memory());
        }
        let mut mem = Vec::new();
        if mem.try_reserve_exact(len).is_err() {
            return Err(self.out_of_memory());
        }
        self.size = len as u64;
        Ok(self.mem.insert(mem))
    }

    /// 補助メモリとして使える最大バイト数
    pub fn aux_memory_limit(&self) -> usize {
        self.aux_memory_limit
    }

    /// 補助メモリ不足の致命的エラー
    pub(crate) fn out_of_memory(&mut self) -> Error {
        self.fail(MessageCode::OutOfMemory, MsgParm::ints(&[AUX_MEMORY_CASE]))
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }
}

impl fmt::Debug for ErrorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorManager")
            .field("api", &self.api)
            .field("role", &self.role)
            .field("aux_memory", &self.mem.as_ref().map(Vec::len))
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
