use std::fmt::{self, Write};

/// フォーマット済みメッセージの最大長（終端分を含む）
pub const JMSG_LENGTH_MAX: usize = 200;

/// 文字列パラメータの最大長
pub const JMSG_STR_PARM_MAX: usize = 80;

/// コーデックのメッセージコード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCode {
    NoMessage,
    // 致命的エラー
    BadPrecision,
    BadState,
    BadStructure,
    BufferSize,
    EmptyImage,
    EncodeFailed,
    FileRead,
    ImageTooBig,
    InputEmpty,
    NoSoi,
    OutOfMemory,
    Unsupported,
    // トレース
    TraceSoi,
    TraceJfif,
    TraceSof,
    TraceSos,
    TraceEoi,
    // 警告
    JfifMajor,
    JpegEof,
    TrailingData,
}

impl MessageCode {
    /// printf形式のテンプレート
    pub fn template(self) -> &'static str {
        match self {
            MessageCode::NoMessage => "Bogus message code %d",
            MessageCode::BadPrecision => "Unsupported JPEG data precision %d",
            MessageCode::BadState => "Improper call to JPEG library in state %d",
            MessageCode::BadStructure => "Invalid JPEG file structure: %s",
            MessageCode::BufferSize => "Buffer passed to JPEG library is too small",
            MessageCode::EmptyImage => "Empty JPEG image (DNL not supported)",
            MessageCode::EncodeFailed => "JPEG encoder failed: %s",
            MessageCode::FileRead => "Input file read error",
            MessageCode::ImageTooBig => "Maximum supported image dimension is %u pixels",
            MessageCode::InputEmpty => "Empty input buffer",
            MessageCode::NoSoi => "Not a JPEG file: starts with 0x%02x 0x%02x",
            MessageCode::OutOfMemory => "Insufficient memory (case %d)",
            MessageCode::Unsupported => "Unsupported JPEG feature: %s",
            MessageCode::TraceSoi => "Start of Image",
            MessageCode::TraceJfif => "JFIF APP0 marker: version %d.%02d, density %dx%d  %d",
            MessageCode::TraceSof => {
                "Start Of Frame 0x%02x: width=%u, height=%u, components=%d"
            }
            MessageCode::TraceSos => "Start Of Scan: %d components",
            MessageCode::TraceEoi => "End Of Image",
            MessageCode::JfifMajor => "Warning: unknown JFIF revision number %d.%02d",
            MessageCode::JpegEof => "Premature end of JPEG file",
            MessageCode::TrailingData => {
                "Corrupt JPEG data: %u extraneous bytes after marker 0x%02x"
            }
        }
    }
}

/// メッセージのパラメータ（整数8個または文字列）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgParm {
    Ints([i32; 8]),
    Str(String),
}

impl Default for MsgParm {
    fn default() -> Self {
        MsgParm::Ints([0; 8])
    }
}

impl MsgParm {
    pub fn none() -> Self {
        MsgParm::default()
    }

    /// 先頭から整数パラメータを詰める（9個目以降は無視）
    pub fn ints(values: &[i32]) -> Self {
        let mut slots = [0; 8];
        for (slot, value) in slots.iter_mut().zip(values) {
            *slot = *value;
        }
        MsgParm::Ints(slots)
    }

    /// 文字列パラメータ（JMSG_STR_PARM_MAX - 1バイトで切り詰め）
    pub fn text(value: &str) -> Self {
        let mut end = value.len().min(JMSG_STR_PARM_MAX - 1);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        MsgParm::Str(value[..end].to_string())
    }

    fn int(&self, index: usize) -> i32 {
        match self {
            MsgParm::Ints(values) => values.get(index).copied().unwrap_or(0),
            MsgParm::Str(_) => 0,
        }
    }

    fn str(&self) -> &str {
        match self {
            MsgParm::Str(value) => value,
            MsgParm::Ints(_) => "",
        }
    }
}

/// 固定長のメッセージバッファ
///
/// 容量を超える書き込みは文字境界で切り詰められ、失敗しない。
#[derive(Clone)]
pub struct MessageBuffer {
    bytes: [u8; JMSG_LENGTH_MAX],
    len: usize,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        MessageBuffer {
            bytes: [0; JMSG_LENGTH_MAX],
            len: 0,
        }
    }
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len]).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl fmt::Write for MessageBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        // 終端文字の分を残す
        let room = JMSG_LENGTH_MAX - 1 - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

impl fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageBuffer").field(&self.as_str()).finish()
    }
}

/// テンプレートにパラメータを埋め込んでバッファに書き込む
///
/// 対応する変換指定: `%d` `%u` `%x` `%s` `%%`（`%02x` のようなゼロ埋め幅指定も可）
pub fn format_into(code: MessageCode, parm: &MsgParm, out: &mut MessageBuffer) {
    out.clear();
    let mut chars = code.template().chars().peekable();
    let mut next_int = 0;

    while let Some(c) = chars.next() {
        if c != '%' {
            let _ = out.write_char(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            let _ = out.write_char('%');
            continue;
        }

        let zero = chars.peek() == Some(&'0');
        if zero {
            chars.next();
        }
        let mut width = 0usize;
        while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width * 10 + digit as usize;
            chars.next();
        }

        let _ = match chars.next() {
            Some('d') => {
                let value = parm.int(next_int);
                next_int += 1;
                write_padded(out, value, width, zero)
            }
            Some('u') => {
                let value = parm.int(next_int) as u32;
                next_int += 1;
                write_padded(out, value, width, zero)
            }
            Some('x') => {
                let value = parm.int(next_int) as u32;
                next_int += 1;
                if zero {
                    write!(out, "{:0width$x}", value, width = width)
                } else {
                    write!(out, "{:width$x}", value, width = width)
                }
            }
            Some('s') => out.write_str(parm.str()),
            Some(other) => write!(out, "%{other}"),
            None => out.write_char('%'),
        };
    }
}

fn write_padded<T: fmt::Display>(
    out: &mut MessageBuffer,
    value: T,
    width: usize,
    zero: bool,
) -> fmt::Result {
    if zero {
        write!(out, "{:0width$}", value, width = width)
    } else {
        write!(out, "{:width$}", value, width = width)
    }
}
