use crate::error_mgr::ErrorManager;
use crate::message::{MessageCode, MsgParm};
use crate::session::{Codec, Session};
use crate::{ColorSpace, Error, Role};
use jpeg_encoder::{ColorType, Encoder};
use std::io::{self, Write};

/// JPEGで扱える最大の幅・高さ
pub const JPEG_MAX_DIMENSION: u32 = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Done,
    Destroyed,
}

impl State {
    fn code(self) -> i32 {
        match self {
            State::Start => 100,
            State::Done => 103,
            State::Destroyed => 0,
        }
    }
}

/// 圧縮コーデック
///
/// 出力先はエラーマネージャの補助メモリ（`set_mem_dest`）。
#[derive(Debug)]
pub struct Compress {
    width: u32,
    height: u32,
    color_space: ColorSpace,
    quality: u8,
    state: State,
}

impl Default for Compress {
    fn default() -> Self {
        Self::new()
    }
}

impl Compress {
    pub fn new() -> Self {
        Compress {
            width: 0,
            height: 0,
            color_space: ColorSpace::Rgb,
            quality: crate::config::DEFAULT_QUALITY,
            state: State::Start,
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == State::Destroyed
    }
}

impl Codec for Compress {
    fn role(&self) -> Role {
        Role::Compress
    }

    fn destroy(&mut self) {
        self.width = 0;
        self.height = 0;
        self.state = State::Destroyed;
    }
}

impl Session<Compress> {
    pub fn set_image(
        &mut self,
        width: u32,
        height: u32,
        color_space: ColorSpace,
    ) -> Result<(), Error> {
        let (codec, err) = self.parts()?;
        if codec.state == State::Destroyed {
            return Err(bad_state(err, codec.state));
        }
        codec.width = width;
        codec.height = height;
        codec.color_space = color_space;
        codec.state = State::Start;
        Ok(())
    }

    /// 品質は1-100に丸める
    pub fn set_quality(&mut self, quality: u8) {
        self.codec.quality = quality.clamp(1, 100);
    }

    /// 補助メモリを出力先として確保し、サイズ値に容量を記録する
    pub fn set_mem_dest(&mut self, size_hint: usize) -> Result<(), Error> {
        let err = self.error_manager_mut()?;
        err.alloc_aux_memory(size_hint)?;
        Ok(())
    }

    /// 画像を圧縮して出力先に書き込む
    ///
    /// 完了後、サイズ値は出力のバイト数になる。
    pub fn compress(&mut self, pixels: &[u8]) -> Result<(), Error> {
        let (codec, err) = self.parts()?;
        if codec.state == State::Destroyed {
            return Err(bad_state(err, codec.state));
        }
        if codec.width == 0 || codec.height == 0 {
            return Err(err.fail(MessageCode::EmptyImage, MsgParm::none()));
        }
        if codec.width > JPEG_MAX_DIMENSION || codec.height > JPEG_MAX_DIMENSION {
            return Err(err.fail(
                MessageCode::ImageTooBig,
                MsgParm::ints(&[JPEG_MAX_DIMENSION as i32]),
            ));
        }

        let expected = (codec.width as usize)
            .checked_mul(codec.height as usize)
            .and_then(|n| n.checked_mul(codec.color_space.components()));
        match expected {
            Some(len) if pixels.len() == len => {}
            _ => return Err(err.fail(MessageCode::BufferSize, MsgParm::none())),
        }

        let color_type = match codec.color_space {
            ColorSpace::Grayscale => ColorType::Luma,
            ColorSpace::Rgb => ColorType::Rgb,
            ColorSpace::Cmyk => ColorType::Cmyk,
        };

        let limit = err.aux_memory_limit();
        let (encoded, exceeded) = match err.aux_memory_mut() {
            Some(dest) => {
                dest.clear();
                let mut bounded = BoundedDest {
                    buf: dest,
                    limit,
                    exceeded: false,
                };
                let result = Encoder::new(&mut bounded, codec.quality).encode(
                    pixels,
                    codec.width as u16,
                    codec.height as u16,
                    color_type,
                );
                let encoded = result.map(|_| bounded.buf.len()).map_err(|e| e.to_string());
                (encoded, bounded.exceeded)
            }
            None => return Err(bad_state(err, codec.state)),
        };

        if exceeded {
            return Err(err.out_of_memory());
        }
        match encoded {
            Ok(len) => {
                err.set_size(len as u64);
                codec.state = State::Done;
                tracing::debug!(bytes = len, quality = codec.quality, "compressed JPEG image");
                Ok(())
            }
            Err(reason) => Err(err.fail(MessageCode::EncodeFailed, MsgParm::text(&reason))),
        }
    }

    /// 圧縮結果（補助メモリの内容）
    pub fn output(&mut self) -> Result<&[u8], Error> {
        let (codec, err) = self.parts()?;
        if codec.state != State::Done {
            return Err(bad_state(err, codec.state));
        }
        Ok(err.aux_memory().unwrap_or(&[]))
    }
}

/// 上限を超えて伸びない出力先
struct BoundedDest<'a> {
    buf: &'a mut Vec<u8>,
    limit: usize,
    exceeded: bool,
}

impl Write for BoundedDest<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let within = self
            .buf
            .len()
            .checked_add(data.len())
            .is_some_and(|total| total <= self.limit);
        if !within || self.buf.try_reserve(data.len()).is_err() {
            self.exceeded = true;
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "JPEG destination exceeds the memory limit",
            ));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn bad_state(err: &mut ErrorManager, state: State) -> Error {
    err.fail(MessageCode::BadState, MsgParm::ints(&[state.code()]))
}
