use crate::error_mgr::ErrorManager;
use crate::message::{MessageCode, MsgParm};
use crate::session::{Codec, Session};
use crate::{ColorSpace, Error, Role};
use jpeg_decoder::{CodingProcess, Decoder, PixelFormat};
use std::borrow::Cow;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const MARKER_EOI: u8 = 0xD9;
const MARKER_SOS: u8 = 0xDA;
const MARKER_APP0: u8 = 0xE0;

/// JFIF APP0の内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jfif {
    pub major: u8,
    pub minor: u8,
    pub units: u8,
    pub x_density: u16,
    pub y_density: u16,
}

/// ヘッダー読み込みの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub width: u32,
    pub height: u32,
    pub components: u8,
    pub color_space: ColorSpace,
    pub progressive: bool,
    pub jfif: Option<Jfif>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Source,
    Header,
    Done,
    Destroyed,
}

impl State {
    /// BadStateメッセージ用の状態番号
    fn code(self) -> i32 {
        match self {
            State::Start => 200,
            State::Source => 201,
            State::Header => 202,
            State::Done => 210,
            State::Destroyed => 0,
        }
    }
}

/// 伸張コーデック
#[derive(Debug)]
pub struct Decompress {
    data: Vec<u8>,
    markers: MarkerScan,
    header: Option<Header>,
    state: State,
}

impl Default for Decompress {
    fn default() -> Self {
        Self::new()
    }
}

impl Decompress {
    pub fn new() -> Self {
        Decompress {
            data: Vec::new(),
            markers: MarkerScan::default(),
            header: None,
            state: State::Start,
        }
    }

    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == State::Destroyed
    }
}

impl Codec for Decompress {
    fn role(&self) -> Role {
        Role::Decompress
    }

    fn destroy(&mut self) {
        self.data = Vec::new();
        self.markers = MarkerScan::default();
        self.header = None;
        self.state = State::Destroyed;
    }
}

impl Session<Decompress> {
    /// 入力データを設定する（メモリソース）
    pub fn set_source(&mut self, data: Vec<u8>) -> Result<(), Error> {
        let (codec, err) = self.parts()?;
        if codec.state == State::Destroyed {
            return Err(bad_state(err, codec.state));
        }
        codec.data = data;
        codec.markers = MarkerScan::default();
        codec.header = None;
        codec.state = State::Source;
        Ok(())
    }

    /// ヘッダーを読み込む
    pub fn read_header(&mut self) -> Result<Header, Error> {
        let (codec, err) = self.parts()?;
        if codec.state != State::Source {
            return Err(bad_state(err, codec.state));
        }
        if codec.data.is_empty() {
            return Err(err.fail(MessageCode::InputEmpty, MsgParm::none()));
        }
        if codec.data.len() < 2 || codec.data[0..2] != JPEG_SOI {
            let first = codec.data[0] as i32;
            let second = codec.data.get(1).copied().unwrap_or(0) as i32;
            return Err(err.fail(MessageCode::NoSoi, MsgParm::ints(&[first, second])));
        }

        codec.markers = scan_markers(&codec.data);
        err.trace(1, MessageCode::TraceSoi, MsgParm::none());
        if let Some(jfif) = codec.markers.jfif {
            err.trace(
                1,
                MessageCode::TraceJfif,
                MsgParm::ints(&[
                    jfif.major as i32,
                    jfif.minor as i32,
                    jfif.x_density as i32,
                    jfif.y_density as i32,
                    jfif.units as i32,
                ]),
            );
            if jfif.major != 1 {
                err.warn(
                    MessageCode::JfifMajor,
                    MsgParm::ints(&[jfif.major as i32, jfif.minor as i32]),
                );
            }
        }

        let mut decoder = Decoder::new(&codec.data[..]);
        decoder.read_info().map_err(|e| decode_error(err, e))?;
        let info = match decoder.info() {
            Some(info) => info,
            None => {
                return Err(err.fail(
                    MessageCode::BadStructure,
                    MsgParm::text("missing frame header"),
                ))
            }
        };

        let color_space = match info.pixel_format {
            PixelFormat::L8 => ColorSpace::Grayscale,
            PixelFormat::RGB24 => ColorSpace::Rgb,
            PixelFormat::CMYK32 => ColorSpace::Cmyk,
            PixelFormat::L16 => {
                return Err(err.fail(MessageCode::BadPrecision, MsgParm::ints(&[16])))
            }
        };
        if let Some(frame) = codec.markers.frame {
            err.trace(
                1,
                MessageCode::TraceSof,
                MsgParm::ints(&[
                    frame.marker as i32,
                    frame.width as i32,
                    frame.height as i32,
                    frame.components as i32,
                ]),
            );
        }

        let header = Header {
            width: info.width as u32,
            height: info.height as u32,
            components: color_space.components() as u8,
            color_space,
            progressive: matches!(info.coding_process, CodingProcess::DctProgressive),
            jfif: codec.markers.jfif,
        };
        codec.header = Some(header.clone());
        codec.state = State::Header;
        Ok(header)
    }

    /// 画像データを伸張し、インターリーブされた8bitサンプルを返す
    pub fn decompress(&mut self) -> Result<Vec<u8>, Error> {
        let (codec, err) = self.parts()?;
        if codec.state != State::Header {
            return Err(bad_state(err, codec.state));
        }

        if let Some(components) = codec.markers.scan_components {
            err.trace(1, MessageCode::TraceSos, MsgParm::ints(&[components as i32]));
        }
        // EOIが無ければ警告し、EOIを補ってから伸張する
        let input = if codec.markers.end == ImageEnd::Missing {
            err.warn(MessageCode::JpegEof, MsgParm::none());
            let mut filled = Vec::with_capacity(codec.data.len() + 2);
            filled.extend_from_slice(&codec.data);
            filled.extend_from_slice(&[0xFF, MARKER_EOI]);
            Cow::Owned(filled)
        } else {
            Cow::Borrowed(&codec.data[..])
        };

        let mut decoder = Decoder::new(&input[..]);
        let pixels = decoder.decode().map_err(|e| decode_error(err, e))?;

        match codec.markers.end {
            ImageEnd::Clean => err.trace(1, MessageCode::TraceEoi, MsgParm::none()),
            ImageEnd::Trailing(extra) => err.warn(
                MessageCode::TrailingData,
                MsgParm::ints(&[extra as i32, MARKER_EOI as i32]),
            ),
            ImageEnd::Missing => {}
        }

        codec.state = State::Done;
        Ok(pixels)
    }
}

fn bad_state(err: &mut ErrorManager, state: State) -> Error {
    err.fail(MessageCode::BadState, MsgParm::ints(&[state.code()]))
}

/// デコーダのエラーを致命的エラーとして送出
fn decode_error(err: &mut ErrorManager, error: jpeg_decoder::Error) -> Error {
    match error {
        jpeg_decoder::Error::Format(reason) => {
            err.fail(MessageCode::BadStructure, MsgParm::text(&reason))
        }
        jpeg_decoder::Error::Unsupported(feature) => {
            err.fail(MessageCode::Unsupported, MsgParm::text(&format!("{feature:?}")))
        }
        other => err.fail(MessageCode::BadStructure, MsgParm::text(&other.to_string())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    marker: u8,
    width: u16,
    height: u16,
    components: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ImageEnd {
    #[default]
    Missing,
    Clean,
    Trailing(usize),
}

/// SOSまでのマーカーから診断用の情報を集めたもの
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct MarkerScan {
    jfif: Option<Jfif>,
    frame: Option<Frame>,
    scan_components: Option<u8>,
    end: ImageEnd,
}

fn read_u16(data: &[u8], pos: usize) -> u16 {
    ((data[pos] as u16) << 8) | (data[pos + 1] as u16)
}

/// マーカーを走査する
///
/// 構造の検証はデコーダに任せ、読めないところで打ち切る。
fn scan_markers(data: &[u8]) -> MarkerScan {
    let mut scan = MarkerScan::default();
    let mut pos = 2;

    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            break;
        }

        let marker = data[pos + 1];
        pos += 2;

        // フィルバイト
        if marker == 0xFF {
            pos -= 1;
            continue;
        }

        // スタンドアロンマーカー
        if (0xD0..=0xD9).contains(&marker) {
            if marker == MARKER_EOI {
                scan.end = ImageEnd::Clean;
                break;
            }
            continue;
        }

        if pos + 2 > data.len() {
            break;
        }
        let segment_size = read_u16(data, pos) as usize;
        if segment_size < 2 {
            break;
        }
        let segment_end = pos + segment_size;
        if segment_end > data.len() {
            break;
        }

        match marker {
            MARKER_SOS => {
                if segment_size > 2 {
                    scan.scan_components = Some(data[pos + 2]);
                }
                // エントロピー符号化データ内に FF D9 は現れない
                scan.end = find_image_end(data, segment_end);
                break;
            }
            MARKER_APP0 if segment_size >= 16 && &data[pos + 2..pos + 7] == b"JFIF\0" => {
                scan.jfif = Some(Jfif {
                    major: data[pos + 7],
                    minor: data[pos + 8],
                    units: data[pos + 9],
                    x_density: read_u16(data, pos + 10),
                    y_density: read_u16(data, pos + 12),
                });
            }
            // SOF markers (DHT, JPG, DAC を除く)
            0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF if segment_size >= 8 => {
                scan.frame = Some(Frame {
                    marker,
                    height: read_u16(data, pos + 3),
                    width: read_u16(data, pos + 5),
                    components: data[pos + 7],
                });
            }
            _ => {}
        }

        pos = segment_end;
    }

    scan
}

fn find_image_end(data: &[u8], from: usize) -> ImageEnd {
    let mut pos = from;
    while pos + 1 < data.len() {
        if data[pos] == 0xFF && data[pos + 1] == MARKER_EOI {
            let extra = data.len() - (pos + 2);
            return if extra == 0 {
                ImageEnd::Clean
            } else {
                ImageEnd::Trailing(extra)
            };
        }
        pos += 1;
    }
    ImageEnd::Missing
}
