/// 補助メモリの既定上限 (256 MiB)
pub const DEFAULT_AUX_MEMORY_LIMIT: usize = 256 * 1024 * 1024;

/// 既定の圧縮品質
pub const DEFAULT_QUALITY: u8 = 75;

/// セッション全体の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// トレースレベル（3以上で全ての警告を出力）
    pub trace_level: i32,
    /// 補助メモリとして確保できる最大バイト数
    pub aux_memory_limit: usize,
    /// 圧縮品質 (1-100)
    pub quality: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            trace_level: 0,
            aux_memory_limit: DEFAULT_AUX_MEMORY_LIMIT,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl Config {
    pub fn with_trace_level(mut self, level: i32) -> Self {
        self.trace_level = level;
        self
    }

    pub fn with_aux_memory_limit(mut self, limit: usize) -> Self {
        self.aux_memory_limit = limit;
        self
    }

    /// 品質は1-100に丸める
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }
}
