use crate::Error;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// ホストの診断ストリーム
pub trait DiagnosticSink {
    fn write_line(&mut self, line: &str);
}

/// 標準エラー出力への診断ストリーム
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn write_line(&mut self, line: &str) {
        // 出力に失敗しても処理は継続
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }
}

/// 出力内容を保持する診断ストリーム
///
/// クローン同士でバッファを共有する。シングルスレッド専用。
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Rc<RefCell<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.borrow().is_empty()
    }
}

impl DiagnosticSink for MemorySink {
    fn write_line(&mut self, line: &str) {
        self.lines.borrow_mut().push(line.to_string());
    }
}

/// ハンドルに登録するファイナライザ
pub type Finalizer<T> = fn(&mut Handle<T>);

/// ネイティブオブジェクトへの参照を保持するホスト管理ハンドル
///
/// - `close()` または破棄時に、登録済みのファイナライザを一度だけ実行
/// - ファイナライザは `clear()` で保持アドレスを空にする
/// - アドレスが空になった後のアクセスは [`Error::Released`]
pub struct Handle<T> {
    addr: Option<Box<T>>,
    finalizer: Option<Finalizer<T>>,
    finalized: bool,
}

impl<T> Handle<T> {
    pub fn new(value: Box<T>) -> Self {
        Handle {
            addr: Some(value),
            finalizer: None,
            finalized: false,
        }
    }

    /// ファイナライザを登録する（既存の登録は置き換え）
    pub fn register_finalizer(&mut self, finalizer: Finalizer<T>) {
        self.finalizer = Some(finalizer);
    }

    pub fn get(&self) -> Result<&T, Error> {
        self.addr.as_deref().ok_or(Error::Released)
    }

    pub fn get_mut(&mut self) -> Result<&mut T, Error> {
        self.addr.as_deref_mut().ok_or(Error::Released)
    }

    pub fn is_null(&self) -> bool {
        self.addr.is_none()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// 保持しているオブジェクトの所有権を取り出し、アドレスを空にする
    pub fn take(&mut self) -> Option<Box<T>> {
        self.addr.take()
    }

    /// 保持アドレスを空にする（中身は破棄）
    pub fn clear(&mut self) {
        self.addr = None;
    }

    /// 明示的な解放
    pub fn close(&mut self) {
        self.run_finalizer();
    }

    fn run_finalizer(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        if let Some(finalizer) = self.finalizer.take() {
            finalizer(self);
        }
    }
}

impl<T> Drop for Handle<T> {
    fn drop(&mut self) {
        self.run_finalizer();
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("null", &self.addr.is_none())
            .field("finalized", &self.finalized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static CALLS: Cell<usize> = const { Cell::new(0) };
    }

    fn counting_finalizer(handle: &mut Handle<u32>) {
        CALLS.with(|calls| calls.set(calls.get() + 1));
        handle.clear();
    }

    #[test]
    fn test_close_runs_finalizer_once() {
        CALLS.with(|calls| calls.set(0));
        let mut handle = Handle::new(Box::new(7u32));
        handle.register_finalizer(counting_finalizer);
        assert_eq!(*handle.get().unwrap(), 7);

        handle.close();
        handle.close();
        assert!(handle.is_null());
        assert!(handle.is_finalized());
        drop(handle);

        assert_eq!(CALLS.with(|calls| calls.get()), 1);
    }

    #[test]
    fn test_drop_runs_finalizer() {
        CALLS.with(|calls| calls.set(0));
        {
            let mut handle = Handle::new(Box::new(1u32));
            handle.register_finalizer(counting_finalizer);
        }
        assert_eq!(CALLS.with(|calls| calls.get()), 1);
    }

    #[test]
    fn test_released_handle_access() {
        let mut handle = Handle::new(Box::new(3u32));
        handle.clear();
        assert!(matches!(handle.get(), Err(Error::Released)));
        assert!(matches!(handle.get_mut(), Err(Error::Released)));
    }

    #[test]
    fn test_memory_sink_shares_lines() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.write_line("JPEG decompression: test");
        assert_eq!(sink.lines(), vec!["JPEG decompression: test".to_string()]);
    }
}
