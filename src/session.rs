use crate::config::Config;
use crate::error_mgr::ErrorManager;
use crate::host::{DiagnosticSink, Handle};
use crate::{Error, Role};

/// ラップ対象のコーデック
pub trait Codec {
    fn role(&self) -> Role;

    /// コーデック内部状態（ハフマンテーブル、入出力バッファ等）を解放する
    ///
    /// セッション本体とエラーマネージャは対象外。失敗しないこと。
    fn destroy(&mut self);
}

/// コーデックセッション
///
/// エラーマネージャはセッションごとに1つで、共有しない。
#[derive(Debug)]
pub struct Session<C: Codec> {
    pub(crate) codec: C,
    pub(crate) err: Option<Box<ErrorManager>>,
}

/// ファイナライズで解放したものの記録
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Teardown {
    /// コーデックの後片付け（`Codec::destroy`）を行った
    pub codec_destroyed: bool,
    pub error_manager_released: bool,
    /// 解放した補助メモリの容量（バイト）
    pub aux_memory_released: Option<usize>,
}

impl<C: Codec> Session<C> {
    pub fn new(codec: C) -> Box<Self> {
        Box::new(Session { codec, err: None })
    }

    /// エラーマネージャを設定する
    ///
    /// コールバックが呼ばれ得る処理の前に設定すること。二重設定はエラー。
    pub fn attach_error_manager(&mut self, mut err: Box<ErrorManager>) -> Result<(), Error> {
        if self.err.is_some() {
            return Err(Error::AlreadyAttached);
        }
        err.set_role(self.codec.role());
        self.err = Some(err);
        tracing::debug!(role = ?self.codec.role(), "attached JPEG error manager");
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.err.is_some()
    }

    pub fn error_manager(&self) -> Result<&ErrorManager, Error> {
        self.err.as_deref().ok_or(Error::Detached)
    }

    pub fn error_manager_mut(&mut self) -> Result<&mut ErrorManager, Error> {
        self.err.as_deref_mut().ok_or(Error::Detached)
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn codec_mut(&mut self) -> &mut C {
        &mut self.codec
    }

    /// コーデックとエラーマネージャを同時に借用する
    pub(crate) fn parts(&mut self) -> Result<(&mut C, &mut ErrorManager), Error> {
        let err = self.err.as_deref_mut().ok_or(Error::Detached)?;
        Ok((&mut self.codec, err))
    }

    /// コーデックの後片付け → 補助メモリ → エラーマネージャ → セッション本体の順に解放
    pub fn teardown(mut self: Box<Self>) -> Teardown {
        let role = self.codec.role();
        self.codec.destroy();

        let mut report = Teardown {
            codec_destroyed: true,
            error_manager_released: false,
            aux_memory_released: None,
        };
        if let Some(mut err) = self.err.take() {
            report.aux_memory_released = err.take_aux_memory().map(|mem| mem.capacity());
            drop(err);
            report.error_manager_released = true;
        }
        drop(self);

        tracing::debug!(
            role = ?role,
            aux_memory = ?report.aux_memory_released,
            "finalized JPEG session"
        );
        report
    }
}

/// セッションハンドルのファイナライザ本体
///
/// ハンドルが空なら何もしない。ファイナライザ以外から呼ばれても
/// 最後に必ずアドレスを空にするため、二重解放は起きない。
pub fn release_session<C: Codec>(handle: &mut Handle<Session<C>>) -> Option<Teardown> {
    let report = handle.take().map(Session::teardown);
    handle.clear();
    report
}

fn session_finalizer<C: Codec>(handle: &mut Handle<Session<C>>) {
    release_session(handle);
}

/// セッションをハンドルで包み、ファイナライザを登録する
pub fn wrap_session<C: Codec>(session: Box<Session<C>>) -> Handle<Session<C>> {
    let mut handle = Handle::new(session);
    handle.register_finalizer(session_finalizer::<C>);
    handle
}

/// エラーマネージャの確保 → セッションへの設定 → ハンドル化を順に行う
pub fn new_session<C: Codec>(
    codec: C,
    config: &Config,
    sink: Box<dyn DiagnosticSink>,
) -> Result<Handle<Session<C>>, Error> {
    let err = ErrorManager::with_config(config, sink)?;
    let mut session = Session::new(codec);
    session.attach_error_manager(err)?;
    Ok(wrap_session(session))
}
