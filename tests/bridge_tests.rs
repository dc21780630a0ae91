use jpeg_host_bridge::{
    new_session, release_session, wrap_session, Codec, Config, Error, ErrorManager, Handle,
    MemorySink, MessageCode, MsgParm, Role, Session, Teardown,
};
use std::cell::Cell;
use std::rc::Rc;

/// 後片付けと破棄の回数を数えるコーデック
#[derive(Default, Clone)]
struct Counters {
    destroyed: Rc<Cell<usize>>,
    dropped: Rc<Cell<usize>>,
}

struct CountingCodec {
    role: Role,
    counters: Counters,
}

impl CountingCodec {
    fn new(counters: &Counters) -> Self {
        CountingCodec {
            role: Role::Decompress,
            counters: counters.clone(),
        }
    }
}

impl Codec for CountingCodec {
    fn role(&self) -> Role {
        self.role
    }

    fn destroy(&mut self) {
        self.counters.destroyed.set(self.counters.destroyed.get() + 1);
    }
}

impl Drop for CountingCodec {
    fn drop(&mut self) {
        self.counters.dropped.set(self.counters.dropped.get() + 1);
    }
}

fn attached_session(counters: &Counters, sink: &MemorySink) -> Box<Session<CountingCodec>> {
    let mut session = Session::new(CountingCodec::new(counters));
    let err = ErrorManager::with_config(&Config::default(), Box::new(sink.clone()))
        .expect("Failed to allocate error manager");
    session
        .attach_error_manager(err)
        .expect("Failed to attach error manager");
    session
}

/// デコード処理の代わり: 警告を出した後に致命的エラーで中断する
fn failing_decode(handle: &mut Handle<Session<CountingCodec>>) -> Result<Vec<u8>, Error> {
    let session = handle.get_mut()?;
    let err = session.error_manager_mut()?;
    err.warn(MessageCode::JpegEof, MsgParm::none());
    check_structure(err)?;
    Ok(vec![0; 16])
}

fn check_structure(err: &mut ErrorManager) -> Result<(), Error> {
    Err(err.fail(MessageCode::BadStructure, MsgParm::text("bogus marker length")))
}

#[test]
fn test_finalize_with_aux_memory_releases_everything_once() {
    let counters = Counters::default();
    let sink = MemorySink::new();
    let mut session = attached_session(&counters, &sink);
    session
        .error_manager_mut()
        .expect("Error manager should be attached")
        .set_aux_memory(vec![0u8; 1024]);

    let mut handle = wrap_session(session);
    let report = release_session(&mut handle);

    assert_eq!(
        report,
        Some(Teardown {
            codec_destroyed: true,
            error_manager_released: true,
            aux_memory_released: Some(1024),
        })
    );
    assert_eq!(counters.destroyed.get(), 1);
    assert_eq!(counters.dropped.get(), 1);
    assert!(handle.is_null());

    // 2回目は何もしない
    assert_eq!(release_session(&mut handle), None);
    assert_eq!(counters.destroyed.get(), 1);
    assert_eq!(counters.dropped.get(), 1);

    // ハンドル破棄時のファイナライザも空のアドレスを見て何もしない
    drop(handle);
    assert_eq!(counters.destroyed.get(), 1);
    assert_eq!(counters.dropped.get(), 1);
}

#[test]
fn test_finalize_without_aux_memory() {
    let counters = Counters::default();
    let sink = MemorySink::new();
    let mut handle = wrap_session(attached_session(&counters, &sink));

    let report = release_session(&mut handle).expect("Session should be live");
    assert!(report.codec_destroyed);
    assert!(report.error_manager_released);
    assert_eq!(report.aux_memory_released, None);
    assert_eq!(counters.destroyed.get(), 1);
}

#[test]
fn test_finalize_session_without_error_manager() {
    let counters = Counters::default();
    let mut handle = wrap_session(Session::new(CountingCodec::new(&counters)));

    let report = release_session(&mut handle).expect("Session should be live");
    assert!(report.codec_destroyed);
    assert!(!report.error_manager_released);
    assert_eq!(report.aux_memory_released, None);
    assert_eq!(counters.destroyed.get(), 1);
    assert_eq!(counters.dropped.get(), 1);
}

#[test]
fn test_explicit_close_is_idempotent() {
    let counters = Counters::default();
    let sink = MemorySink::new();
    let mut handle = wrap_session(attached_session(&counters, &sink));

    handle.close();
    handle.close();
    assert!(handle.is_null());
    assert!(handle.is_finalized());
    drop(handle);

    assert_eq!(counters.destroyed.get(), 1);
    assert_eq!(counters.dropped.get(), 1);
}

#[test]
fn test_reclamation_runs_finalizer() {
    let counters = Counters::default();
    let sink = MemorySink::new();
    {
        let mut session = attached_session(&counters, &sink);
        session
            .error_manager_mut()
            .expect("Error manager should be attached")
            .alloc_aux_memory(4096)
            .expect("Failed to allocate aux memory");
        let _handle = wrap_session(session);
    }

    assert_eq!(counters.destroyed.get(), 1);
    assert_eq!(counters.dropped.get(), 1);
}

#[test]
fn test_fatal_error_propagates_and_cleanup_follows() {
    let counters = Counters::default();
    let sink = MemorySink::new();
    let mut handle = wrap_session(attached_session(&counters, &sink));

    let result = failing_decode(&mut handle);
    match &result {
        Err(Error::Fatal {
            role,
            code,
            message,
        }) => {
            assert_eq!(*role, Role::Decompress);
            assert_eq!(*code, MessageCode::BadStructure);
            assert_eq!(message, "Invalid JPEG file structure: bogus marker length");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(
        result.unwrap_err().to_string(),
        "JPEG decompression error: Invalid JPEG file structure: bogus marker length"
    );

    // 警告は中断せずに出力済み
    assert_eq!(
        sink.lines(),
        vec!["JPEG decompression: Premature end of JPEG file".to_string()]
    );

    // エラー経路でもセッションはまだ生きており、破棄で解放される
    let session = handle.get().expect("Session should still be live");
    assert_eq!(
        session.error_manager().unwrap().last_message(),
        "Invalid JPEG file structure: bogus marker length"
    );
    assert_eq!(counters.destroyed.get(), 0);
    drop(handle);
    assert_eq!(counters.destroyed.get(), 1);
    assert_eq!(counters.dropped.get(), 1);
}

#[test]
fn test_fatal_message_matches_formatted_message() {
    let counters = Counters::default();
    let sink = MemorySink::new();
    let mut session = attached_session(&counters, &sink);
    let err = session.error_manager_mut().unwrap();

    let error = err.fail(MessageCode::NoSoi, MsgParm::ints(&[0x89, 0x50]));
    assert_eq!(error.code(), Some(MessageCode::NoSoi));
    assert_eq!(error.codec_message(), Some(err.formatted_message().as_str()));
}

#[test]
fn test_new_session_sets_role_from_codec() {
    let counters = Counters::default();
    let sink = MemorySink::new();
    let mut codec = CountingCodec::new(&counters);
    codec.role = Role::Compress;

    let mut handle = new_session(codec, &Config::default(), Box::new(sink.clone()))
        .expect("Failed to create session");
    let err = handle.get_mut().unwrap().error_manager_mut().unwrap();
    assert_eq!(err.role(), Role::Compress);

    err.warn(MessageCode::JpegEof, MsgParm::none());
    assert_eq!(
        sink.lines(),
        vec!["JPEG compression: Premature end of JPEG file".to_string()]
    );
}

#[test]
fn test_attach_twice_is_rejected() {
    let counters = Counters::default();
    let sink = MemorySink::new();
    let mut session = attached_session(&counters, &sink);

    let second = ErrorManager::new().expect("Failed to allocate error manager");
    assert!(matches!(
        session.attach_error_manager(second),
        Err(Error::AlreadyAttached)
    ));
}

#[test]
fn test_detached_session() {
    let counters = Counters::default();
    let mut session = Session::new(CountingCodec::new(&counters));

    assert!(!session.is_attached());
    assert!(matches!(session.error_manager(), Err(Error::Detached)));
    assert!(matches!(session.error_manager_mut(), Err(Error::Detached)));
}

#[test]
fn test_released_handle_rejects_access() {
    let counters = Counters::default();
    let sink = MemorySink::new();
    let mut handle = wrap_session(attached_session(&counters, &sink));

    handle.close();
    assert!(matches!(handle.get_mut(), Err(Error::Released)));
    assert!(matches!(failing_decode(&mut handle), Err(Error::Released)));
}
