use flowgentic::AppError;

#[test]
fn display_prefixes_the_error_kind() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Db("locked".into()), "db: locked"),
        (AppError::Acp("framing".into()), "acp: framing"),
        (AppError::Spawn("missing".into()), "spawn: missing"),
        (AppError::PeerClosed("eof".into()), "peer closed: eof"),
        (AppError::NotFound("s-1".into()), "not found: s-1"),
        (
            AppError::InvalidState("not idle".into()),
            "invalid state: not idle",
        ),
        (AppError::Unsupported("fs".into()), "unsupported: fs"),
        (AppError::Cancelled("stop".into()), "cancelled: stop"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn toml_errors_become_config_errors() {
    let parse_err = toml::from_str::<toml::Value>("not [ valid").expect_err("bad toml");
    let err: AppError = parse_err.into();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn io_errors_become_io_errors() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe")));
}
