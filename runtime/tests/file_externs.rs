use std::io::Write;
use viper_runtime::{global_externs, Console, Err, RtContext, RtValue};

fn call(ctx: &mut RtContext, name: &str, args: &[RtValue]) -> Result<RtValue, viper_runtime::RtError> {
    let desc = global_externs()
        .get(name)
        .unwrap_or_else(|| panic!("missing builtin {}", name));
    assert_eq!(desc.params.len(), args.len());
    (desc.func)(ctx, args)
}

#[test]
fn test_read_lines_until_eof() {
    let path = std::env::temp_dir().join(format!("viper_rt_lines_{}.txt", std::process::id()));
    {
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "first").unwrap();
        writeln!(file, "second").unwrap();
    }
    let path_str = path.to_string_lossy().to_string();

    let mut ctx = RtContext::new(Console::captured());
    let handle = call(&mut ctx, "rt_open_file", &[RtValue::Str(path_str.as_str().into())]).unwrap();
    assert_eq!(ctx.open_files(), 1);

    let first = call(&mut ctx, "rt_read_line", &[handle.clone()]).unwrap();
    assert_eq!(first.as_str(), Some("first"));
    let second = call(&mut ctx, "rt_read_line", &[handle.clone()]).unwrap();
    assert_eq!(second.as_str(), Some("second"));

    let eof = call(&mut ctx, "rt_read_line", &[handle.clone()]).unwrap_err();
    assert_eq!(eof.err, Err::EOF);

    call(&mut ctx, "rt_close_file", &[handle.clone()]).unwrap();
    assert_eq!(ctx.open_files(), 0);
    let closed = call(&mut ctx, "rt_read_line", &[handle]).unwrap_err();
    assert_eq!(closed.err, Err::InvalidOperation);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_builtin_signatures() {
    let concat = global_externs()["rt_concat"];
    assert_eq!(concat.params.len(), 2);
    assert_eq!(concat.ret, viper_runtime::RtType::Str);
    let print = global_externs()["rt_print_i64"];
    assert_eq!(print.ret, viper_runtime::RtType::Void);
}
