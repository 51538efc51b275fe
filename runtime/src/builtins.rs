//! Builtin externs available to every IL program
//!
//! Each builtin validates its arguments and reports failures through
//! [`RtError`], which the engine turns into a trap with the matching kind.

use crate::{register_extern, Err, RtContext, RtError, RtString, RtValue};
use std::fs::File;

fn arg_i64(func: &str, args: &[RtValue], index: usize) -> Result<i64, RtError> {
    args.get(index)
        .and_then(RtValue::as_i64)
        .ok_or_else(|| RtError::invalid_argument(func, index))
}

fn arg_f64(func: &str, args: &[RtValue], index: usize) -> Result<f64, RtError> {
    args.get(index)
        .and_then(RtValue::as_f64)
        .ok_or_else(|| RtError::invalid_argument(func, index))
}

fn arg_str<'a>(func: &str, args: &'a [RtValue], index: usize) -> Result<&'a str, RtError> {
    args.get(index)
        .and_then(RtValue::as_str)
        .ok_or_else(|| RtError::invalid_argument(func, index))
}

// ============================================================================
// Console
// ============================================================================

pub fn rt_print_i64(ctx: &mut RtContext, args: &[RtValue]) -> Result<RtValue, RtError> {
    let v = arg_i64("rt_print_i64", args, 0)?;
    ctx.console.write_line(&v.to_string())?;
    Ok(RtValue::Void)
}

pub fn rt_print_f64(ctx: &mut RtContext, args: &[RtValue]) -> Result<RtValue, RtError> {
    let v = arg_f64("rt_print_f64", args, 0)?;
    ctx.console.write_line(&v.to_string())?;
    Ok(RtValue::Void)
}

pub fn rt_print_str(ctx: &mut RtContext, args: &[RtValue]) -> Result<RtValue, RtError> {
    let s = arg_str("rt_print_str", args, 0)?;
    ctx.console.write_line(s)?;
    Ok(RtValue::Void)
}

// ============================================================================
// Strings
// ============================================================================

pub fn rt_concat(_: &mut RtContext, args: &[RtValue]) -> Result<RtValue, RtError> {
    let a = arg_str("rt_concat", args, 0)?;
    let b = arg_str("rt_concat", args, 1)?;
    let mut out = String::with_capacity(a.len() + b.len());
    out.push_str(a);
    out.push_str(b);
    Ok(RtValue::Str(RtString::from(out)))
}

pub fn rt_len(_: &mut RtContext, args: &[RtValue]) -> Result<RtValue, RtError> {
    let s = arg_str("rt_len", args, 0)?;
    Ok(RtValue::I64(s.len() as i64))
}

// ============================================================================
// Math
// ============================================================================

/// |x|; `i64::MIN` has no positive counterpart and reports Overflow
pub fn rt_abs_i64(_: &mut RtContext, args: &[RtValue]) -> Result<RtValue, RtError> {
    let v = arg_i64("rt_abs_i64", args, 0)?;
    v.checked_abs()
        .map(RtValue::I64)
        .ok_or_else(|| RtError::new(Err::Overflow, "abs of i64::MIN"))
}

pub fn rt_sqrt(_: &mut RtContext, args: &[RtValue]) -> Result<RtValue, RtError> {
    let v = arg_f64("rt_sqrt", args, 0)?;
    if v < 0.0 {
        return Err(RtError::new(Err::DomainError, format!("sqrt of negative value {}", v)));
    }
    Ok(RtValue::F64(v.sqrt()))
}

// ============================================================================
// Files
// ============================================================================

pub fn rt_open_file(ctx: &mut RtContext, args: &[RtValue]) -> Result<RtValue, RtError> {
    let path = arg_str("rt_open_file", args, 0)?;
    match File::open(path) {
        Ok(file) => Ok(RtValue::I64(ctx.add_file(file))),
        Err(e) => Err(RtError::new(Err::from_io(&e), format!("{}: {}", path, e))),
    }
}

pub fn rt_read_line(ctx: &mut RtContext, args: &[RtValue]) -> Result<RtValue, RtError> {
    let handle = arg_i64("rt_read_line", args, 0)?;
    match ctx.read_line(handle) {
        None => Err(RtError::new(
            Err::InvalidOperation,
            format!("invalid file handle {}", handle),
        )),
        Some(Ok(Some(line))) => Ok(RtValue::Str(RtString::from(line))),
        Some(Ok(None)) => Err(RtError::new(Err::EOF, "end of file")),
        Some(Err(e)) => Err(RtError::new(Err::from_io(&e), e.to_string())),
    }
}

pub fn rt_close_file(ctx: &mut RtContext, args: &[RtValue]) -> Result<RtValue, RtError> {
    let handle = arg_i64("rt_close_file", args, 0)?;
    if ctx.close_file(handle) {
        Ok(RtValue::Void)
    } else {
        Err(RtError::new(
            Err::InvalidOperation,
            format!("invalid file handle {}", handle),
        ))
    }
}

register_extern!("rt_print_i64", [I64] -> Void, rt_print_i64);
register_extern!("rt_print_f64", [F64] -> Void, rt_print_f64);
register_extern!("rt_print_str", [Str] -> Void, rt_print_str);
register_extern!("rt_concat", [Str, Str] -> Str, rt_concat);
register_extern!("rt_len", [Str] -> I64, rt_len);
register_extern!("rt_abs_i64", [I64] -> I64, rt_abs_i64);
register_extern!("rt_sqrt", [F64] -> F64, rt_sqrt);
register_extern!("rt_open_file", [Str] -> I64, rt_open_file);
register_extern!("rt_read_line", [I64] -> Str, rt_read_line);
register_extern!("rt_close_file", [I64] -> Void, rt_close_file);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Console;

    #[test]
    fn test_print_goes_to_console() {
        let console = Console::captured();
        let mut ctx = RtContext::new(console.clone());
        rt_print_i64(&mut ctx, &[RtValue::I64(-5)]).unwrap();
        rt_print_str(&mut ctx, &[RtValue::Str("ok".into())]).unwrap();
        assert_eq!(console.take(), "-5\nok\n");
    }

    #[test]
    fn test_print_to_failing_console() {
        struct Full;
        impl std::io::Write for Full {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "device full"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let mut ctx = RtContext::new(Console::writer(Full));
        let err = rt_print_str(&mut ctx, &[RtValue::Str("x".into())]).unwrap_err();
        assert_eq!(err.err, Err::IOError);
        let err = rt_print_i64(&mut ctx, &[RtValue::I64(1)]).unwrap_err();
        assert_eq!(err.err, Err::IOError);
    }

    #[test]
    fn test_bad_argument_is_invalid_operation() {
        let mut ctx = RtContext::default();
        let err = rt_print_i64(&mut ctx, &[RtValue::F64(1.0)]).unwrap_err();
        assert_eq!(err.err, Err::InvalidOperation);
    }

    #[test]
    fn test_sqrt_domain() {
        let mut ctx = RtContext::default();
        assert_eq!(rt_sqrt(&mut ctx, &[RtValue::F64(9.0)]), Ok(RtValue::F64(3.0)));
        assert_eq!(rt_sqrt(&mut ctx, &[RtValue::F64(-1.0)]).unwrap_err().err, Err::DomainError);
    }

    #[test]
    fn test_abs_overflow() {
        let mut ctx = RtContext::default();
        let err = rt_abs_i64(&mut ctx, &[RtValue::I64(i64::MIN)]).unwrap_err();
        assert_eq!(err.err, Err::Overflow);
    }

    #[test]
    fn test_open_missing_file() {
        let mut ctx = RtContext::default();
        let err = rt_open_file(&mut ctx, &[RtValue::Str("/definitely/not/here.txt".into())]).unwrap_err();
        assert_eq!(err.err, Err::FileNotFound);
    }

    #[test]
    fn test_concat_and_len() {
        let mut ctx = RtContext::default();
        let s = rt_concat(&mut ctx, &[RtValue::Str("ab".into()), RtValue::Str("cd".into())]).unwrap();
        assert_eq!(s.as_str(), Some("abcd"));
        assert_eq!(rt_len(&mut ctx, &[s]), Ok(RtValue::I64(4)));
    }
}
