//! Bundled demo modules for `viper demo` and `viper dump`

use clap::ValueEnum;
use il::{BlockRef, FunctionBuilder, Module, Opcode, Type, Value};

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Demo {
    /// Divide by zero recovered with resume.next
    Divide,
    /// Out-of-range index recovered with resume.label
    Bounds,
    /// Dense 5000-case switch in a recursive loop
    Switch,
    /// Recursive factorial of 10
    Factorial,
    /// Divide by zero with no handler
    Unhandled,
}

pub fn build(demo: Demo) -> Module {
    let mut module = Module::new(format!("{:?}", demo).to_lowercase());
    match demo {
        Demo::Divide => module.add_function(divide()),
        Demo::Bounds => module.add_function(bounds()),
        Demo::Switch => {
            module.add_function(classify());
            module.add_function(call_main("classify", vec![Value::int(0)]));
        }
        Demo::Factorial => {
            module.add_function(factorial());
            module.add_function(call_main("fact", vec![Value::int(10)]));
        }
        Demo::Unhandled => module.add_function(unhandled()),
    }
    module.add_extern("rt_print_str", vec![Type::Str], Type::Void);
    module.add_extern("rt_print_i64", vec![Type::I64], Type::Void);
    module
}

fn call_main(callee: &str, args: Vec<Value>) -> il::Function {
    let mut b = FunctionBuilder::new("main", Type::I64);
    let r = b.call(callee, Type::I64, args);
    b.ret(r);
    b.finish()
}

fn divide() -> il::Function {
    let mut b = FunctionBuilder::new("main", Type::I64);
    let entry = b.block("entry");
    let handler = b.handler_block("handler");
    b.switch_to(entry);
    b.set_line(1);
    b.eh_push(handler);
    b.set_line(2);
    b.binary(Opcode::SDivChk0, Type::I64, Value::int(10), Value::int(0));
    b.set_line(3);
    b.eh_pop();
    b.call("rt_print_str", Type::Void, vec![Value::str("continued after the fault")]);
    b.ret(Some(Value::int(0)));

    b.switch_to(handler);
    b.set_line(5);
    b.eh_entry();
    let err = b.block_param(handler, 0);
    let tok = b.block_param(handler, 1);
    let kind = b.err_get(Opcode::ErrGetKind, err);
    b.call("rt_print_str", Type::Void, vec![Value::str("caught trap kind")]);
    b.call("rt_print_i64", Type::Void, vec![kind]);
    b.resume_next(tok);
    b.finish()
}

fn bounds() -> il::Function {
    let mut b = FunctionBuilder::new("main", Type::I64);
    let entry = b.block("entry");
    let handler = b.handler_block("oob");
    let fallback = b.block("fallback");
    b.switch_to(entry);
    b.set_line(1);
    let array = b.alloca(Value::int(80));
    b.eh_push(handler);
    b.set_line(2);
    let index = b.idx_chk(Value::int(10), Value::int(0), Value::int(10));
    let offset = b.binary(Opcode::Mul, Type::I64, index, Value::int(8));
    let elem = b.gep(array, offset);
    let v = b.load(Type::I64, elem);
    b.ret(Some(v));

    b.switch_to(handler);
    b.set_line(4);
    let tok = b.block_param(handler, 1);
    b.resume_label(tok, fallback, vec![]);

    b.switch_to(fallback);
    b.set_line(5);
    b.call("rt_print_str", Type::Void, vec![Value::str("index 10 out of range, using fallback")]);
    b.ret(Some(Value::int(-1)));
    b.finish()
}

fn classify() -> il::Function {
    let mut b = FunctionBuilder::new("classify", Type::I64);
    let depth = b.param("depth", Type::I64);
    let entry = b.block("entry");
    let recurse = b.block("recurse");
    let start = b.block("start");
    let head = b.block_with_params("loop", &[("i", Type::I64), ("acc", Type::I64)]);
    let body = b.block("body");
    let hit = b.block("hit");
    let miss = b.block("miss");
    let exit = b.block("exit");
    let i = b.block_param(head, 0);
    let acc = b.block_param(head, 1);

    b.switch_to(entry);
    let shallow = b.binary(Opcode::SCmpLT, Type::I1, depth.clone(), Value::int(2));
    b.cbr(shallow, recurse, start);

    b.switch_to(recurse);
    let deeper = b.binary(Opcode::Add, Type::I64, depth, Value::int(1));
    let inner = b.call("classify", Type::I64, vec![deeper]).unwrap_or(Value::int(0));
    b.br(head, vec![Value::int(0), inner]);

    b.switch_to(start);
    b.br(head, vec![Value::int(0), Value::int(0)]);

    b.switch_to(head);
    let more = b.binary(Opcode::SCmpLT, Type::I1, i.clone(), Value::int(10));
    b.cbr(more, body, exit);

    b.switch_to(body);
    let scrutinee = b.binary(Opcode::Mul, Type::I64, i.clone(), Value::int(611));
    let cases: Vec<(i64, BlockRef)> = (0..5000).map(|v| (v, hit)).collect();
    b.switch_i32(scrutinee, miss, &cases);

    b.switch_to(hit);
    let i2 = b.binary(Opcode::Add, Type::I64, i.clone(), Value::int(1));
    let acc2 = b.binary(Opcode::Add, Type::I64, acc.clone(), Value::int(1));
    b.br(head, vec![i2, acc2]);

    b.switch_to(miss);
    let i3 = b.binary(Opcode::Add, Type::I64, i, Value::int(1));
    b.br(head, vec![i3, acc.clone()]);

    b.switch_to(exit);
    b.ret(Some(acc));
    b.finish()
}

fn factorial() -> il::Function {
    let mut b = FunctionBuilder::new("fact", Type::I64);
    let n = b.param("n", Type::I64);
    let entry = b.block("entry");
    let base = b.block("base");
    let rec = b.block("rec");
    b.switch_to(entry);
    let small = b.binary(Opcode::SCmpLE, Type::I1, n.clone(), Value::int(1));
    b.cbr(small, base, rec);
    b.switch_to(base);
    b.ret(Some(Value::int(1)));
    b.switch_to(rec);
    let m = b.binary(Opcode::Sub, Type::I64, n.clone(), Value::int(1));
    let r = b.call("fact", Type::I64, vec![m]).unwrap_or(Value::int(1));
    let p = b.binary(Opcode::IMulOvf, Type::I64, n, r);
    b.ret(Some(p));
    b.finish()
}

fn unhandled() -> il::Function {
    let mut b = FunctionBuilder::new("main", Type::I64);
    b.set_line(7);
    let q = b.binary(Opcode::SDivChk0, Type::I64, Value::int(1), Value::int(0));
    b.ret(Some(q));
    b.finish()
}
