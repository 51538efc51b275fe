//! End-to-end recovery and dispatch scenarios

use il::{FunctionBuilder, Module, Opcode, Type, Value};
use viper_runtime::Console;
use vm::{Backend, SwitchMode, TrapKind, Vm, VmConfig};

fn module_of(funcs: Vec<il::Function>) -> Module {
    let mut module = Module::new("scenarios");
    for func in funcs {
        module.add_function(func);
    }
    module
}

/// Divide by zero under a handler that resumes at the next instruction.
/// The handler records the trap kind (offset by 100) in a stack slot.
#[test]
fn test_divide_by_zero_resume_next() {
    vm::logging::init_test();
    let mut b = FunctionBuilder::new("main", Type::I64);
    let entry = b.block("entry");
    let handler = b.handler_block("handler");
    b.switch_to(entry);
    let slot = b.alloca(Value::int(8));
    b.store(Type::I64, slot.clone(), Value::int(-1));
    b.eh_push(handler);
    b.binary(Opcode::SDivChk0, Type::I64, Value::int(10), Value::int(0));
    b.eh_pop();
    let seen = b.load(Type::I64, slot.clone());
    b.ret(Some(seen));

    b.switch_to(handler);
    let err = b.block_param(handler, 0);
    let tok = b.block_param(handler, 1);
    let kind = b.err_get(Opcode::ErrGetKind, err);
    let tagged = b.binary(Opcode::Add, Type::I64, kind, Value::int(100));
    b.store(Type::I64, slot, tagged);
    b.resume_next(tok);
    let module = module_of(vec![b.finish()]);

    let mut vm = Vm::new(&module, VmConfig::default());
    assert_eq!(vm.run(), Ok(100 + TrapKind::DivideByZero as i64));
    assert_eq!(vm.stats().traps_raised, 1);
    assert_eq!(vm.stats().traps_handled, 1);
}

/// Out-of-range index recovered by jumping to a fallback block that
/// reports the problem through the runtime.
#[test]
fn test_bounds_resume_label_to_fallback() {
    let mut b = FunctionBuilder::new("main", Type::I64);
    let entry = b.block("entry");
    let handler = b.handler_block("oob");
    let fallback = b.block_with_params("fallback", &[("kind", Type::I64)]);
    b.switch_to(entry);
    let array = b.alloca(Value::int(80));
    b.eh_push(handler);
    b.set_line(21);
    let index = b.idx_chk(Value::int(10), Value::int(0), Value::int(10));
    b.set_line(0);
    let offset = b.binary(Opcode::Mul, Type::I64, index, Value::int(8));
    let elem = b.gep(array, offset);
    let v = b.load(Type::I64, elem);
    b.ret(Some(v));

    b.switch_to(handler);
    let err = b.block_param(handler, 0);
    let tok = b.block_param(handler, 1);
    let kind = b.err_get(Opcode::ErrGetKind, err);
    b.resume_label(tok, fallback, vec![kind]);

    b.switch_to(fallback);
    let kind = b.block_param(fallback, 0);
    b.call("rt_print_str", Type::Void, vec![Value::str("index out of range")]);
    b.call("rt_print_i64", Type::Void, vec![kind]);
    b.ret(Some(Value::int(-1)));
    let module = module_of(vec![b.finish()]);

    let console = Console::captured();
    let mut vm = Vm::new(&module, VmConfig::default()).with_console(console.clone());
    assert_eq!(vm.run(), Ok(-1));
    assert_eq!(console.take(), format!("index out of range\n{}\n", TrapKind::Bounds as i64));
    assert_eq!(vm.stats().extern_calls, 2);
}

/// `classify(depth)` recurses twice before running a ten-iteration loop
/// over a 5000-case switch. Only `i == 9` (scrutinee 5499) misses.
fn dense_switch_module() -> Module {
    let mut b = FunctionBuilder::new("classify", Type::I64);
    let depth = b.param("depth", Type::I64);
    let entry = b.block("entry");
    let recurse = b.block("recurse");
    let start = b.block("start");
    let head = b.block_with_params("loop", &[("i", Type::I64), ("acc", Type::I64)]);
    let body = b.block("body");
    let hit = b.block("hit");
    let miss = b.block("miss");
    let next = b.block_with_params("next", &[("a", Type::I64)]);
    let exit = b.block("exit");
    let i = b.block_param(head, 0);
    let acc = b.block_param(head, 1);

    b.switch_to(entry);
    let shallow = b.binary(Opcode::SCmpLT, Type::I1, depth.clone(), Value::int(2));
    b.cbr(shallow, recurse, start);

    b.switch_to(recurse);
    let deeper = b.binary(Opcode::Add, Type::I64, depth, Value::int(1));
    let inner = b.call("classify", Type::I64, vec![deeper]).unwrap();
    b.br(head, vec![Value::int(0), inner]);

    b.switch_to(start);
    b.br(head, vec![Value::int(0), Value::int(0)]);

    b.switch_to(head);
    let more = b.binary(Opcode::SCmpLT, Type::I1, i.clone(), Value::int(10));
    b.cbr(more, body, exit);

    b.switch_to(body);
    let scrutinee = b.binary(Opcode::Mul, Type::I64, i.clone(), Value::int(611));
    let cases: Vec<(i64, il::BlockRef)> = (0..5000).map(|v| (v, hit)).collect();
    b.switch_i32(scrutinee, miss, &cases);

    b.switch_to(hit);
    let bumped = b.binary(Opcode::Add, Type::I64, acc.clone(), Value::int(1));
    b.br(next, vec![bumped]);

    b.switch_to(miss);
    b.br(next, vec![acc.clone()]);

    b.switch_to(next);
    let a = b.block_param(next, 0);
    let i2 = b.binary(Opcode::Add, Type::I64, i, Value::int(1));
    b.br(head, vec![i2, a]);

    b.switch_to(exit);
    b.ret(Some(acc));
    let classify = b.finish();

    let mut b = FunctionBuilder::new("main", Type::I64);
    let r = b.call("classify", Type::I64, vec![Value::int(0)]).unwrap();
    b.ret(Some(r));
    module_of(vec![classify, b.finish()])
}

#[test]
fn test_dense_switch_built_once_per_activation() {
    let module = dense_switch_module();
    let mut vm = Vm::new(&module, VmConfig::default().with_switch_mode(SwitchMode::Dense));
    assert_eq!(vm.run(), Ok(27));
    let stats = vm.stats();
    assert_eq!(stats.switch_builds, 3);
    assert_eq!(stats.switch_hits, 27);
    assert_eq!(stats.max_frames, 4);
}

#[test]
fn test_dense_switch_same_answer_in_every_mode() {
    let module = dense_switch_module();
    for mode in [
        SwitchMode::Auto,
        SwitchMode::Dense,
        SwitchMode::Sorted,
        SwitchMode::Hashed,
        SwitchMode::Linear,
    ] {
        let mut vm = Vm::new(&module, VmConfig::default().with_switch_mode(mode));
        assert_eq!(vm.run(), Ok(27), "mode {}", mode);
        let expected_builds = if mode == SwitchMode::Linear { 0 } else { 3 };
        assert_eq!(vm.stats().switch_builds, expected_builds, "mode {}", mode);
    }
}

#[test]
fn test_auto_mode_uses_sorted_past_dense_range() {
    let cases: Vec<(i32, usize)> = (0..5000).map(|v| (v, 1)).collect();
    let set = vm::switch::CaseSet::from_pairs(&cases);
    assert_eq!(vm::switch::choose_backend(&set), Backend::Sorted);
    assert_eq!(
        vm::switch::select_backend(SwitchMode::Dense, &set),
        Some(Backend::Dense)
    );
}
