#![no_main]

use armature_expr::Expr;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Expr::parse should never panic on any input
    let _ = Expr::parse(data);
});
