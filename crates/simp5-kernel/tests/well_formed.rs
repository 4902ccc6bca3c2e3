//! Well-formedness of the installed core declarations: every constant's
//! type must itself type check to a sort, and every definition's value
//! must check against its declared type.

use simp5_kernel::{Environment, Expr, Name, TypeChecker};

#[test]
fn core_constant_types_are_well_formed() {
    let mut env = Environment::new();
    env.init_core().unwrap();

    let names: Vec<Name> = env.constants().map(|c| c.name.clone()).collect();
    assert!(!names.is_empty());
    for name in names {
        let info = env.get_const(&name).unwrap().clone();
        let mut tc = TypeChecker::new(&env);
        let sort = tc
            .infer_type(&info.ty)
            .unwrap_or_else(|e| panic!("type of '{name}' is ill-formed: {e}"));
        assert!(
            matches!(tc.whnf(&sort), Expr::Sort(_)),
            "type of '{name}' does not live in a sort: {sort:?}"
        );
    }
}

#[test]
fn definitions_check_against_their_types() {
    let mut env = Environment::new();
    env.init_core().unwrap();

    let defs: Vec<(Name, Expr, Expr)> = env
        .constants()
        .filter_map(|c| c.value.clone().map(|v| (c.name.clone(), c.ty.clone(), v)))
        .collect();
    for (name, ty, value) in defs {
        let mut tc = TypeChecker::new(&env);
        let inferred = tc
            .infer_type(&value)
            .unwrap_or_else(|e| panic!("value of '{name}' is ill-typed: {e}"));
        assert!(
            tc.is_def_eq(&inferred, &ty),
            "value of '{name}' has type {inferred:?}, declared {ty:?}"
        );
    }
}
