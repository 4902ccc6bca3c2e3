//! Type class instance resolution
//!
//! Instance-implicit side conditions of rewrite lemmas are discharged by
//! searching a priority-ordered instance table with a depth-first
//! resolver:
//!
//! 1. Extract the class name from the target type
//! 2. Try each registered instance in priority order
//! 3. Match the instance's conclusion against the target
//! 4. Recursively resolve the instance's own instance-implicit premises

use simp5_kernel::{Expr, Name};
use std::collections::HashMap;

use crate::ctx::SimpCtx;
use crate::meta::{has_metavar, match_pattern, meta_fvar, MetaCtx};

/// Default instance priority
pub const DEFAULT_PRIORITY: u32 = 100;

/// Depth bound for recursive instance search
const MAX_RESOLVE_DEPTH: u32 = 32;

/// Information about a registered type class
#[derive(Clone, Debug)]
pub struct ClassInfo {
    pub name: Name,
    pub num_params: usize,
}

/// Information about a type class instance
#[derive(Clone, Debug)]
pub struct InstanceInfo {
    /// Name of the instance constant
    pub name: Name,
    /// Name of the class this instance implements
    pub class_name: Name,
    /// The instance type (Pi-closed over its premises)
    pub ty: Expr,
    /// Priority (higher = tried first)
    pub priority: u32,
}

/// Instance table for efficient lookup
#[derive(Clone, Debug, Default)]
pub struct InstanceTable {
    classes: HashMap<Name, ClassInfo>,
    /// Instances by class name, sorted by priority (highest first)
    instances: HashMap<Name, Vec<InstanceInfo>>,
}

impl InstanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_class(&mut self, name: Name, num_params: usize) {
        self.classes
            .insert(name.clone(), ClassInfo { name, num_params });
    }

    pub fn is_class(&self, name: &Name) -> bool {
        self.classes.contains_key(name)
    }

    pub fn get_class(&self, name: &Name) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    /// Add an instance, keeping the per-class list sorted by priority.
    pub fn add_instance(&mut self, name: Name, class_name: Name, ty: Expr, priority: u32) {
        let info = InstanceInfo {
            name,
            class_name: class_name.clone(),
            ty,
            priority,
        };
        let instances = self.instances.entry(class_name).or_default();
        let pos = instances
            .iter()
            .position(|i| i.priority < priority)
            .unwrap_or(instances.len());
        instances.insert(pos, info);
    }

    pub fn get_instances(&self, class_name: &Name) -> &[InstanceInfo] {
        self.instances.get(class_name).map_or(&[], Vec::as_slice)
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn num_instances(&self) -> usize {
        self.instances.values().map(Vec::len).sum()
    }
}

/// Extract the class name and arguments from a type expression.
pub fn extract_class_app(ty: &Expr) -> Option<(Name, Vec<Expr>)> {
    match ty.strip_mdata().get_app_fn() {
        Expr::Const(name, _) => Some((name.clone(), ty.get_app_args())),
        _ => None,
    }
}

/// Synthesize an instance of the given (metavariable-free) target type.
pub fn synth_instance(ctx: &mut SimpCtx<'_>, target: &Expr) -> Option<Expr> {
    synth_instance_core(ctx, target, 0)
}

fn synth_instance_core(ctx: &mut SimpCtx<'_>, target: &Expr, depth: u32) -> Option<Expr> {
    if depth > MAX_RESOLVE_DEPTH || has_metavar(target) {
        return None;
    }
    let (class_name, _) = extract_class_app(target)?;
    let table = ctx.instances;
    for inst in table.get_instances(&class_name) {
        if let Some(e) = try_instance(ctx, inst, target, depth) {
            return Some(e);
        }
    }
    None
}

fn try_instance(
    ctx: &mut SimpCtx<'_>,
    inst: &InstanceInfo,
    target: &Expr,
    depth: u32,
) -> Option<Expr> {
    // Open the instance's premises as fresh metavariables.
    let mut metas = MetaCtx::new(0);
    let mut concl = inst.ty.clone();
    let mut premises = Vec::new();
    loop {
        let Expr::Pi(bi, dom, body) = &concl else { break };
        let i = metas.push_emeta(dom.as_ref().clone(), bi.is_inst_implicit());
        premises.push(i);
        let next = body.instantiate(&meta_fvar(i));
        concl = next;
    }

    if !match_pattern(ctx, &mut metas, &concl, target) {
        return None;
    }

    // Resolve remaining premises; only instance-implicit ones may search.
    for &i in &premises {
        if metas.is_eassigned(i) {
            continue;
        }
        let prem_ty = metas.instantiate(&metas.etype(i));
        if has_metavar(&prem_ty) {
            return None;
        }
        if metas.is_instance(i) {
            let v = synth_instance_core(ctx, &prem_ty, depth + 1)?;
            metas.assign(i, v);
        } else {
            return None;
        }
    }

    let result = Expr::apps(
        Expr::const_(inst.name.clone(), vec![]),
        premises
            .iter()
            .map(|&i| metas.instantiate(&meta_fvar(i)))
            .collect::<Vec<_>>(),
    );
    if has_metavar(&result) {
        return None;
    }
    Some(result)
}
