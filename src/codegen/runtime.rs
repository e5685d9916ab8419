//! Entry points of the language runtime that lowered code calls into. They
//! are declared in the output module the first time they are used.

use fnv::FnvHashMap;

use super::CodegenCtx;
use crate::{
    ast::{AggId, Type},
    lir::{self, FnType, IrType, Value},
    target::CallConv,
};

/// Parameter and result shapes of runtime functions, resolved against the
/// target's pointer width.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Rt {
    Void,
    Int,
    SizeT,
    Ptr,
    PtrPtr,
    /// `{size_t, i8*}` by value.
    Array,
    /// Pointer to an `{size_t, i8*}`.
    ArrayPtr,
    Class,
}

struct RuntimeFn {
    ret: Rt,
    params: &'static [Rt],
}

lazy_static! {
    static ref RUNTIME: FnvHashMap<&'static str, RuntimeFn> = {
        use Rt::*;

        let mut m = FnvHashMap::default();
        m.insert("_d_assert", RuntimeFn { ret: Void, params: &[Array, Int] });
        m.insert("_d_assert_msg", RuntimeFn { ret: Void, params: &[Array, Array, Int] });
        m.insert("_d_allocmemory", RuntimeFn { ret: Ptr, params: &[SizeT] });
        m.insert("_d_allocclass", RuntimeFn { ret: Ptr, params: &[Class] });
        m.insert("_d_delmemory", RuntimeFn { ret: Void, params: &[Ptr] });
        m.insert("_d_newarrayT", RuntimeFn { ret: Ptr, params: &[Ptr, SizeT] });
        m.insert("_d_arrayliteralT", RuntimeFn { ret: Ptr, params: &[Ptr, SizeT] });
        m.insert("_d_arraysetlengthT", RuntimeFn { ret: Array, params: &[Ptr, SizeT, ArrayPtr] });
        m.insert("_d_arraycatT", RuntimeFn { ret: Array, params: &[Ptr, Array, Array] });
        m.insert("_d_arrayappendT", RuntimeFn { ret: Array, params: &[Ptr, ArrayPtr, Array] });
        m.insert("_d_arrayappendcT", RuntimeFn { ret: Array, params: &[Ptr, ArrayPtr, Ptr] });
        m.insert("_adEq", RuntimeFn { ret: Int, params: &[Array, Array, Ptr] });
        m.insert("_adCmp", RuntimeFn { ret: Int, params: &[Array, Array, Ptr] });
        m.insert("_aaGet", RuntimeFn { ret: Ptr, params: &[PtrPtr, Ptr, SizeT, Ptr] });
        m.insert("_aaIn", RuntimeFn { ret: Ptr, params: &[Ptr, Ptr, Ptr] });
        m.insert("_d_dynamic_cast", RuntimeFn { ret: Ptr, params: &[Ptr, Class] });
        m
    };
}

impl<'a> CodegenCtx<'a> {
    fn rt_type(&self, rt: Rt) -> IrType {
        match rt {
            Rt::Void => IrType::Void,
            Rt::Int => IrType::i32(),
            Rt::SizeT => self.ir.size_t(),
            Rt::Ptr | Rt::Class => IrType::i8_ptr(),
            Rt::PtrPtr => IrType::i8_ptr().ptr_to(),
            Rt::Array => IrType::Struct(vec![self.ir.size_t(), IrType::i8_ptr()]),
            Rt::ArrayPtr => self.rt_type(Rt::Array).ptr_to(),
        }
    }

    /// The address of a runtime function, declaring it on first use.
    pub(crate) fn runtime_fn(&mut self, name: &str) -> Value {
        let sig = match RUNTIME.get(name) {
            Some(sig) => sig,
            None => bug!("unknown runtime function {}", name),
        };
        let ty = FnType {
            ret: self.rt_type(sig.ret),
            params: sig.params.iter().map(|p| self.rt_type(*p)).collect(),
            c_varargs: false,
        };
        let idx = self
            .ir
            .declare_function(name, ty, CallConv::C, lir::Linkage::External);
        self.ir.func_value(idx)
    }

    /// Calls a runtime function, bitcasting pointer and array arguments to
    /// the generic shapes of its signature.
    pub(crate) fn call_runtime(&mut self, name: &str, args: Vec<Value>) -> Value {
        let callee = self.runtime_fn(name);
        let params = match callee.ty.fn_type() {
            Some(ft) => ft.params.clone(),
            None => bug!("runtime function {} has no signature", name),
        };
        if params.len() != args.len() {
            bug!("{} takes {} arguments, got {}", name, params.len(), args.len());
        }
        let args = args
            .into_iter()
            .zip(params.into_iter())
            .map(|(arg, want)| self.coerce_runtime_arg(arg, want))
            .collect();
        log::debug!("calling runtime {}", name);
        self.call(callee, args, CallConv::C)
    }

    fn coerce_runtime_arg(&mut self, arg: Value, want: IrType) -> Value {
        if arg.ty == want {
            return arg;
        }
        match (&arg.ty, &want) {
            (IrType::Ptr(_), IrType::Ptr(_)) => self.bitcast(arg, want),
            (IrType::Int(_), IrType::Int(_)) => {
                if arg.is_const() {
                    return Value::const_int(want, arg.as_const_int().unwrap_or(0));
                }
                let op = if arg.ty.int_bits() < want.int_bits() {
                    lir::CastOp::ZExt
                } else {
                    lir::CastOp::Trunc
                };
                self.cast(op, arg, want)
            }
            // arrays of any element type go through memory as `{size_t, i8*}`
            (IrType::Struct(_), IrType::Struct(_)) => {
                if let Some(elems) = arg.elements() {
                    let ptr = Value::const_bitcast(elems[1].clone(), IrType::i8_ptr());
                    return Value::aggregate(want, vec![elems[0].clone(), ptr]);
                }
                if arg.is_zero() {
                    return Value::zero(want);
                }
                let mem = self.alloca(arg.ty.clone(), "rtarg");
                self.store(arg, mem.clone());
                let cast = self.bitcast(mem, want.ptr_to());
                self.load(cast)
            }
            _ => bug!("cannot pass {} as {} to the runtime", arg, want),
        }
    }

    /// The external type information object describing `ty`.
    pub(crate) fn typeinfo(&mut self, ty: &Type) -> Value {
        let name = format!("TypeInfo_{}", ty.mangle(self.src));
        self.external_object(&name)
    }

    pub(crate) fn classinfo(&mut self, agg: AggId) -> Value {
        let name = format!("ClassInfo_{}", self.src.agg(agg).mangled);
        self.external_object(&name)
    }

    fn external_object(&mut self, name: &str) -> Value {
        self.ir.add_global(lir::Global {
            name: name.to_string(),
            ty: IrType::i8(),
            init: None,
            constant: true,
            linkage: lir::Linkage::External,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use crate::lir::IrType;

    #[test]
    fn runtime_functions_are_declared_once() {
        let t = TestModule::new();
        let mut ctx = t.ctx();
        let a = ctx.runtime_fn("_d_allocmemory");
        let b = ctx.runtime_fn("_d_allocmemory");
        assert_eq!(a, b);
        assert_eq!(ctx.ir.funcs.len(), 1);
        let f = ctx.ir.function("_d_allocmemory").unwrap();
        assert_eq!(f.ty.params, vec![IrType::Int(64)]);
        assert!(f.is_declaration());
    }

    #[test]
    #[should_panic(expected = "COMPILER BUG")]
    fn unknown_runtime_functions_are_a_bug() {
        let t = TestModule::new();
        let mut ctx = t.ctx();
        ctx.runtime_fn("_d_nonsense");
    }

    #[test]
    fn typeinfo_objects_are_external_and_shared() {
        let t = TestModule::new();
        let mut ctx = t.ctx();
        let a = ctx.typeinfo(&Type::int());
        let b = ctx.typeinfo(&Type::int());
        assert_eq!(a, b);
        assert_eq!(ctx.ir.globals.len(), 1);
        assert_eq!(ctx.ir.globals[0].name, "TypeInfo_i");
        assert!(ctx.ir.globals[0].init.is_none());
    }
}
