//! Arithmetic, comparisons, conversions and the boolean view of values.

use super::{Codegen, CodegenCtx, DValue};
use crate::{
    ast::{AggId, BinOp, CmpOp, Expr, PostOp, Type},
    errors::{LowerError, LowerResult},
    lir::{CastOp, Const, FloatPred, IntPred, IrType, Op, Value, ValueKind},
    span::Loc,
};

fn float_rank(t: &IrType) -> u32 {
    match t {
        IrType::F32 => 0,
        IrType::F64 => 1,
        _ => 2,
    }
}

impl<'a> CodegenCtx<'a> {
    pub(crate) fn lower_binary(&mut self, e: &Expr, op: BinOp, lhs: &Expr, rhs: &Expr) -> LowerResult<DValue> {
        let l = lhs.codegen(self)?;
        let r = rhs.codegen(self)?;
        self.binop_values(op, &e.ty, &l, &r, &e.loc)
    }

    /// `l op r` with both operands already lowered.
    pub(crate) fn binop_values(
        &mut self,
        op: BinOp,
        ty: &Type,
        l: &DValue,
        r: &DValue,
        loc: &Loc,
    ) -> LowerResult<DValue> {
        let m = self.src;
        let lt = l.ty().to_base(m);
        let rt = r.ty().to_base(m);
        let rty = ty.to_base(m);

        if lt.is_pointer() && rt.is_integral() && matches!(op, BinOp::Add | BinOp::Sub) {
            return Ok(self.ptr_add(ty, l, r, op == BinOp::Sub));
        }
        if lt.is_pointer() && rt.is_pointer() && op == BinOp::Sub {
            return Ok(self.ptr_diff(ty, l, r));
        }
        if rty.is_complex() || lt.is_complex() || rt.is_complex() {
            return self.complex_op(op, ty, l, r, loc);
        }

        let is_float = rty.is_floating();
        let unsigned = rty.is_unsigned();
        let a = self.rval(l);
        let mut b = self.rval(r);
        if !is_float && a.ty != b.ty && a.ty.is_int() && b.ty.is_int() {
            b = self.int_cast(b, a.ty.clone(), !rt.is_unsigned());
        }
        let irop = match (op, is_float) {
            (BinOp::Add, false) => Op::Add,
            (BinOp::Add, true) => Op::FAdd,
            (BinOp::Sub, false) => Op::Sub,
            (BinOp::Sub, true) => Op::FSub,
            (BinOp::Mul, false) => Op::Mul,
            (BinOp::Mul, true) => Op::FMul,
            (BinOp::Div, true) => Op::FDiv,
            (BinOp::Div, false) if unsigned => Op::UDiv,
            (BinOp::Div, false) => Op::SDiv,
            (BinOp::Mod, true) => Op::FRem,
            (BinOp::Mod, false) if unsigned => Op::URem,
            (BinOp::Mod, false) => Op::SRem,
            (BinOp::And, false) => Op::And,
            (BinOp::Or, false) => Op::Or,
            (BinOp::Xor, false) => Op::Xor,
            (BinOp::Shl, false) => Op::Shl,
            (BinOp::Shr, false) if unsigned => Op::LShr,
            (BinOp::Shr, false) => Op::AShr,
            (BinOp::Ushr, false) => Op::LShr,
            (op, true) => {
                return Err(LowerError::compile(
                    format!("`{}` is not defined on `{}`", op, ty.name(m)),
                    loc,
                ))
            }
        };
        let mut res = self.bin(irop, a, b);
        // i * i and i / i leave the imaginary axis
        if lt.is_imaginary() && rt.is_imaginary() && op == BinOp::Mul && !rty.is_imaginary() {
            let zero = Value::const_float(res.ty.clone(), -0.0);
            res = self.bin(Op::FSub, zero, res);
        }
        Ok(DValue::imm(ty.clone(), res))
    }

    /// Pointer plus or minus an element count. A constant zero offset hands
    /// back the pointer itself.
    pub(crate) fn ptr_add(&mut self, ty: &Type, ptr: &DValue, idx: &DValue, negate: bool) -> DValue {
        let p = self.rval(ptr);
        let i = self.rval(idx);
        if i.is_zero() {
            return DValue::imm(ty.clone(), p);
        }
        let size_t = self.ir.size_t();
        let signed = !idx.ty().is_unsigned();
        let mut i = self.int_cast(i, size_t.clone(), signed);
        if negate {
            i = match i.as_const_int() {
                Some(n) => Value::const_int(size_t, n.wrapping_neg()),
                None => self.bin(Op::Sub, Value::const_int(size_t, 0), i),
            };
        }
        let res = self.offset(p, i);
        let irty = self.ir_type(ty);
        let res = self.bitcast(res, irty);
        DValue::imm(ty.clone(), res)
    }

    fn ptr_diff(&mut self, ty: &Type, l: &DValue, r: &DValue) -> DValue {
        let size_t = self.ir.size_t();
        let a = self.rval(l);
        let a = self.cast(CastOp::PtrToInt, a, size_t.clone());
        let b = self.rval(r);
        let b = self.cast(CastOp::PtrToInt, b, size_t);
        let diff = self.bin(Op::Sub, a, b);
        let irty = self.ir_type(ty);
        let res = match irty {
            IrType::Ptr(_) => self.cast(CastOp::IntToPtr, diff, irty),
            IrType::Int(_) => self.int_cast(diff, irty, true),
            _ => diff,
        };
        DValue::imm(ty.clone(), res)
    }

    //
    // complex numbers
    //

    /// Real and imaginary parts of a real, imaginary, complex or integral
    /// value, converted to `part`.
    pub(crate) fn complex_parts(&mut self, v: &DValue, part: &IrType) -> (Value, Value) {
        let t = v.ty().to_base(self.src);
        let zero = Value::const_float(part.clone(), 0.0);
        let (re, im) = if t.is_complex() {
            match v {
                DValue::Complex { re, im, .. } => (re.clone(), im.clone()),
                _ => match v.as_const().and_then(|c| c.elements()).map(|e| e.to_vec()) {
                    Some(elems) => (elems[0].clone(), elems[1].clone()),
                    None if v.is_null() => (zero.clone(), zero),
                    None => {
                        let addr = self.spill(v, "tmpcomplex");
                        let re = self.gepi(addr.clone(), 0, 0);
                        let re = self.load(re);
                        let im = self.gepi(addr, 0, 1);
                        let im = self.load(im);
                        (re, im)
                    }
                },
            }
        } else if t.is_imaginary() {
            (zero, self.rval(v))
        } else if t.is_integral() {
            let x = self.rval(v);
            let op = if t.is_unsigned() { CastOp::UIToFP } else { CastOp::SIToFP };
            (self.cast(op, x, part.clone()), zero)
        } else {
            (self.rval(v), zero)
        };
        (self.fp_cast(re, part.clone()), self.fp_cast(im, part.clone()))
    }

    fn complex_op(&mut self, op: BinOp, ty: &Type, l: &DValue, r: &DValue, loc: &Loc) -> LowerResult<DValue> {
        let part = self.complex_part_type(ty);
        let (a, b) = self.complex_parts(l, &part);
        let (c, d) = self.complex_parts(r, &part);
        let (re, im) = match op {
            BinOp::Add => (self.bin(Op::FAdd, a, c), self.bin(Op::FAdd, b, d)),
            BinOp::Sub => (self.bin(Op::FSub, a, c), self.bin(Op::FSub, b, d)),
            BinOp::Mul => {
                let ac = self.bin(Op::FMul, a.clone(), c.clone());
                let bd = self.bin(Op::FMul, b.clone(), d.clone());
                let ad = self.bin(Op::FMul, a, d);
                let bc = self.bin(Op::FMul, b, c);
                (self.bin(Op::FSub, ac, bd), self.bin(Op::FAdd, ad, bc))
            }
            BinOp::Div => {
                let cc = self.bin(Op::FMul, c.clone(), c.clone());
                let dd = self.bin(Op::FMul, d.clone(), d.clone());
                let denom = self.bin(Op::FAdd, cc, dd);
                let ac = self.bin(Op::FMul, a.clone(), c.clone());
                let bd = self.bin(Op::FMul, b.clone(), d.clone());
                let bc = self.bin(Op::FMul, b, c);
                let ad = self.bin(Op::FMul, a, d);
                let re = self.bin(Op::FAdd, ac, bd);
                let im = self.bin(Op::FSub, bc, ad);
                (
                    self.bin(Op::FDiv, re, denom.clone()),
                    self.bin(Op::FDiv, im, denom),
                )
            }
            op => {
                return Err(LowerError::compile(
                    format!("`{}` is not defined on complex numbers", op),
                    loc,
                ))
            }
        };
        Ok(DValue::Complex {
            ty: ty.clone(),
            re,
            im,
        })
    }

    //
    // unary operators
    //

    pub(crate) fn lower_neg(&mut self, e: &Expr, inner: &Expr) -> LowerResult<DValue> {
        let v = inner.codegen(self)?;
        let t = e.ty.to_base(self.src);
        if t.is_complex() {
            let part = self.complex_part_type(&t);
            let (re, im) = self.complex_parts(&v, &part);
            let re = self.bin(Op::FSub, Value::const_float(part.clone(), -0.0), re);
            let im = self.bin(Op::FSub, Value::const_float(part, -0.0), im);
            return Ok(DValue::Complex {
                ty: e.ty.clone(),
                re,
                im,
            });
        }
        let x = self.rval(&v);
        let res = if x.ty.is_float() {
            self.bin(Op::FSub, Value::const_float(x.ty.clone(), -0.0), x)
        } else {
            self.bin(Op::Sub, Value::const_int(x.ty.clone(), 0), x)
        };
        Ok(DValue::imm(e.ty.clone(), res))
    }

    pub(crate) fn lower_com(&mut self, e: &Expr, inner: &Expr) -> LowerResult<DValue> {
        let v = inner.codegen(self)?;
        let x = self.rval(&v);
        let ones = Value::const_int(x.ty.clone(), u64::MAX >> (64 - x.ty.int_bits().unwrap_or(64)));
        let res = self.bin(Op::Xor, x, ones);
        Ok(DValue::imm(e.ty.clone(), res))
    }

    pub(crate) fn lower_not(&mut self, e: &Expr, inner: &Expr) -> LowerResult<DValue> {
        let v = inner.codegen(self)?;
        let b = self.to_bool(&v, &inner.loc)?;
        let res = self.icmp(IntPred::Eq, b, Value::const_bool(false));
        Ok(DValue::imm(e.ty.clone(), res))
    }

    pub(crate) fn lower_post(&mut self, e: &Expr, op: PostOp, inner: &Expr) -> LowerResult<DValue> {
        let v = inner.codegen(self)?;
        let addr = self.lval(&v, &inner.loc)?;
        let old = self.rval(&v);
        let new = match &old.ty {
            IrType::Ptr(_) => {
                let step = match op {
                    PostOp::Inc => 1,
                    PostOp::Dec => u64::MAX,
                };
                let step = self.const_size(step);
                self.offset(old.clone(), step)
            }
            t if t.is_float() => {
                let one = Value::const_float(t.clone(), 1.0);
                let op = if op == PostOp::Inc { Op::FAdd } else { Op::FSub };
                self.bin(op, old.clone(), one)
            }
            t => {
                let one = Value::const_int(t.clone(), 1);
                let op = if op == PostOp::Inc { Op::Add } else { Op::Sub };
                self.bin(op, old.clone(), one)
            }
        };
        self.store(new, addr);
        Ok(DValue::imm(e.ty.clone(), old))
    }

    pub(crate) fn lower_bin_assign(&mut self, e: &Expr, op: BinOp, lhs: &Expr, rhs: &Expr) -> LowerResult<DValue> {
        let l = lhs.codegen(self)?;
        let r = rhs.codegen(self)?;
        let res = self.binop_values(op, &lhs.ty, &l, &r, &e.loc)?;
        let res = self.cast_to(res, &lhs.ty, &e.loc)?;
        self.assign(&l, &res, &e.loc)?;
        Ok(l)
    }

    //
    // comparisons
    //

    pub(crate) fn lower_cmp(&mut self, e: &Expr, op: CmpOp, lhs: &Expr, rhs: &Expr) -> LowerResult<DValue> {
        let l = lhs.codegen(self)?;
        let r = rhs.codegen(self)?;
        let t = l.ty().to_base(self.src);

        if let Type::DArray(elem) | Type::SArray(elem, _) = &t {
            let ti = self.typeinfo(elem);
            let a = self.array_value(&l);
            let b = self.array_value(&r);
            let res = self.call_runtime("_adCmp", vec![a, b, ti]);
            let pred = match op {
                CmpOp::Lt | CmpOp::Ul => IntPred::Slt,
                CmpOp::Le | CmpOp::Ule => IntPred::Sle,
                CmpOp::Gt | CmpOp::Ug => IntPred::Sgt,
                CmpOp::Ge | CmpOp::Uge => IntPred::Sge,
                CmpOp::Lg => IntPred::Ne,
                CmpOp::Ue => IntPred::Eq,
                CmpOp::Leg | CmpOp::Unord => {
                    let always = op == CmpOp::Leg;
                    return Ok(DValue::Const {
                        ty: e.ty.clone(),
                        val: Value::const_bool(always),
                    });
                }
            };
            let zero = Value::const_int(IrType::i32(), 0);
            let res = self.icmp(pred, res, zero);
            return Ok(DValue::imm(e.ty.clone(), res));
        }

        if t.is_complex() {
            return Err(LowerError::compile("complex numbers have no ordering", &e.loc));
        }

        let a = self.rval(&l);
        let b = self.rval(&r);
        let res = if t.is_floating() {
            let pred = match op {
                CmpOp::Lt => FloatPred::Olt,
                CmpOp::Le => FloatPred::Ole,
                CmpOp::Gt => FloatPred::Ogt,
                CmpOp::Ge => FloatPred::Oge,
                CmpOp::Unord => FloatPred::Uno,
                CmpOp::Lg => FloatPred::One,
                CmpOp::Leg => FloatPred::Ord,
                CmpOp::Ule => FloatPred::Ule,
                CmpOp::Ul => FloatPred::Ult,
                CmpOp::Uge => FloatPred::Uge,
                CmpOp::Ug => FloatPred::Ugt,
                CmpOp::Ue => FloatPred::Ueq,
            };
            self.fcmp(pred, a, b)
        } else {
            let unsigned = t.is_unsigned() || !t.is_integral();
            let pred = match (op, unsigned) {
                (CmpOp::Lt, false) | (CmpOp::Ul, false) => IntPred::Slt,
                (CmpOp::Le, false) | (CmpOp::Ule, false) => IntPred::Sle,
                (CmpOp::Gt, false) | (CmpOp::Ug, false) => IntPred::Sgt,
                (CmpOp::Ge, false) | (CmpOp::Uge, false) => IntPred::Sge,
                (CmpOp::Lt, true) | (CmpOp::Ul, true) => IntPred::Ult,
                (CmpOp::Le, true) | (CmpOp::Ule, true) => IntPred::Ule,
                (CmpOp::Gt, true) | (CmpOp::Ug, true) => IntPred::Ugt,
                (CmpOp::Ge, true) | (CmpOp::Uge, true) => IntPred::Uge,
                (CmpOp::Lg, _) => IntPred::Ne,
                (CmpOp::Ue, _) => IntPred::Eq,
                // integers are always ordered
                (CmpOp::Leg, _) | (CmpOp::Unord, _) => {
                    return Ok(DValue::Const {
                        ty: e.ty.clone(),
                        val: Value::const_bool(op == CmpOp::Leg),
                    })
                }
            };
            let b = self.coerce_operand(b, &a.ty);
            self.icmp(pred, a, b)
        };
        Ok(DValue::imm(e.ty.clone(), res))
    }

    pub(crate) fn lower_equal(
        &mut self,
        e: &Expr,
        eq: bool,
        identity: bool,
        lhs: &Expr,
        rhs: &Expr,
    ) -> LowerResult<DValue> {
        let l = lhs.codegen(self)?;
        let r = rhs.codegen(self)?;
        let t = l.ty().to_base(self.src);
        let (ipred, fpred, join) = if eq {
            (IntPred::Eq, FloatPred::Oeq, Op::And)
        } else {
            (IntPred::Ne, FloatPred::Une, Op::Or)
        };

        let res = match &t {
            Type::DArray(_) | Type::SArray(..) if identity => {
                let (la, lp) = (self.array_len(&l), self.array_ptr(&l));
                let (ra, rp) = (self.array_len(&r), self.array_ptr(&r));
                let rp = self.coerce_operand(rp, &lp.ty);
                let len = self.icmp(ipred, la, ra);
                let ptr = self.icmp(ipred, lp, rp);
                self.bin(join, len, ptr)
            }
            Type::DArray(elem) | Type::SArray(elem, _) => {
                let ti = self.typeinfo(elem);
                let a = self.array_value(&l);
                let b = self.array_value(&r);
                let res = self.call_runtime("_adEq", vec![a, b, ti]);
                let pred = if eq { IntPred::Ne } else { IntPred::Eq };
                self.icmp(pred, res, Value::const_int(IrType::i32(), 0))
            }
            Type::Delegate(_) => {
                let la = self.spill(&l, "dgcmp");
                let ra = self.spill(&r, "dgcmp");
                let mut parts = vec![];
                for i in 0..2 {
                    let x = self.gepi(la.clone(), 0, i);
                    let x = self.load(x);
                    let y = self.gepi(ra.clone(), 0, i);
                    let y = self.load(y);
                    let y = self.coerce_operand(y, &x.ty);
                    parts.push(self.icmp(ipred, x, y));
                }
                let second = parts.pop();
                let first = parts.pop();
                match (first, second) {
                    (Some(a), Some(b)) => self.bin(join, a, b),
                    _ => bug!("delegate comparison lost its halves"),
                }
            }
            t if t.is_complex() => {
                let part = self.complex_part_type(t);
                let (a, b) = self.complex_parts(&l, &part);
                let (c, d) = self.complex_parts(&r, &part);
                let re = self.fcmp(fpred, a, c);
                let im = self.fcmp(fpred, b, d);
                self.bin(join, re, im)
            }
            t if t.is_floating() => {
                let a = self.rval(&l);
                let b = self.rval(&r);
                self.fcmp(fpred, a, b)
            }
            Type::Struct(_) => {
                return Err(LowerError::unsupported(
                    "struct equality must be rewritten before lowering",
                    &e.loc,
                ))
            }
            _ => {
                let a = self.rval(&l);
                let b = self.rval(&r);
                let b = self.coerce_operand(b, &a.ty);
                self.icmp(ipred, a, b)
            }
        };
        Ok(DValue::imm(e.ty.clone(), res))
    }

    /// Matches a pointer or integer operand to the type of the other side.
    fn coerce_operand(&mut self, v: Value, to: &IrType) -> Value {
        if &v.ty == to {
            return v;
        }
        match (&v.ty, to) {
            (IrType::Ptr(_), IrType::Ptr(_)) => self.bitcast(v, to.clone()),
            (IrType::Int(_), IrType::Int(_)) => self.int_cast(v, to.clone(), true),
            _ => v,
        }
    }

    //
    // conversions
    //

    /// The `i1` truth value of `v`.
    pub fn to_bool(&mut self, v: &DValue, loc: &Loc) -> LowerResult<Value> {
        let t = v.ty().to_base(self.src);
        Ok(match &t {
            t if t.is_bool() => self.rval(v),
            t if t.is_complex() => {
                let part = self.complex_part_type(t);
                let (re, im) = self.complex_parts(v, &part);
                let zero = Value::const_float(part, 0.0);
                let re = self.fcmp(FloatPred::Une, re, zero.clone());
                let im = self.fcmp(FloatPred::Une, im, zero);
                self.bin(Op::Or, re, im)
            }
            t if t.is_floating() => {
                let x = self.rval(v);
                let zero = Value::const_float(x.ty.clone(), 0.0);
                self.fcmp(FloatPred::Une, x, zero)
            }
            t if t.is_integral() => {
                let x = self.rval(v);
                let zero = Value::const_int(x.ty.clone(), 0);
                self.icmp(IntPred::Ne, x, zero)
            }
            Type::Pointer(_) | Type::Class(_) | Type::AArray(..) | Type::Null | Type::Function(_) => {
                let x = self.rval(v);
                let null = Value::null(x.ty.clone());
                self.icmp(IntPred::Ne, x, null)
            }
            Type::DArray(_) => {
                let len = self.array_len(v);
                let zero = Value::const_int(len.ty.clone(), 0);
                self.icmp(IntPred::Ne, len, zero)
            }
            Type::Delegate(_) => {
                let addr = self.spill(v, "dgbool");
                let fptr = self.gepi(addr, 0, 1);
                let fptr = self.load(fptr);
                let null = Value::null(fptr.ty.clone());
                self.icmp(IntPred::Ne, fptr, null)
            }
            t => {
                return Err(LowerError::compile(
                    format!("`{}` has no truth value", t.name(self.src)),
                    loc,
                ))
            }
        })
    }

    pub(crate) fn int_cast(&mut self, v: Value, to: IrType, signed: bool) -> Value {
        let (from_bits, to_bits) = match (v.ty.int_bits(), to.int_bits()) {
            (Some(f), Some(t)) => (f, t),
            _ => bug!("integer cast between {} and {}", v.ty, to),
        };
        if from_bits == to_bits {
            return v;
        }
        if let Some(n) = v.as_const_int() {
            let n = if signed && from_bits < 64 && (n >> (from_bits - 1)) & 1 == 1 {
                n | !((1u64 << from_bits) - 1)
            } else {
                n
            };
            let n = if to_bits < 64 { n & ((1u64 << to_bits) - 1) } else { n };
            return Value::const_int(to, n);
        }
        let op = if to_bits < from_bits {
            CastOp::Trunc
        } else if signed && from_bits > 1 {
            CastOp::SExt
        } else {
            CastOp::ZExt
        };
        self.cast(op, v, to)
    }

    pub(crate) fn fp_cast(&mut self, v: Value, to: IrType) -> Value {
        if v.ty == to {
            return v;
        }
        if let ValueKind::Const(Const::Float(x)) = v.kind {
            return Value::const_float(to, x);
        }
        let op = if float_rank(&to) < float_rank(&v.ty) {
            CastOp::FPTrunc
        } else {
            CastOp::FPExt
        };
        self.cast(op, v, to)
    }

    fn is_base_class(&self, derived: AggId, base: AggId) -> bool {
        let mut cur = Some(derived);
        while let Some(id) = cur {
            if id == base {
                return true;
            }
            cur = self.src.agg(id).base;
        }
        false
    }

    pub(crate) fn lower_cast(&mut self, e: &Expr, inner: &Expr) -> LowerResult<DValue> {
        let v = inner.codegen(self)?;
        let keeps_storage = matches!(v, DValue::Var { .. });
        let from_ir = self.ir_type(&inner.ty);
        let to_ir = self.ir_type(&e.ty);
        if keeps_storage && from_ir == to_ir {
            return Ok(v.retag(e.ty.clone()));
        }
        self.cast_to(v, &e.ty, &e.loc)
    }

    /// Converts `v` to the frontend type `to`.
    pub fn cast_to(&mut self, v: DValue, to: &Type, loc: &Loc) -> LowerResult<DValue> {
        let m = self.src;
        let from = v.ty().to_base(m);
        let tob = to.to_base(m);
        let to_ir = self.ir_type(to);

        if let DValue::Null { .. } = v {
            return Ok(DValue::Null {
                ty: to.clone(),
                val: Value::zero(to_ir),
            });
        }
        if from == tob {
            return Ok(v.retag(to.clone()));
        }
        if tob.is_bool() {
            let b = self.to_bool(&v, loc)?;
            return Ok(DValue::imm(to.clone(), b));
        }

        let imm = |val: Value| DValue::imm(to.clone(), val);
        Ok(match (&from, &tob) {
            (f, t) if f.is_integral() && t.is_integral() => {
                let x = self.rval(&v);
                imm(self.int_cast(x, to_ir, !f.is_unsigned()))
            }
            (f, t) if t.is_complex() && (f.is_floating() || f.is_integral()) => {
                let part = self.complex_part_type(t);
                let (re, im) = self.complex_parts(&v, &part);
                DValue::Complex {
                    ty: to.clone(),
                    re,
                    im,
                }
            }
            (f, t) if f.is_complex() && t.is_floating() => {
                let part = self.complex_part_type(f);
                let (re, im) = self.complex_parts(&v, &part);
                let x = if t.is_imaginary() { im } else { re };
                imm(self.fp_cast(x, to_ir))
            }
            (f, t) if f.is_integral() && t.is_floating() => {
                let x = self.rval(&v);
                let op = if f.is_unsigned() { CastOp::UIToFP } else { CastOp::SIToFP };
                imm(self.cast(op, x, to_ir))
            }
            (f, t) if f.is_floating() && t.is_integral() => {
                let x = self.rval(&v);
                let op = if t.is_unsigned() { CastOp::FPToUI } else { CastOp::FPToSI };
                imm(self.cast(op, x, to_ir))
            }
            (f, t) if f.is_floating() && t.is_floating() => {
                let x = self.rval(&v);
                imm(self.fp_cast(x, to_ir))
            }
            (Type::Class(a), Type::Class(b)) => {
                let x = self.rval(&v);
                if self.is_base_class(*a, *b) {
                    imm(self.bitcast(x, to_ir))
                } else {
                    let info = self.classinfo(*b);
                    let res = self.call_runtime("_d_dynamic_cast", vec![x, info]);
                    imm(self.bitcast(res, to_ir))
                }
            }
            (Type::Pointer(_), Type::Pointer(_))
            | (Type::Pointer(_), Type::Class(_))
            | (Type::Class(_), Type::Pointer(_))
            | (Type::Pointer(_), Type::AArray(..))
            | (Type::AArray(..), Type::Pointer(_))
            | (Type::Function(_), Type::Pointer(_)) => {
                let x = self.rval(&v);
                imm(self.bitcast(x, to_ir))
            }
            (f, Type::Pointer(_)) if f.is_integral() => {
                let x = self.rval(&v);
                let size_t = self.ir.size_t();
                let x = self.int_cast(x, size_t, !f.is_unsigned());
                imm(self.cast(CastOp::IntToPtr, x, to_ir))
            }
            (Type::Pointer(_), t) | (Type::Class(_), t) if t.is_integral() => {
                let x = self.rval(&v);
                imm(self.cast(CastOp::PtrToInt, x, to_ir))
            }
            (Type::SArray(_, _), Type::DArray(elem)) | (Type::DArray(_), Type::DArray(elem)) => {
                let len = self.array_len(&v);
                let ptr = self.array_ptr(&v);
                let from_elem = from.next().cloned().unwrap_or_else(Type::void);
                let len = self.rescale_len(len, &from_elem, elem);
                let elem_ir = self.elem_ir_type(elem);
                let ptr = self.bitcast(ptr, elem_ir.ptr_to());
                DValue::Slice {
                    ty: to.clone(),
                    len,
                    ptr,
                }
            }
            (Type::SArray(..), Type::Pointer(_)) | (Type::DArray(_), Type::Pointer(_)) => {
                let ptr = self.array_ptr(&v);
                imm(self.bitcast(ptr, to_ir))
            }
            (Type::DArray(_), Type::SArray(..)) => {
                let ptr = self.array_ptr(&v);
                let addr = self.bitcast(ptr, to_ir.ptr_to());
                DValue::var(to.clone(), addr)
            }
            (Type::Delegate(_), Type::Delegate(_)) => {
                let addr = self.spill(&v, "dgcast");
                let addr = self.bitcast(addr, to_ir.ptr_to());
                DValue::var(to.clone(), addr)
            }
            _ if self.ir_type(&from) == to_ir => v.retag(to.clone()),
            _ => {
                return Err(LowerError::unsupported(
                    format!("cast from `{}` to `{}`", from.name(m), tob.name(m)),
                    loc,
                ))
            }
        })
    }

    /// Element type in memory; `void[]` counts bytes.
    pub(crate) fn elem_ir_type(&mut self, elem: &Type) -> IrType {
        if elem.is_void() {
            IrType::i8()
        } else {
            self.ir_type(elem)
        }
    }

    /// Length of an array reinterpreted with a different element size.
    fn rescale_len(&mut self, len: Value, from: &Type, to: &Type) -> Value {
        let fi = self.elem_ir_type(from);
        let ti = self.elem_ir_type(to);
        let fsize = self.ir.alloc_size(&fi);
        let tsize = self.ir.alloc_size(&ti);
        if fsize == tsize {
            return len;
        }
        if let Some(n) = len.as_const_int() {
            return self.const_size(n * fsize / tsize);
        }
        let bytes = self.bin(Op::Mul, len, self.const_size(fsize));
        self.bin(Op::UDiv, bytes, self.const_size(tsize))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use crate::lir::{CastOp, Inst, IrType, Op};

    #[test]
    fn adding_constant_zero_to_a_pointer_emits_no_offset() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let p = t.m.add_local(f, "p", Type::int().ptr_to());
        let add = t.binary(BinOp::Add, t.var(p), t.int(0), Type::int().ptr_to());
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(p);
        let v = add.codegen(&mut ctx).unwrap();
        assert_eq!(ctx.count(|i| matches!(i, Inst::Gep { .. })), 0);
        assert_eq!(v.ty(), &Type::int().ptr_to());
    }

    #[test]
    fn pointer_offsets_scale_through_gep() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let p = t.m.add_local(f, "p", Type::int().ptr_to());
        let sub = t.binary(BinOp::Sub, t.var(p), t.int(2), Type::int().ptr_to());
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(p);
        sub.codegen(&mut ctx).unwrap();
        assert_eq!(ctx.count(|i| matches!(i, Inst::Gep { .. })), 1);
        assert_eq!(ctx.count(|i| matches!(i, Inst::Bin { .. })), 0);
    }

    #[test]
    fn unsigned_division_uses_udiv() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let a = t.m.add_local(f, "a", Type::Basic(Basic::UInt));
        let div = t.binary(BinOp::Div, t.var(a), t.typed_int(3, Type::Basic(Basic::UInt)), Type::Basic(Basic::UInt));
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(a);
        div.codegen(&mut ctx).unwrap();
        assert_eq!(ctx.count(|i| matches!(i, Inst::Bin { op: Op::UDiv, .. })), 1);
    }

    #[test]
    fn complex_multiplication_expands_into_parts() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let cd = Type::Basic(Basic::CDouble);
        let a = t.m.add_local(f, "a", cd.clone());
        let mul = t.binary(BinOp::Mul, t.var(a), t.var(a), cd);
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(a);
        let v = mul.codegen(&mut ctx).unwrap();
        assert!(matches!(v, DValue::Complex { .. }));
        assert_eq!(ctx.count(|i| matches!(i, Inst::Bin { op: Op::FMul, .. })), 4);
    }

    #[test]
    fn narrowing_integer_casts_truncate() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let a = t.m.add_local(f, "a", Type::int());
        let cast = t.expr(ExprKind::Cast(Box::new(t.var(a))), Type::Basic(Basic::UByte));
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(a);
        let v = cast.codegen(&mut ctx).unwrap();
        assert_eq!(ctx.count(|i| matches!(i, Inst::Cast { op: CastOp::Trunc, .. })), 1);
        assert_eq!(ctx.rval(&v).ty, IrType::i8());
    }

    #[test]
    fn static_arrays_convert_to_slices() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let a = t.m.add_local(f, "a", Type::SArray(Box::new(Type::int()), 4));
        let cast = t.expr(ExprKind::Cast(Box::new(t.var(a))), Type::int().array_of());
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(a);
        match cast.codegen(&mut ctx).unwrap() {
            DValue::Slice { len, .. } => assert_eq!(len.as_const_int(), Some(4)),
            v => panic!("expected a slice, got {:?}", v),
        }
    }

    #[test]
    fn integer_comparisons_follow_signedness() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let a = t.m.add_local(f, "a", Type::Basic(Basic::ULong));
        let lt = t.expr(
            ExprKind::Cmp(CmpOp::Lt, Box::new(t.var(a)), Box::new(t.typed_int(1, Type::Basic(Basic::ULong)))),
            Type::bool(),
        );
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(a);
        lt.codegen(&mut ctx).unwrap();
        assert_eq!(
            ctx.count(|i| matches!(i, Inst::ICmp { pred: crate::lir::IntPred::Ult, .. })),
            1
        );
    }
}
