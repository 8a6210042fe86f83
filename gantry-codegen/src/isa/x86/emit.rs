//! Instruction selection and encoding over post-allocation IR.
//!
//! The emitter walks the effectful nodes in order; pure nodes are expression
//! trees computed at their consumer. Every operand the allocator was
//! required to place in a register arrives wrapped in a `Reg` node carrying
//! a physical unit; immediates that fit a sign-extended 32-bit field stay
//! inline, and anything larger was routed through the constant pool in the
//! data section.
//!
//! `r11` is the encoder's scratch register and is reserved away from the
//! allocator, so two-operand forms can always be realised. Comparisons
//! feeding a conditional skip are encoded at the branch site as a fused
//! `cmp`/`jcc` pair; nothing the allocator emits between flag definition
//! and use exists in that window.

use crate::binemit::{CodeBlob, CodeSink, RelocSection};
use crate::buffer::{Pos, Word};
use crate::ir::{Code, Node, Opcode, Sign};
use crate::isa::x86::asm::{Assembler, RoundState};
use crate::isa::x86::enc::{encode_modrm, encode_sib, CondCode, RexFlags};
use crate::isa::x86::registers::{hw_enc, RU_R11, RU_RAX, RU_RBP, RU_RDX, RU_RSP};
use crate::result::{CodegenError, CodegenResult};
use rustc_hash::FxHashMap;

/// Emit machine code for a register-allocated code object.
pub fn emit_function(code: &Code) -> CodegenResult<CodeBlob> {
    let frame = FrameLayout::new(code);
    let mut state = RoundState::default();
    for _ in 0..64 {
        let mut asm = Assembler::resume(state);
        Emitter {
            code,
            frame: &frame,
            asm: &mut asm,
        }
        .run()?;
        let (blob, next, stable) = asm.finish()?;
        if stable {
            return Ok(blob);
        }
        state = next;
    }
    Err(CodegenError::Encoder(
        "branch layout did not converge".to_string(),
    ))
}

/// Frame slot assignment: one 8-byte home per storage node, below rbp.
struct FrameLayout {
    homes: FxHashMap<Pos, i32>,
    size: u32,
}

impl FrameLayout {
    fn new(code: &Code) -> Self {
        let mut homes = FxHashMap::default();
        let mut slots = 0i32;
        for node in code.nodes() {
            if matches!(node.op, Opcode::Temp | Opcode::Arg) {
                slots += 1;
                homes.insert(node.pos, -8 * slots);
            }
        }
        let bytes = (slots as u32) * 8;
        Self {
            homes,
            size: (bytes + 15) & !15,
        }
    }

    fn home(&self, pos: Pos) -> CodegenResult<i32> {
        self.homes.get(&pos).copied().ok_or_else(|| {
            CodegenError::Encoder(format!("storage at {} has no frame slot", pos))
        })
    }
}

enum Operand {
    R(Word),
    I(i32),
}

struct Emitter<'a> {
    code: &'a Code,
    frame: &'a FrameLayout,
    asm: &'a mut Assembler,
}

impl<'a> Emitter<'a> {
    fn run(&mut self) -> CodegenResult<()> {
        for node in self.code.nodes() {
            match node.op {
                Opcode::Enter => {
                    self.asm.put1(0x55); // push rbp
                    self.mov_rr_force(RU_RBP, RU_RSP);
                    if self.frame.size > 0 {
                        self.alu_ri(5, RU_RSP, self.frame.size as i32); // sub
                    }
                }
                Opcode::Exit => {
                    self.asm.put1(0xc9); // leave
                    self.asm.put1(0xc3); // ret
                }
                Opcode::Move => self.emit_move(&node)?,
                Opcode::St => {
                    let addr = self.reg_operand(node.arg(0))?;
                    match self.operand(node.arg(1))? {
                        Operand::R(v) => self.store_ind(addr, v),
                        Operand::I(i) => self.store_ind_imm(addr, i),
                    }
                }
                Opcode::Invoke => {
                    let callee = self.reg_operand(node.arg(0))?;
                    self.call_r(callee);
                }
                Opcode::SkipIf => self.emit_branch(node.arg(0), node.pos, node.pos)?,
                Opcode::Skip => self.asm.jmp(node.pos, node.pos),
                Opcode::Here => self.asm.bind(node.arg(0)),
                Opcode::Forever => self.asm.bind(node.pos),
                Opcode::Repeat => self.asm.jmp(node.pos, node.arg(0)),
                Opcode::Mark => self.asm.bind(node.arg(0)),
                Opcode::Jump => self.asm.jmp(node.pos, node.arg(0)),
                Opcode::Branch => self.emit_branch(node.arg(1), node.pos, node.arg(0))?,
                Opcode::RMove => self.mov_rr(node.arg(0), node.arg(1)),
                Opcode::RSwap => self.xchg(node.arg(0), node.arg(1)),
                // Pure nodes are computed at their consumers; declarations
                // and types occupy no code.
                _ => {}
            }
        }
        Ok(())
    }

    fn emit_move(&mut self, node: &Node) -> CodegenResult<()> {
        let dst = self.code.node_at(node.arg(0));
        let src_pos = node.arg(1);
        match dst.op {
            Opcode::Reg => {
                let unit = dst.arg(1);
                if unit <= 0 {
                    return Err(CodegenError::Encoder(
                        "move destination was never allocated".to_string(),
                    ));
                }
                let src = self.code.node_at(src_pos);
                match src.op {
                    // Fill from a storage home.
                    Opcode::Temp | Opcode::Arg => {
                        let disp = self.frame.home(src_pos)?;
                        self.load(unit, RU_RBP, disp);
                        Ok(())
                    }
                    _ => self.emit_expr(src_pos, unit),
                }
            }
            // Spill to a storage home.
            Opcode::Temp | Opcode::Arg => {
                let disp = self.frame.home(node.arg(0))?;
                match self.operand(src_pos)? {
                    Operand::R(s) => self.store(RU_RBP, disp, s),
                    Operand::I(i) => self.store_imm(RU_RBP, disp, i),
                }
                Ok(())
            }
            _ => Err(CodegenError::Encoder(format!(
                "move destination {} is not a register or storage home",
                dst.op
            ))),
        }
    }

    fn emit_branch(&mut self, cond: Pos, site: Pos, target: Pos) -> CodegenResult<()> {
        let cnode = self.code.node_at(cond);
        if cnode.op.is_compare() {
            let sign = self.code.value_sign(cnode.arg(0));
            let lhs = self.reg_operand(cnode.arg(0))?;
            match self.operand(cnode.arg(1))? {
                Operand::R(rhs) => self.alu_rr(0x39, lhs, rhs),
                Operand::I(i) => self.alu_ri(7, lhs, i),
            }
            let cc = CondCode::of(cnode.op, sign);
            self.asm.jcc(site, cc.bits(), target);
            return Ok(());
        }
        match self.operand(cond)? {
            Operand::R(c) => {
                self.test_rr(c);
                self.asm.jcc(site, 0x5, target); // jnz
            }
            Operand::I(i) => {
                if i != 0 {
                    self.asm.jmp(site, target);
                }
            }
        }
        Ok(())
    }

    /// Resolve an operand position: a `Reg` wrapper (computing its value
    /// first when it wraps a pure expression) or an inline immediate.
    fn operand(&mut self, pos: Pos) -> CodegenResult<Operand> {
        let node = self.code.node_at(pos);
        match node.op {
            Opcode::Reg => {
                let unit = node.arg(1);
                if unit <= 0 {
                    return Err(CodegenError::Encoder(
                        "operand was never assigned a register".to_string(),
                    ));
                }
                let var = node.arg(0);
                if self.code.node_at(var).op.is_pure() {
                    self.emit_expr(var, unit)?;
                }
                Ok(Operand::R(unit))
            }
            Opcode::Imm => {
                let v = node.arg(0);
                i32::try_from(v).map(Operand::I).map_err(|_| {
                    CodegenError::Encoder(format!("immediate {} does not fit 32 bits", v))
                })
            }
            op => Err(CodegenError::Encoder(format!(
                "{} operand is not in a register",
                op
            ))),
        }
    }

    fn reg_operand(&mut self, pos: Pos) -> CodegenResult<Word> {
        match self.operand(pos)? {
            Operand::R(unit) => Ok(unit),
            Operand::I(_) => Err(CodegenError::Encoder(
                "operand must be in a register".to_string(),
            )),
        }
    }

    /// Compute the pure expression at `pos` into `d`.
    fn emit_expr(&mut self, pos: Pos, d: Word) -> CodegenResult<()> {
        let node = self.code.node_at(pos);
        match node.op {
            Opcode::Imm => {
                self.mov_ri(d, node.arg(0));
                Ok(())
            }
            Opcode::Reg => {
                let unit = node.arg(1);
                let var = node.arg(0);
                if self.code.node_at(var).op.is_pure() {
                    self.emit_expr(var, unit)?;
                }
                self.mov_rr(d, unit);
                Ok(())
            }
            Opcode::Temp | Opcode::Arg => {
                let disp = self.frame.home(pos)?;
                self.load(d, RU_RBP, disp);
                Ok(())
            }
            Opcode::Add => self.emit_alu(&node, d, 0x01, 0),
            Opcode::Sub => self.emit_alu(&node, d, 0x29, 5),
            Opcode::And => self.emit_alu(&node, d, 0x21, 4),
            Opcode::Or => self.emit_alu(&node, d, 0x09, 1),
            Opcode::Xor => self.emit_alu(&node, d, 0x31, 6),
            Opcode::Mul => self.emit_mul(&node, d),
            Opcode::Div => self.emit_div(&node, d),
            op if op.is_compare() => {
                let sign = self.code.value_sign(node.arg(0));
                let lhs = self.reg_operand(node.arg(0))?;
                match self.operand(node.arg(1))? {
                    Operand::R(rhs) => self.alu_rr(0x39, lhs, rhs),
                    Operand::I(i) => self.alu_ri(7, lhs, i),
                }
                self.setcc_scratch(CondCode::of(op, sign));
                self.movzx_b(d, RU_R11);
                Ok(())
            }
            Opcode::Not => {
                let c = self.reg_operand(node.arg(0))?;
                self.test_rr(c);
                self.setcc_scratch(CondCode::of(Opcode::Eq, Sign::Unsigned));
                self.movzx_b(d, RU_R11);
                Ok(())
            }
            Opcode::Neg => {
                match self.operand(node.arg(0))? {
                    Operand::R(r) => self.mov_rr(d, r),
                    Operand::I(i) => self.mov_ri(d, i64::from(i)),
                }
                self.unary_f7(3, d);
                Ok(())
            }
            Opcode::Cast => {
                match self.operand(node.arg(1))? {
                    Operand::R(r) => self.mov_rr(d, r),
                    Operand::I(i) => self.mov_ri(d, i64::from(i)),
                }
                Ok(())
            }
            Opcode::Conv => self.emit_conv(&node, d),
            Opcode::Ld => {
                let addr = self.reg_operand(node.arg(0))?;
                self.load_ind(d, addr);
                Ok(())
            }
            op => Err(CodegenError::Unsupported(op.name().to_string())),
        }
    }

    fn emit_alu(&mut self, node: &Node, d: Word, op: u8, imm_ext: u8) -> CodegenResult<()> {
        let commutative = node.op.is_commutative();
        let lhs = self.reg_operand(node.arg(0))?;
        match self.operand(node.arg(1))? {
            Operand::I(i) => {
                self.mov_rr(d, lhs);
                self.alu_ri(imm_ext, d, i);
            }
            Operand::R(rhs) => {
                if d == rhs {
                    if commutative {
                        self.alu_rr(op, d, lhs);
                    } else {
                        // The destination doubles as the right operand;
                        // stage through the scratch register.
                        self.mov_rr(RU_R11, lhs);
                        self.alu_rr(op, RU_R11, rhs);
                        self.mov_rr(d, RU_R11);
                    }
                } else {
                    self.mov_rr(d, lhs);
                    self.alu_rr(op, d, rhs);
                }
            }
        }
        Ok(())
    }

    fn emit_mul(&mut self, node: &Node, d: Word) -> CodegenResult<()> {
        let lhs = self.reg_operand(node.arg(0))?;
        match self.operand(node.arg(1))? {
            Operand::I(i) => self.imul_ri(d, lhs, i),
            Operand::R(rhs) => {
                if d == rhs {
                    self.imul_rr(d, lhs);
                } else {
                    self.mov_rr(d, lhs);
                    self.imul_rr(d, rhs);
                }
            }
        }
        Ok(())
    }

    /// `idiv`/`div` demand rax and rdx; both are preserved around the
    /// operation, and the quotient rides out in the scratch register so a
    /// destination of rax or rdx still ends up holding it after the
    /// restores.
    fn emit_div(&mut self, node: &Node, d: Word) -> CodegenResult<()> {
        let signed = self.code.value_sign(node.pos) == Sign::Signed;
        let lhs = self.reg_operand(node.arg(0))?;
        let rhs = self.reg_operand(node.arg(1))?;
        self.push(RU_RAX);
        self.push(RU_RDX);
        self.mov_rr(RU_R11, rhs);
        self.mov_rr(RU_RAX, lhs);
        if signed {
            self.asm.put1(0x48);
            self.asm.put1(0x99); // cqo
        } else {
            self.asm.put1(0x31);
            self.asm.put1(0xd2); // xor edx, edx
        }
        self.unary_f7(if signed { 7 } else { 6 }, RU_R11);
        self.mov_rr(RU_R11, RU_RAX);
        self.pop(RU_RDX);
        self.pop(RU_RAX);
        self.mov_rr(d, RU_R11);
        Ok(())
    }

    fn emit_conv(&mut self, node: &Node, d: Word) -> CodegenResult<()> {
        let dst_ty = node.arg(0);
        let dw = self.code.type_width(dst_ty);
        let dsign = self.code.type_sign(dst_ty);
        let value = node.arg(1);
        let (sw, ssign) = match self.code.type_of(value) {
            Some(ty) => (self.code.type_width(ty), self.code.type_sign(ty)),
            None => (64, Sign::Signed),
        };
        let r = match self.operand(value)? {
            Operand::I(i) => {
                self.mov_ri(d, i64::from(i));
                return Ok(());
            }
            Operand::R(r) => r,
        };
        // Normalize to the narrower of the two widths, extended with the
        // destination's signedness when narrowing.
        let width = sw.min(dw);
        let sign = if dw < sw { dsign } else { ssign };
        match (width, sign) {
            (64, _) => self.mov_rr(d, r),
            (32, Sign::Signed) => self.movsxd(d, r),
            (32, Sign::Unsigned) => self.mov32_rr(d, r),
            (16, Sign::Signed) => self.movx16(d, r, true),
            (16, Sign::Unsigned) => self.movx16(d, r, false),
            (8, Sign::Signed) => self.movx8(d, r, true),
            (8, Sign::Unsigned) => self.movzx_b(d, r),
            _ => {
                return Err(CodegenError::Encoder(format!(
                    "conversion width {} is not encodable",
                    width
                )))
            }
        }
        Ok(())
    }

    // ---- instruction encodings ----

    fn mov_rr(&mut self, d: Word, s: Word) {
        if d != s {
            self.mov_rr_force(d, s);
        }
    }

    fn mov_rr_force(&mut self, d: Word, s: Word) {
        self.alu_rr(0x89, d, s);
    }

    /// `op r/m64, r64` with `rm` as destination.
    fn alu_rr(&mut self, op: u8, rm: Word, reg: Word) {
        let (g, e) = (hw_enc(reg), hw_enc(rm));
        RexFlags::set_w().emit_two_op(self.asm, g, e);
        self.asm.put1(op);
        self.asm.put1(encode_modrm(3, g & 7, e & 7));
    }

    /// `group-81 /ext r/m64, imm32`.
    fn alu_ri(&mut self, ext: u8, rm: Word, imm: i32) {
        let e = hw_enc(rm);
        RexFlags::set_w().emit_one_op(self.asm, e);
        self.asm.put1(0x81);
        self.asm.put1(encode_modrm(3, ext, e & 7));
        self.asm.put4(imm as u32);
    }

    fn mov_ri(&mut self, d: Word, v: i64) {
        let e = hw_enc(d);
        if let Ok(small) = i32::try_from(v) {
            RexFlags::set_w().emit_one_op(self.asm, e);
            self.asm.put1(0xc7);
            self.asm.put1(encode_modrm(3, 0, e & 7));
            self.asm.put4(small as u32);
        } else {
            // Wide constants live in the constant pool; the absolute
            // address is patched by the relocation pass at install time.
            let off = self.asm.data_const(&v.to_le_bytes());
            self.asm.put1(if e >= 8 { 0x49 } else { 0x48 });
            self.asm.put1(0xb8 + (e & 7));
            self.asm.reloc_abs8(RelocSection::Data, i64::from(off));
            self.asm.put8(0);
            self.load_ind(d, d);
        }
    }

    fn mem_operand(&mut self, g: u8, base: Word, disp: i32) {
        let b = hw_enc(base);
        let m0d = if disp == 0 && (b & 7) != 5 {
            0
        } else if (-128..=127).contains(&disp) {
            1
        } else {
            2
        };
        if (b & 7) == 4 {
            self.asm.put1(encode_modrm(m0d, g & 7, 4));
            self.asm.put1(encode_sib(0, 4, b & 7));
        } else {
            self.asm.put1(encode_modrm(m0d, g & 7, b & 7));
        }
        match m0d {
            1 => self.asm.put1(disp as i8 as u8),
            2 => self.asm.put4(disp as u32),
            _ => {}
        }
    }

    /// `mov r64, [base+disp]`.
    fn load(&mut self, d: Word, base: Word, disp: i32) {
        let (g, e) = (hw_enc(d), hw_enc(base));
        RexFlags::set_w().emit_two_op(self.asm, g, e);
        self.asm.put1(0x8b);
        self.mem_operand(g, base, disp);
    }

    /// `mov [base+disp], r64`.
    fn store(&mut self, base: Word, disp: i32, s: Word) {
        let (g, e) = (hw_enc(s), hw_enc(base));
        RexFlags::set_w().emit_two_op(self.asm, g, e);
        self.asm.put1(0x89);
        self.mem_operand(g, base, disp);
    }

    /// `mov qword [base+disp], imm32`.
    fn store_imm(&mut self, base: Word, disp: i32, imm: i32) {
        let e = hw_enc(base);
        RexFlags::set_w().emit_one_op(self.asm, e);
        self.asm.put1(0xc7);
        self.mem_operand(0, base, disp);
        self.asm.put4(imm as u32);
    }

    fn load_ind(&mut self, d: Word, addr: Word) {
        self.load(d, addr, 0);
    }

    fn store_ind(&mut self, addr: Word, s: Word) {
        self.store(addr, 0, s);
    }

    fn store_ind_imm(&mut self, addr: Word, imm: i32) {
        self.store_imm(addr, 0, imm);
    }

    fn push(&mut self, unit: Word) {
        let e = hw_enc(unit);
        if e >= 8 {
            self.asm.put1(0x41);
        }
        self.asm.put1(0x50 + (e & 7));
    }

    fn pop(&mut self, unit: Word) {
        let e = hw_enc(unit);
        if e >= 8 {
            self.asm.put1(0x41);
        }
        self.asm.put1(0x58 + (e & 7));
    }

    /// `F7 /ext r/m64`: neg (3), not (2), div (6), idiv (7).
    fn unary_f7(&mut self, ext: u8, rm: Word) {
        let e = hw_enc(rm);
        RexFlags::set_w().emit_one_op(self.asm, e);
        self.asm.put1(0xf7);
        self.asm.put1(encode_modrm(3, ext, e & 7));
    }

    fn test_rr(&mut self, r: Word) {
        self.alu_rr(0x85, r, r);
    }

    fn setcc_scratch(&mut self, cc: CondCode) {
        self.asm.put1(0x41); // REX.B for r11b
        self.asm.put1(0x0f);
        self.asm.put1(0x90 | cc.bits());
        self.asm.put1(encode_modrm(3, 0, hw_enc(RU_R11) & 7));
    }

    fn movzx_b(&mut self, d: Word, s: Word) {
        let (g, e) = (hw_enc(d), hw_enc(s));
        RexFlags::set_w().emit_two_op(self.asm, g, e);
        self.asm.put1(0x0f);
        self.asm.put1(0xb6);
        self.asm.put1(encode_modrm(3, g & 7, e & 7));
    }

    fn movx8(&mut self, d: Word, s: Word, signed: bool) {
        let (g, e) = (hw_enc(d), hw_enc(s));
        RexFlags::set_w().emit_two_op(self.asm, g, e);
        self.asm.put1(0x0f);
        self.asm.put1(if signed { 0xbe } else { 0xb6 });
        self.asm.put1(encode_modrm(3, g & 7, e & 7));
    }

    fn movx16(&mut self, d: Word, s: Word, signed: bool) {
        let (g, e) = (hw_enc(d), hw_enc(s));
        RexFlags::set_w().emit_two_op(self.asm, g, e);
        self.asm.put1(0x0f);
        self.asm.put1(if signed { 0xbf } else { 0xb7 });
        self.asm.put1(encode_modrm(3, g & 7, e & 7));
    }

    fn movsxd(&mut self, d: Word, s: Word) {
        let (g, e) = (hw_enc(d), hw_enc(s));
        RexFlags::set_w().emit_two_op(self.asm, g, e);
        self.asm.put1(0x63);
        self.asm.put1(encode_modrm(3, g & 7, e & 7));
    }

    /// `mov r32, r32`, which zero-extends into the full register.
    fn mov32_rr(&mut self, d: Word, s: Word) {
        let (g, e) = (hw_enc(d), hw_enc(s));
        RexFlags::clear_w().emit_two_op(self.asm, g, e);
        self.asm.put1(0x8b);
        self.asm.put1(encode_modrm(3, g & 7, e & 7));
    }

    fn imul_rr(&mut self, d: Word, s: Word) {
        let (g, e) = (hw_enc(d), hw_enc(s));
        RexFlags::set_w().emit_two_op(self.asm, g, e);
        self.asm.put1(0x0f);
        self.asm.put1(0xaf);
        self.asm.put1(encode_modrm(3, g & 7, e & 7));
    }

    fn imul_ri(&mut self, d: Word, s: Word, imm: i32) {
        let (g, e) = (hw_enc(d), hw_enc(s));
        RexFlags::set_w().emit_two_op(self.asm, g, e);
        self.asm.put1(0x69);
        self.asm.put1(encode_modrm(3, g & 7, e & 7));
        self.asm.put4(imm as u32);
    }

    fn call_r(&mut self, f: Word) {
        let e = hw_enc(f);
        if e >= 8 {
            self.asm.put1(0x41);
        }
        self.asm.put1(0xff);
        self.asm.put1(encode_modrm(3, 2, e & 7));
    }

    fn xchg(&mut self, a: Word, b: Word) {
        self.alu_rr(0x87, b, a);
    }
}
