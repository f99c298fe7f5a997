//! Kernels SIMD
//!
//! Primitivas em lote usadas como loop interno do interpretador SSMD.
//! Cada kernel é especializado por largura (const generic 1-4) e por operador
//! (tipo que implementa [`KernelOp`]); a escolha constante/array/indexado é feita
//! uma vez fora do loop de elementos.
//!
//! - [`kernels`]: arrays contíguos (registradores do SSMD)
//! - [`indexed`]: registros com dados em offset fixo

pub mod indexed;
pub mod kernels;

pub use indexed::*;
pub use kernels::*;

/// Operador binário monomorfizado nos kernels
pub trait KernelOp: Copy + Default + Send + Sync + 'static {
    fn apply(a: f32, b: f32) -> f32;
}

#[inline(always)]
fn truth(condition: bool) -> f32 {
    if condition { 1.0 } else { 0.0 }
}

macro_rules! kernel_op {
    ($(#[$doc:meta])* $name:ident, |$a:ident, $b:ident| $body:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl KernelOp for $name {
            #[inline(always)]
            fn apply($a: f32, $b: f32) -> f32 {
                $body
            }
        }
    };
}

kernel_op!(AddOp, |a, b| a + b);
kernel_op!(SubOp, |a, b| a - b);
kernel_op!(MulOp, |a, b| a * b);
kernel_op!(DivOp, |a, b| a / b);
kernel_op!(
    /// E lógico (não-zero = verdadeiro)
    AndOp, |a, b| truth(a != 0.0 && b != 0.0)
);
kernel_op!(OrOp, |a, b| truth(a != 0.0 || b != 0.0));
kernel_op!(XorOp, |a, b| truth((a != 0.0) != (b != 0.0)));
kernel_op!(GreaterOp, |a, b| truth(a > b));
kernel_op!(GreaterEqualsOp, |a, b| truth(a >= b));
kernel_op!(SmallerOp, |a, b| truth(a < b));
kernel_op!(SmallerEqualsOp, |a, b| truth(a <= b));
kernel_op!(EqualsOp, |a, b| truth(a == b));
kernel_op!(NotEqualsOp, |a, b| truth(a != b));
kernel_op!(MinOp, |a, b| a.min(b));
kernel_op!(MaxOp, |a, b| a.max(b));

/// Executa `$body` com `$Op` ligado ao tipo de kernel de um [`crate::value::BinaryOp`]
macro_rules! dispatch_op {
    ($op:expr, $Op:ident => $body:expr) => {{
        use $crate::simd::*;
        use $crate::value::BinaryOp;
        match $op {
            BinaryOp::Add => { type $Op = AddOp; $body }
            BinaryOp::Sub => { type $Op = SubOp; $body }
            BinaryOp::Mul => { type $Op = MulOp; $body }
            BinaryOp::Div => { type $Op = DivOp; $body }
            BinaryOp::And => { type $Op = AndOp; $body }
            BinaryOp::Or => { type $Op = OrOp; $body }
            BinaryOp::Xor => { type $Op = XorOp; $body }
            BinaryOp::Greater => { type $Op = GreaterOp; $body }
            BinaryOp::GreaterEquals => { type $Op = GreaterEqualsOp; $body }
            BinaryOp::Smaller => { type $Op = SmallerOp; $body }
            BinaryOp::SmallerEquals => { type $Op = SmallerEqualsOp; $body }
            BinaryOp::Equals => { type $Op = EqualsOp; $body }
            BinaryOp::NotEquals => { type $Op = NotEqualsOp; $body }
            BinaryOp::Min => { type $Op = MinOp; $body }
            BinaryOp::Max => { type $Op = MaxOp; $body }
        }
    }};
}

/// Executa `$body` com a constante `$W` ligada à largura (1-4)
macro_rules! dispatch_width {
    ($width:expr, $W:ident => $body:expr) => {
        match $width {
            1 => { const $W: usize = 1; $body }
            2 => { const $W: usize = 2; $body }
            3 => { const $W: usize = 3; $body }
            _ => { const $W: usize = 4; $body }
        }
    };
}

pub(crate) use dispatch_op;
pub(crate) use dispatch_width;
